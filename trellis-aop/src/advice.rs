//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作

use std::fmt;
use std::sync::Arc;

use trellis_core::ROOT_ERROR_TYPE;

use crate::action::AdviceAction;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 后置通知（成功返回时执行）
    After,
    /// 环绕通知（目标调用前后各执行一次）
    Around,
    /// 最终通知（无论成功还是失败都执行）
    Finally,
    /// 异常通知（抛出异常时执行，返回值替代调用结果）
    ExceptionRaised,
    /// 定时任务，不参与拦截
    Job,
}

impl AdviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceType::Before => "before",
            AdviceType::After => "after",
            AdviceType::Around => "around",
            AdviceType::Finally => "finally",
            AdviceType::ExceptionRaised => "exceptionRaised",
            AdviceType::Job => "job",
        }
    }
}

impl fmt::Display for AdviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知定义
///
/// `aspect_id` 与 `advice_bean_id` 由所属切面在构建时填写。
#[derive(Clone)]
pub struct AdviceDefinition {
    pub aspect_id: String,
    pub advice_bean_id: Option<String>,
    pub advice_type: AdviceType,
    pub action: Arc<dyn AdviceAction>,
    /// 异常通知声明处理的错误类型，空表示处理所有错误
    pub exception_types: Vec<String>,
}

impl AdviceDefinition {
    pub fn new(advice_type: AdviceType, action: impl AdviceAction + 'static) -> Self {
        Self {
            aspect_id: String::new(),
            advice_bean_id: None,
            advice_type,
            action: Arc::new(action),
            exception_types: Vec::new(),
        }
    }

    pub fn with_exception_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exception_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// 是否捕获所有错误
    pub fn is_catch_all(&self) -> bool {
        self.exception_types.is_empty()
            || self
                .exception_types
                .iter()
                .any(|t| t == "*" || t == ROOT_ERROR_TYPE)
    }

    /// 在错误谱系中的匹配距离，越小越具体
    ///
    /// 声明的类型在谱系中的位置即为距离；捕获所有错误的通知距离为谱系长度。
    pub fn exception_distance(&self, lineage: &[String]) -> Option<usize> {
        let declared = lineage
            .iter()
            .position(|kind| self.exception_types.iter().any(|t| t == kind && t != ROOT_ERROR_TYPE));
        match declared {
            Some(distance) => Some(distance),
            None if self.is_catch_all() => Some(lineage.len()),
            None => None,
        }
    }
}

impl fmt::Debug for AdviceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceDefinition")
            .field("aspect_id", &self.aspect_id)
            .field("advice_bean_id", &self.advice_bean_id)
            .field("advice_type", &self.advice_type)
            .field("exception_types", &self.exception_types)
            .finish()
    }
}
