//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化：一个连接点范围、一个可选的切点，
//! 以及按类型分组的通知。

use std::fmt;
use std::sync::Arc;

use crate::action::AdviceAction;
use crate::advice::{AdviceDefinition, AdviceType};
use crate::joinpoint::{JoinPoint, JoinpointScope, TargetKind};
use crate::pointcut::PointcutPattern;

/// 切面定义
#[derive(Clone)]
pub struct AspectDefinition {
    id: String,
    scope: JoinpointScope,
    pointcut: Option<PointcutPattern>,
    advice_bean_id: Option<String>,
    advices: Vec<Arc<AdviceDefinition>>,
}

impl AspectDefinition {
    pub fn builder(id: impl Into<String>, scope: JoinpointScope) -> AspectBuilder {
        AspectBuilder {
            id: id.into(),
            scope,
            pointcut: None,
            advice_bean_id: None,
            advices: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> JoinpointScope {
        self.scope
    }

    pub fn pointcut(&self) -> Option<&PointcutPattern> {
        self.pointcut.as_ref()
    }

    pub fn advice_bean_id(&self) -> Option<&str> {
        self.advice_bean_id.as_deref()
    }

    /// 按声明顺序返回所有通知
    pub fn advices(&self) -> &[Arc<AdviceDefinition>] {
        &self.advices
    }

    pub fn advices_of(&self, advice_type: AdviceType) -> impl Iterator<Item = &Arc<AdviceDefinition>> {
        self.advices
            .iter()
            .filter(move |advice| advice.advice_type == advice_type)
    }

    pub fn has_job(&self) -> bool {
        self.advices_of(AdviceType::Job).next().is_some()
    }

    /// 切面是否作用于该种类的目标
    pub fn is_compatible(&self, kind: TargetKind) -> bool {
        self.scope.target_kind() == kind
    }

    /// 切面是否适用于连接点
    ///
    /// 切面从不通知自己的通知 bean。
    pub fn matches(&self, join_point: &JoinPoint) -> bool {
        if !self.is_compatible(join_point.kind()) {
            return false;
        }
        if join_point.kind() == TargetKind::Bean
            && self.advice_bean_id.as_deref() == Some(join_point.target_name.as_str())
        {
            return false;
        }
        self.pointcut.as_ref().map_or(true, |p| p.matches(join_point))
    }
}

impl fmt::Debug for AspectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectDefinition")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("pointcut", &self.pointcut.as_ref().map(|p| p.to_string()))
            .field("advice_bean_id", &self.advice_bean_id)
            .field("advices", &self.advices.len())
            .finish()
    }
}

/// 切面构建器
pub struct AspectBuilder {
    id: String,
    scope: JoinpointScope,
    pointcut: Option<PointcutPattern>,
    advice_bean_id: Option<String>,
    advices: Vec<AdviceDefinition>,
}

impl AspectBuilder {
    pub fn pointcut(mut self, pointcut: PointcutPattern) -> Self {
        self.pointcut = Some(pointcut);
        self
    }

    pub fn advice_bean(mut self, bean_id: impl Into<String>) -> Self {
        self.advice_bean_id = Some(bean_id.into());
        self
    }

    pub fn advice(mut self, advice: AdviceDefinition) -> Self {
        self.advices.push(advice);
        self
    }

    pub fn before(self, action: impl AdviceAction + 'static) -> Self {
        self.advice(AdviceDefinition::new(AdviceType::Before, action))
    }

    pub fn after(self, action: impl AdviceAction + 'static) -> Self {
        self.advice(AdviceDefinition::new(AdviceType::After, action))
    }

    pub fn around(self, action: impl AdviceAction + 'static) -> Self {
        self.advice(AdviceDefinition::new(AdviceType::Around, action))
    }

    pub fn finally(self, action: impl AdviceAction + 'static) -> Self {
        self.advice(AdviceDefinition::new(AdviceType::Finally, action))
    }

    /// 异常通知，`types` 为空时处理所有错误
    pub fn on_exception(self, types: &[&str], action: impl AdviceAction + 'static) -> Self {
        self.advice(
            AdviceDefinition::new(AdviceType::ExceptionRaised, action)
                .with_exception_types(types.iter().copied()),
        )
    }

    pub fn job(self, action: impl AdviceAction + 'static) -> Self {
        self.advice(AdviceDefinition::new(AdviceType::Job, action))
    }

    pub fn build(self) -> AspectDefinition {
        let AspectBuilder {
            id,
            scope,
            pointcut,
            advice_bean_id,
            advices,
        } = self;

        let advices = advices
            .into_iter()
            .map(|mut advice| {
                advice.aspect_id = id.clone();
                if advice.advice_bean_id.is_none() {
                    advice.advice_bean_id = advice_bean_id.clone();
                }
                Arc::new(advice)
            })
            .collect();

        AspectDefinition {
            id,
            scope,
            pointcut,
            advice_bean_id,
            advices,
        }
    }
}

/// 切面注册器
///
/// 用于 inventory 在编译期收集切面，`AspectRegistry::scan` 会加载它们
pub struct AspectRegistration {
    /// 切面 id
    pub id: &'static str,

    /// 创建切面定义的函数
    pub creator: fn() -> AspectDefinition,
}

impl AspectRegistration {
    pub const fn new(id: &'static str, creator: fn() -> AspectDefinition) -> Self {
        Self { id, creator }
    }

    pub fn create(&self) -> AspectDefinition {
        (self.creator)()
    }
}

inventory::collect!(AspectRegistration);

/// 获取所有注册的切面注册器
pub fn get_all_aspect_registrations() -> impl Iterator<Item = &'static AspectRegistration> {
    inventory::iter::<AspectRegistration>()
}
