//! 通知执行上下文
//!
//! 一次被拦截的调用对应一个 `AdviceContext`。它携带连接点、调用参数、
//! 通知之间共享的属性、调用结果或错误，并为条目模板提供求值数据。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_core::{
    BeanFactory, BeanInstance, ContainerError, ContainerResult, EvaluationContext, Value,
};

use crate::advice::AdviceDefinition;
use crate::error_info::ErrorInfo;
use crate::joinpoint::JoinPoint;

/// 当前执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvicePhase {
    Before,
    AroundBefore,
    Invoke,
    AroundAfter,
    After,
    ExceptionRaised,
    Finally,
}

pub struct AdviceContext {
    join_point: JoinPoint,
    arguments: Vec<Value>,
    parameters: HashMap<String, Value>,
    attributes: HashMap<String, Value>,
    result: Option<Value>,
    error: Option<ErrorInfo>,
    phase: AdvicePhase,
    aspect_id: Option<String>,
    advice_bean_id: Option<String>,
    factory: Option<Arc<dyn BeanFactory>>,
    short_circuited: bool,
}

impl AdviceContext {
    pub fn new(join_point: JoinPoint) -> Self {
        Self {
            join_point,
            arguments: Vec::new(),
            parameters: HashMap::new(),
            attributes: HashMap::new(),
            result: None,
            error: None,
            phase: AdvicePhase::Before,
            aspect_id: None,
            advice_bean_id: None,
            factory: None,
            short_circuited: false,
        }
    }

    /// 方法参数，按位置以 "0"、"1"... 作为参数名暴露给模板
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_factory(mut self, factory: Option<Arc<dyn BeanFactory>>) -> Self {
        self.factory = factory;
        self
    }

    /// 为已创建的上下文绑定 bean 工厂
    pub fn attach_factory(&mut self, factory: Option<Arc<dyn BeanFactory>>) {
        self.factory = factory;
    }

    pub fn join_point(&self) -> &JoinPoint {
        &self.join_point
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub(crate) fn set_error(&mut self, error: ErrorInfo) {
        self.error = Some(error);
    }

    pub fn phase(&self) -> AdvicePhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: AdvicePhase) {
        self.phase = phase;
    }

    pub(crate) fn enter_advice(&mut self, advice: &AdviceDefinition) {
        self.aspect_id = Some(advice.aspect_id.clone());
        self.advice_bean_id = advice.advice_bean_id.clone();
    }

    /// 正在执行的通知所属切面
    pub fn aspect_id(&self) -> Option<&str> {
        self.aspect_id.as_deref()
    }

    pub fn advice_bean_id(&self) -> Option<&str> {
        self.advice_bean_id.as_deref()
    }

    pub fn factory(&self) -> ContainerResult<&Arc<dyn BeanFactory>> {
        self.factory.as_ref().ok_or(ContainerError::ContextInactive)
    }

    /// 当前切面的通知 bean
    pub fn advice_bean(&self) -> anyhow::Result<BeanInstance> {
        let bean_id = self.advice_bean_id.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "Aspect '{}' declares no advice bean",
                self.aspect_id.as_deref().unwrap_or_default()
            )
        })?;
        Ok(self.factory()?.get_bean(bean_id)?)
    }

    /// 提前结束：跳过剩余通知与目标调用，以给定值作为结果
    pub fn short_circuit(&mut self, value: Value) {
        self.result = Some(value);
        self.short_circuited = true;
    }

    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }
}

impl EvaluationContext for AdviceContext {
    fn bean(&self, id: &str) -> anyhow::Result<Value> {
        Ok(Value::Bean(self.factory()?.get_bean(id)?))
    }

    fn property(&self, key: &str) -> Option<Value> {
        let factory = self.factory.as_ref()?;
        factory.environment().get(key).map(Value::from)
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.parameters.get(name) {
            return Some(value.clone());
        }
        name.parse::<usize>()
            .ok()
            .and_then(|idx| self.arguments.get(idx).cloned())
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}

impl fmt::Debug for AdviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceContext")
            .field("join_point", &self.join_point)
            .field("phase", &self.phase)
            .field("aspect_id", &self.aspect_id)
            .field("result", &self.result)
            .field("error", &self.error)
            .finish()
    }
}
