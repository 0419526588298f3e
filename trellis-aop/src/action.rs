//! 通知动作
//!
//! 通知在执行时运行一个动作：调用通知 bean 的方法、对模板求值、
//! 产出固定值，或者执行任意闭包。

use std::fmt;
use std::sync::Arc;

use trellis_core::{ItemValue, Value};
use tracing::trace;

use crate::invocation::AdviceContext;

/// 通知动作
pub trait AdviceAction: Send + Sync {
    fn execute(&self, ctx: &mut AdviceContext) -> anyhow::Result<Value>;

    /// 日志中使用的描述
    fn describe(&self) -> String {
        "action".to_string()
    }

    /// 动作引用的 bean，构建时校验它们都已定义
    fn referenced_beans(&self) -> Vec<String> {
        Vec::new()
    }
}

/// 调用 bean 方法
///
/// 未指定 bean 时调用所属切面的通知 bean。
#[derive(Debug, Clone)]
pub struct InvokeAction {
    bean_id: Option<String>,
    method: String,
    arguments: Vec<ItemValue>,
    result_attribute: Option<String>,
}

impl InvokeAction {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            bean_id: None,
            method: method.into(),
            arguments: Vec::new(),
            result_attribute: None,
        }
    }

    pub fn on_bean(mut self, bean_id: impl Into<String>) -> Self {
        self.bean_id = Some(bean_id.into());
        self
    }

    pub fn with_arg(mut self, argument: impl Into<ItemValue>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// 把返回值保存为上下文属性
    pub fn bind_result(mut self, attribute: impl Into<String>) -> Self {
        self.result_attribute = Some(attribute.into());
        self
    }
}

impl AdviceAction for InvokeAction {
    fn execute(&self, ctx: &mut AdviceContext) -> anyhow::Result<Value> {
        let bean = match &self.bean_id {
            Some(bean_id) => ctx.factory()?.get_bean(bean_id)?,
            None => ctx.advice_bean()?,
        };

        let args = self
            .arguments
            .iter()
            .map(|arg| arg.evaluate(&*ctx))
            .collect::<anyhow::Result<Vec<_>>>()?;

        trace!("Invoking advice method {}.{}", bean.bean_id(), self.method);
        let value = bean.invoke(&self.method, &args)?;

        if let Some(attribute) = &self.result_attribute {
            ctx.set_attribute(attribute.clone(), value.clone());
        }
        Ok(value)
    }

    fn referenced_beans(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bean_id.iter().cloned().collect();
        for argument in &self.arguments {
            argument.collect_bean_refs(&mut ids);
        }
        ids
    }

    fn describe(&self) -> String {
        match &self.bean_id {
            Some(bean_id) => format!("invoke {}.{}", bean_id, self.method),
            None => format!("invoke {}", self.method),
        }
    }
}

/// 对条目模板求值，可选保存为属性
#[derive(Debug, Clone)]
pub struct EvaluateAction {
    expression: ItemValue,
    attribute: Option<String>,
}

impl EvaluateAction {
    pub fn new(expression: impl Into<ItemValue>) -> Self {
        Self {
            expression: expression.into(),
            attribute: None,
        }
    }

    pub fn into_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

impl AdviceAction for EvaluateAction {
    fn execute(&self, ctx: &mut AdviceContext) -> anyhow::Result<Value> {
        let value = self.expression.evaluate(&*ctx)?;
        if let Some(attribute) = &self.attribute {
            ctx.set_attribute(attribute.clone(), value.clone());
        }
        Ok(value)
    }

    fn referenced_beans(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.expression.collect_bean_refs(&mut ids);
        ids
    }

    fn describe(&self) -> String {
        format!("evaluate {:?}", self.expression)
    }
}

/// 产出固定值
///
/// 终止型动作在前置阶段执行时会跳过目标调用，以该值作为结果。
#[derive(Debug, Clone)]
pub struct EmitAction {
    value: Value,
    terminal: bool,
}

impl EmitAction {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            terminal: false,
        }
    }

    pub fn terminal(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            terminal: true,
        }
    }
}

impl AdviceAction for EmitAction {
    fn execute(&self, ctx: &mut AdviceContext) -> anyhow::Result<Value> {
        if self.terminal {
            ctx.short_circuit(self.value.clone());
        }
        Ok(self.value.clone())
    }

    fn describe(&self) -> String {
        if self.terminal {
            format!("emit terminal '{}'", self.value)
        } else {
            format!("emit '{}'", self.value)
        }
    }
}

type ActionFn = dyn Fn(&mut AdviceContext) -> anyhow::Result<Value> + Send + Sync;

/// 闭包动作
#[derive(Clone)]
pub struct FnAction {
    name: String,
    func: Arc<ActionFn>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut AdviceContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl AdviceAction for FnAction {
    fn execute(&self, ctx: &mut AdviceContext) -> anyhow::Result<Value> {
        (self.func)(ctx)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}
