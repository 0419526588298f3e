//! Trellis AOP - 面向切面编程支持
//!
//! 为 trellis-core 的 bean 提供拦截，支持：
//! - 基于通配符与正则的切点模式（范围、目标、类、方法四段）
//! - 多种通知类型（Before、After、Around、Finally、ExceptionRaised、Job）
//! - 按连接点缓存的通知注册表，并发请求只构建一次
//! - 通过 BeanPostProcessor 自动为匹配的 bean 创建拦截代理

pub mod action;
pub mod advice;
pub mod advice_registry;
pub mod aspect;
pub mod bean_post_processor;
pub mod error_info;
pub mod interceptor;
pub mod invocation;
pub mod joinpoint;
pub mod pointcut;
pub mod proxy;
pub mod registry;

// 重新导出核心类型
pub use action::{AdviceAction, EmitAction, EvaluateAction, FnAction, InvokeAction};
pub use advice::{AdviceDefinition, AdviceType};
pub use advice_registry::{AdviceRegistry, AdviceRegistryBuilder, UnmatchedPatternWarning};
pub use aspect::{AspectBuilder, AspectDefinition, AspectRegistration};
pub use bean_post_processor::AopBeanPostProcessor;
pub use error_info::ErrorInfo;
pub use interceptor::intercept;
pub use invocation::{AdviceContext, AdvicePhase};
pub use joinpoint::{JoinPoint, JoinpointScope, TargetKind};
pub use pointcut::{PatternEntry, PatternEntryBuilder, PatternSegment, PointcutPattern};
pub use proxy::ProxyBean;
pub use registry::AspectRegistry;

// 导出 inventory 供切面注册使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::action::{EmitAction, EvaluateAction, FnAction, InvokeAction};
    pub use crate::advice::AdviceType;
    pub use crate::aspect::{AspectDefinition, AspectRegistration};
    pub use crate::invocation::AdviceContext;
    pub use crate::joinpoint::{JoinPoint, JoinpointScope};
    pub use crate::pointcut::{PatternEntry, PointcutPattern};
    pub use crate::registry::AspectRegistry;
}
