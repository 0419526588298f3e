//! Trellis Context - 应用上下文
//!
//! 把 trellis-core 的 bean 注册表与 trellis-aop 的通知注册表组装为一个可重载的上下文：
//! - 构建时校验 bean 引用、切面引用与切点命中情况
//! - 软重载保留未变化的单例与进行中的作用域，硬重载全部重建
//! - TOML 配置文件与基于 tracing-subscriber 的日志初始化

pub mod config;
pub mod context;
pub mod logging;
pub mod rules;

pub use config::{ContextConfig, KernelConfig, LoggingSection};
pub use context::{ApplicationContext, ApplicationContextBuilder, ReloadKind};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use rules::{RuleSet, StaticTargets, TargetDescriptorSupplier};

/// 预导入模块
pub mod prelude {
    pub use crate::context::{ApplicationContext, ReloadKind};
    pub use crate::rules::{RuleSet, StaticTargets};
    pub use trellis_aop::prelude::*;
    pub use trellis_core::prelude::*;
}
