// trellis-core: IoC 内核
//
// 提供 bean 规则模型与作用域感知的对象注册表，支持：
// - singleton / prototype / request / session / application 作用域
// - 构造函数重载解析与静态工厂方法
// - 属性注入与条目模板（bean / 参数 / 属性 / 配置项引用）
// - 生命周期管理（init/destroy 回调）与 BeanPostProcessor

pub mod bean;
pub mod bean_factory;
pub mod bean_registry;
pub mod class;
pub mod config;
pub mod error;
pub mod instance;
pub mod item;
pub mod lifecycle;
pub mod scope;
pub mod utils;
pub mod value;

// 重新导出常用类型
pub use bean::{BeanDefinition, PropertyItem};
pub use bean_factory::{BeanFactory, BeanFactoryExt, FactoryHandle};
pub use bean_registry::{BeanRegistry, BeanRegistryBuilder};
pub use class::{ClassBuilder, ClassDescriptor, ClassRegistration, ClassRegistry, Constructor};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use error::{error_lineage, ContainerError, ContainerResult, Fault, ROOT_ERROR_TYPE};
pub use instance::{Bean, BeanInstance, PlainBean};
pub use item::{EvaluationContext, ItemValue};
pub use lifecycle::BeanPostProcessor;
pub use scope::{Scope, ScopeInstance, ScopeManager, ScopeStore};
pub use value::{ObjectValue, Value};

// 导出 inventory，供 `ClassRegistration` 提交使用
pub use inventory;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::BeanDefinition;
    pub use crate::bean_factory::{BeanFactory, BeanFactoryExt};
    pub use crate::class::{ClassDescriptor, ClassRegistration, ClassRegistry};
    pub use crate::error::{ContainerError, ContainerResult, Fault};
    pub use crate::instance::BeanInstance;
    pub use crate::item::ItemValue;
    pub use crate::scope::Scope;
    pub use crate::value::Value;
    // Re-export anyhow for convenience
    pub use anyhow::{anyhow, Context};
}
