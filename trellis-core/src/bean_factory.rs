//! Bean Factory - 核心容器接口

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::config::Environment;
use crate::error::{ContainerError, ContainerResult};
use crate::instance::BeanInstance;

/// BeanFactory - 最基础的容器接口
///
/// 此 trait 不包含泛型方法，因此可以作为 trait object 使用
pub trait BeanFactory: Send + Sync {
    /// 通过 id 获取 Bean
    fn get_bean(&self, id: &str) -> ContainerResult<BeanInstance>;

    /// 检查是否包含指定 id 的 Bean 定义
    fn contains_bean(&self, id: &str) -> bool;

    /// 模板中 `%{key}` 使用的环境
    fn environment(&self) -> &Arc<Environment>;
}

/// BeanFactoryExt - BeanFactory 的扩展 trait
///
/// 提供泛型方法，不能作为 trait object 使用
pub trait BeanFactoryExt: BeanFactory {
    /// 获取 Bean 目标对象的强类型引用
    fn get_bean_as<T: Any + Send + Sync>(&self, id: &str) -> ContainerResult<Arc<T>> {
        let bean = self.get_bean(id)?;
        bean.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: bean.class().rust_type().to_string(),
        })
    }
}

impl<F: BeanFactory + ?Sized> BeanFactoryExt for F {}

/// 可重新绑定的工厂引用
///
/// 代理与通知动作通过它查找 bean。软重载后上下文把它指向新的工厂，
/// 已创建的代理随之使用新的工厂。
#[derive(Default)]
pub struct FactoryHandle {
    factory: RwLock<Option<Weak<dyn BeanFactory>>>,
}

impl FactoryHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, factory: Weak<dyn BeanFactory>) {
        *self.factory.write() = Some(factory);
    }

    /// 当前工厂；尚未绑定或工厂已释放时返回 `ContextInactive`
    pub fn factory(&self) -> ContainerResult<Arc<dyn BeanFactory>> {
        self.factory
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(ContainerError::ContextInactive)
    }
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryHandle")
            .field("bound", &self.factory().is_ok())
            .finish()
    }
}
