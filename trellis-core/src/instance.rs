//! Bean 实例与调用接口
//!
//! 容器返回的对象统一为 `BeanInstance`。普通实例直接通过类描述的方法表分派，
//! 代理实例实现同一个 `Bean` trait，在委托调用前后执行通知。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::class::ClassDescriptor;
use crate::error::ContainerError;
use crate::value::Value;

/// Bean 的调用面
pub trait Bean: Send + Sync {
    /// 所属 bean 定义的 id
    fn bean_id(&self) -> &str;

    /// 实现类描述
    fn class(&self) -> &Arc<ClassDescriptor>;

    /// 真实目标对象
    fn target(&self) -> &Arc<dyn Any + Send + Sync>;

    /// 按名称调用方法
    fn invoke(&self, method: &str, args: &[Value]) -> anyhow::Result<Value>;

    /// 是否为拦截代理
    fn is_proxy(&self) -> bool {
        false
    }
}

/// 未被代理的实例，直接通过方法表调用
pub struct PlainBean {
    bean_id: String,
    class: Arc<ClassDescriptor>,
    target: Arc<dyn Any + Send + Sync>,
}

impl PlainBean {
    pub fn new(
        bean_id: impl Into<String>,
        class: Arc<ClassDescriptor>,
        target: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            bean_id: bean_id.into(),
            class,
            target,
        }
    }
}

impl Bean for PlainBean {
    fn bean_id(&self) -> &str {
        &self.bean_id
    }

    fn class(&self) -> &Arc<ClassDescriptor> {
        &self.class
    }

    fn target(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.target
    }

    fn invoke(&self, method: &str, args: &[Value]) -> anyhow::Result<Value> {
        let func = self
            .class
            .method(method)
            .ok_or_else(|| ContainerError::NoSuchMethod {
                class_name: self.class.name().to_string(),
                method: method.to_string(),
            })?;
        func(self.target.as_ref(), args)
    }
}

/// 容器管理的对象句柄
#[derive(Clone)]
pub struct BeanInstance {
    inner: Arc<dyn Bean>,
}

impl BeanInstance {
    pub fn new(bean: impl Bean + 'static) -> Self {
        Self {
            inner: Arc::new(bean),
        }
    }

    pub fn from_arc(inner: Arc<dyn Bean>) -> Self {
        Self { inner }
    }

    pub fn bean_id(&self) -> &str {
        self.inner.bean_id()
    }

    pub fn class(&self) -> &Arc<ClassDescriptor> {
        self.inner.class()
    }

    pub fn class_name(&self) -> &str {
        self.inner.class().name()
    }

    pub fn invoke(&self, method: &str, args: &[Value]) -> anyhow::Result<Value> {
        self.inner.invoke(method, args)
    }

    pub fn is_proxy(&self) -> bool {
        self.inner.is_proxy()
    }

    /// 目标对象的强类型引用（绕过拦截）
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(self.inner.target()).downcast::<T>().ok()
    }

    /// 是否为同一个对象（代理与其包装的实例视为不同对象）
    pub fn ptr_eq(&self, other: &BeanInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn as_bean(&self) -> &Arc<dyn Bean> {
        &self.inner
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("bean_id", &self.bean_id())
            .field("class", &self.class_name())
            .field("proxy", &self.is_proxy())
            .finish()
    }
}
