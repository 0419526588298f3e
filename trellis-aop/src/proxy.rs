//! 拦截代理
//!
//! `ProxyBean` 包装原始实例，每次方法调用都先取得该方法连接点的通知注册表，
//! 存在通知时按拦截顺序执行，否则直接委托给原始实例。

use std::any::Any;
use std::sync::Arc;

use trellis_core::{Bean, BeanInstance, ClassDescriptor, FactoryHandle, Value};

use crate::advice_registry::AdviceRegistryBuilder;
use crate::interceptor::intercept;
use crate::invocation::AdviceContext;
use crate::joinpoint::JoinPoint;

pub struct ProxyBean {
    inner: BeanInstance,
    advices: Arc<AdviceRegistryBuilder>,
    handle: Arc<FactoryHandle>,
}

impl ProxyBean {
    pub fn new(
        inner: BeanInstance,
        advices: Arc<AdviceRegistryBuilder>,
        handle: Arc<FactoryHandle>,
    ) -> Self {
        Self {
            inner,
            advices,
            handle,
        }
    }

    /// 被代理的原始实例
    pub fn inner(&self) -> &BeanInstance {
        &self.inner
    }

    fn join_point(&self, method: &str) -> JoinPoint {
        JoinPoint::bean(self.inner.bean_id(), self.inner.class_name(), method)
    }
}

impl Bean for ProxyBean {
    fn bean_id(&self) -> &str {
        self.inner.bean_id()
    }

    fn class(&self) -> &Arc<ClassDescriptor> {
        self.inner.class()
    }

    fn target(&self) -> &Arc<dyn Any + Send + Sync> {
        self.inner.as_bean().target()
    }

    fn invoke(&self, method: &str, args: &[Value]) -> anyhow::Result<Value> {
        let join_point = self.join_point(method);
        let registry = self.advices.registry_for(&join_point);
        if !registry.is_interceptable() {
            return self.inner.invoke(method, args);
        }

        let mut ctx = AdviceContext::new(join_point)
            .with_arguments(args.to_vec())
            .with_factory(self.handle.factory().ok());
        intercept(&registry, &mut ctx, |ctx| {
            self.inner.invoke(method, ctx.arguments())
        })
    }

    fn is_proxy(&self) -> bool {
        true
    }
}
