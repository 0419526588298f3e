//! AOP BeanPostProcessor - 为被切面匹配的 Bean 创建拦截代理
//!
//! 在属性注入之后、init 回调之前检查 Bean 的每个方法，只要有一个方法存在
//! 拦截型通知，就用 `ProxyBean` 包装实例。init 回调与之后的所有调用都经过代理。

use std::sync::Arc;

use tracing::{debug, trace};
use trellis_core::{BeanDefinition, BeanInstance, BeanPostProcessor, FactoryHandle};

use crate::advice_registry::AdviceRegistryBuilder;
use crate::joinpoint::JoinPoint;
use crate::proxy::ProxyBean;

/// AOP BeanPostProcessor
///
/// ## 使用示例
///
/// ```ignore
/// let processor = AopBeanPostProcessor::new(advices, handle);
/// let registry = BeanRegistry::builder(classes)
///     .post_processor(Arc::new(processor))
///     .build()?;
/// ```
pub struct AopBeanPostProcessor {
    advices: Arc<AdviceRegistryBuilder>,
    handle: Arc<FactoryHandle>,
}

impl AopBeanPostProcessor {
    pub fn new(advices: Arc<AdviceRegistryBuilder>, handle: Arc<FactoryHandle>) -> Self {
        Self { advices, handle }
    }

    /// Bean 的任一方法是否需要拦截
    fn should_proxy(&self, bean: &BeanInstance) -> bool {
        if bean.is_proxy() {
            return false;
        }
        bean.class().method_names().any(|method| {
            let join_point = JoinPoint::bean(bean.bean_id(), bean.class_name(), method);
            self.advices.registry_for(&join_point).is_interceptable()
        })
    }
}

impl BeanPostProcessor for AopBeanPostProcessor {
    fn post_process_before_initialization(
        &self,
        bean: BeanInstance,
        _definition: &BeanDefinition,
    ) -> anyhow::Result<BeanInstance> {
        if !self.should_proxy(&bean) {
            trace!("Bean '{}' does not match any aspect, skipping AOP wrapping", bean.bean_id());
            return Ok(bean);
        }

        debug!("Creating AOP proxy for bean '{}' ({})", bean.bean_id(), bean.class_name());
        Ok(BeanInstance::new(ProxyBean::new(
            bean,
            Arc::clone(&self.advices),
            Arc::clone(&self.handle),
        )))
    }

    fn name(&self) -> &str {
        "AopBeanPostProcessor"
    }

    fn order(&self) -> i32 {
        // 在其他处理器之后执行，代理包装的是它们处理后的实例
        2000
    }
}
