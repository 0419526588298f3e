//! BeanPostProcessor - Bean 工厂扩展机制
//!
//! 提供在 Bean 初始化前后进行自定义处理的钩子

use crate::bean::BeanDefinition;
use crate::instance::BeanInstance;

/// BeanPostProcessor trait
///
/// 在 Bean 初始化的不同阶段提供钩子，允许替换 Bean 实例
///
/// 使用场景：
/// - AOP 代理创建
/// - Bean 包装
/// - 验证等
pub trait BeanPostProcessor: Send + Sync {
    /// 在属性注入之后、init 回调之前调用
    ///
    /// 返回的实例会接收 init 回调，并作为最终对象缓存在作用域中
    fn post_process_before_initialization(
        &self,
        bean: BeanInstance,
        _definition: &BeanDefinition,
    ) -> anyhow::Result<BeanInstance> {
        // 默认实现：直接返回原始 Bean
        Ok(bean)
    }

    /// 在 init 回调之后调用
    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        _definition: &BeanDefinition,
    ) -> anyhow::Result<BeanInstance> {
        Ok(bean)
    }

    /// 获取处理器的名称（用于日志和调试）
    fn name(&self) -> &str {
        "BeanPostProcessor"
    }

    /// 获取处理器的优先级（数字越小优先级越高）
    fn order(&self) -> i32 {
        1000
    }
}
