//! 规则集合与目标描述
//!
//! `RuleSet` 是构建上下文的输入：bean 定义与切面定义。路由与会话不属于
//! 内核，它们的连接点由 `TargetDescriptorSupplier` 提供，用于切点校验。

use trellis_aop::{AspectDefinition, AspectRegistry, JoinPoint, JoinpointScope};
use trellis_core::{BeanDefinition, ContainerResult};

/// 完整的规则集合
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub beans: Vec<BeanDefinition>,
    pub aspects: Vec<AspectDefinition>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bean(mut self, definition: BeanDefinition) -> Self {
        self.beans.push(definition);
        self
    }

    pub fn aspect(mut self, aspect: AspectDefinition) -> Self {
        self.aspects.push(aspect);
        self
    }

    /// 追加通过 inventory 注册的切面
    pub fn with_scanned_aspects(mut self) -> ContainerResult<Self> {
        let scanned = AspectRegistry::scan()?;
        self.aspects
            .extend(scanned.aspects().iter().map(|aspect| aspect.as_ref().clone()));
        Ok(self)
    }

    pub(crate) fn aspect_registry(&self) -> ContainerResult<AspectRegistry> {
        let mut registry = AspectRegistry::new();
        registry.register_all(self.aspects.iter().cloned())?;
        Ok(registry)
    }
}

/// 提供非 bean 目标（路由、会话）的连接点
pub trait TargetDescriptorSupplier: Send + Sync {
    fn targets(&self) -> Vec<JoinPoint>;
}

/// 固定的目标列表
#[derive(Debug, Clone, Default)]
pub struct StaticTargets {
    targets: Vec<JoinPoint>,
}

impl StaticTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// 路由在所有阶段上的连接点
    pub fn route(mut self, name: &str) -> Self {
        for scope in [
            JoinpointScope::Translet,
            JoinpointScope::Request,
            JoinpointScope::Response,
            JoinpointScope::Content,
        ] {
            self.targets.push(JoinPoint::route(scope, name));
        }
        self
    }

    pub fn session(mut self, name: &str) -> Self {
        self.targets.push(JoinPoint::session(name));
        self
    }

    pub fn target(mut self, join_point: JoinPoint) -> Self {
        self.targets.push(join_point);
        self
    }
}

impl TargetDescriptorSupplier for StaticTargets {
    fn targets(&self) -> Vec<JoinPoint> {
        self.targets.clone()
    }
}
