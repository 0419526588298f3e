//! 切面注册表
//!
//! 按声明顺序保存所有切面定义

use std::sync::Arc;

use tracing::{debug, info};
use trellis_core::{ContainerError, ContainerResult};

use crate::aspect::{get_all_aspect_registrations, AspectDefinition};
use crate::joinpoint::JoinPoint;

/// 切面注册表
#[derive(Debug, Clone, Default)]
pub struct AspectRegistry {
    aspects: Vec<Arc<AspectDefinition>>,
}

impl AspectRegistry {
    /// 创建新的切面注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 inventory 加载所有注册的切面
    pub fn scan() -> ContainerResult<Self> {
        let mut registry = Self::new();
        for registration in get_all_aspect_registrations() {
            debug!("  ├─ Loading aspect: {}", registration.id);
            registry.register(registration.create())?;
        }
        info!("Auto-loaded {} aspect(s)", registry.len());
        Ok(registry)
    }

    /// 注册切面，id 不能重复
    pub fn register(&mut self, aspect: AspectDefinition) -> ContainerResult<()> {
        if self.get(aspect.id()).is_some() {
            return Err(ContainerError::Config(format!(
                "Aspect '{}' is already defined",
                aspect.id()
            )));
        }
        debug!("Registering aspect: {}", aspect.id());
        self.aspects.push(Arc::new(aspect));
        Ok(())
    }

    /// 批量注册切面
    pub fn register_all(
        &mut self,
        aspects: impl IntoIterator<Item = AspectDefinition>,
    ) -> ContainerResult<()> {
        for aspect in aspects {
            self.register(aspect)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<AspectDefinition>> {
        self.aspects.iter().find(|aspect| aspect.id() == id)
    }

    pub fn aspects(&self) -> &[Arc<AspectDefinition>] {
        &self.aspects
    }

    /// 获取匹配指定连接点的所有切面
    pub fn get_matching_aspects(&self, join_point: &JoinPoint) -> Vec<Arc<AspectDefinition>> {
        self.aspects
            .iter()
            .filter(|aspect| aspect.matches(join_point))
            .cloned()
            .collect()
    }

    /// 声明了定时任务的切面
    pub fn job_aspects(&self) -> Vec<Arc<AspectDefinition>> {
        self.aspects
            .iter()
            .filter(|aspect| aspect.has_job())
            .cloned()
            .collect()
    }

    /// 获取注册的切面数量
    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    /// 检查是否没有注册任何切面
    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }
}
