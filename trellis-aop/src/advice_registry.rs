//! 通知注册表
//!
//! `AdviceRegistry` 是某个连接点上所有适用通知的快照，按类型分组，
//! 组内保持切面声明顺序。`AdviceRegistryBuilder` 按连接点缓存这些快照，
//! 同一连接点并发请求时只构建一次。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use trellis_core::ContainerError;

use crate::advice::{AdviceDefinition, AdviceType};
use crate::joinpoint::JoinPoint;
use crate::registry::AspectRegistry;

/// 单个连接点上的通知
#[derive(Debug, Default)]
pub struct AdviceRegistry {
    before: Vec<Arc<AdviceDefinition>>,
    after: Vec<Arc<AdviceDefinition>>,
    around: Vec<Arc<AdviceDefinition>>,
    finally: Vec<Arc<AdviceDefinition>>,
    exception_raised: Vec<Arc<AdviceDefinition>>,
    job: Vec<Arc<AdviceDefinition>>,
    aspect_ids: Vec<String>,
}

impl AdviceRegistry {
    pub fn build(aspects: &AspectRegistry, join_point: &JoinPoint) -> Self {
        let mut registry = Self::default();
        for aspect in aspects.get_matching_aspects(join_point) {
            registry.aspect_ids.push(aspect.id().to_string());
            for advice in aspect.advices() {
                registry.bucket_mut(advice.advice_type).push(Arc::clone(advice));
            }
        }
        registry
    }

    fn bucket_mut(&mut self, advice_type: AdviceType) -> &mut Vec<Arc<AdviceDefinition>> {
        match advice_type {
            AdviceType::Before => &mut self.before,
            AdviceType::After => &mut self.after,
            AdviceType::Around => &mut self.around,
            AdviceType::Finally => &mut self.finally,
            AdviceType::ExceptionRaised => &mut self.exception_raised,
            AdviceType::Job => &mut self.job,
        }
    }

    pub fn advices(&self, advice_type: AdviceType) -> &[Arc<AdviceDefinition>] {
        match advice_type {
            AdviceType::Before => &self.before,
            AdviceType::After => &self.after,
            AdviceType::Around => &self.around,
            AdviceType::Finally => &self.finally,
            AdviceType::ExceptionRaised => &self.exception_raised,
            AdviceType::Job => &self.job,
        }
    }

    /// 参与的切面 id，按声明顺序
    pub fn aspect_ids(&self) -> &[String] {
        &self.aspect_ids
    }

    pub fn job_advices(&self) -> &[Arc<AdviceDefinition>] {
        &self.job
    }

    /// 是否存在需要拦截调用的通知
    pub fn is_interceptable(&self) -> bool {
        !(self.before.is_empty()
            && self.after.is_empty()
            && self.around.is_empty()
            && self.finally.is_empty()
            && self.exception_raised.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.is_interceptable() && self.job.is_empty()
    }

    /// 与错误谱系最接近的异常通知，距离相同时取先声明的
    pub fn best_exception_handler(&self, lineage: &[String]) -> Option<&Arc<AdviceDefinition>> {
        self.exception_raised
            .iter()
            .filter_map(|advice| advice.exception_distance(lineage).map(|d| (d, advice)))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, advice)| advice)
    }
}

/// 没有匹配到任何目标的切点条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedPatternWarning {
    pub aspect_id: String,
    pub pattern: String,
}

impl UnmatchedPatternWarning {
    pub fn into_error(self) -> ContainerError {
        ContainerError::UnmatchedPointcut {
            aspect_id: self.aspect_id,
            pattern: self.pattern,
        }
    }
}

impl fmt::Display for UnmatchedPatternWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pointcut pattern '{}' of aspect '{}' matches no target",
            self.pattern, self.aspect_id
        )
    }
}

type RegistryCell = Arc<OnceCell<Arc<AdviceRegistry>>>;

/// 按连接点缓存通知注册表
pub struct AdviceRegistryBuilder {
    aspects: RwLock<Arc<AspectRegistry>>,
    memo: Mutex<HashMap<JoinPoint, RegistryCell>>,
    builds: AtomicUsize,
}

impl AdviceRegistryBuilder {
    pub fn new(aspects: AspectRegistry) -> Self {
        Self {
            aspects: RwLock::new(Arc::new(aspects)),
            memo: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn aspects(&self) -> Arc<AspectRegistry> {
        Arc::clone(&self.aspects.read())
    }

    /// 获取连接点的通知注册表
    ///
    /// 缓存锁只用于取得该连接点的单元格，构建在单元格内进行，
    /// 不同连接点之间不会互相阻塞。
    pub fn registry_for(&self, join_point: &JoinPoint) -> Arc<AdviceRegistry> {
        let cell = {
            let mut memo = self.memo.lock();
            Arc::clone(memo.entry(join_point.clone()).or_default())
        };

        let registry = cell.get_or_init(|| {
            let aspects = self.aspects();
            let registry = AdviceRegistry::build(&aspects, join_point);
            self.builds.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Built advice registry for {} with {} aspect(s)",
                join_point,
                registry.aspect_ids().len()
            );
            Arc::new(registry)
        });
        Arc::clone(registry)
    }

    /// 替换切面集合并清空缓存
    pub fn replace_aspects(&self, aspects: impl Into<Arc<AspectRegistry>>) {
        *self.aspects.write() = aspects.into();
        self.invalidate();
    }

    pub fn invalidate(&self) {
        self.memo.lock().clear();
    }

    /// 已缓存的连接点数量
    pub fn cached_len(&self) -> usize {
        self.memo.lock().len()
    }

    /// 实际构建注册表的次数
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// 统计每个包含条目匹配到的目标数量
    ///
    /// 返回 `(aspect_id, pattern, count)`，只统计与切面范围兼容的目标。
    pub fn pattern_match_counts(&self, targets: &[JoinPoint]) -> Vec<(String, String, usize)> {
        let aspects = self.aspects();
        let mut counts = Vec::new();
        for aspect in aspects.aspects() {
            let Some(pointcut) = aspect.pointcut() else {
                continue;
            };
            for entry in pointcut.includes() {
                let count = targets
                    .iter()
                    .filter(|target| aspect.is_compatible(target.kind()) && entry.matches(target))
                    .count();
                counts.push((aspect.id().to_string(), entry.to_string(), count));
            }
        }
        counts
    }

    /// 检查切点条目是否匹配到目标，没有匹配的条目记录警告并返回
    pub fn verify_patterns(&self, targets: &[JoinPoint]) -> Vec<UnmatchedPatternWarning> {
        self.pattern_match_counts(targets)
            .into_iter()
            .filter(|(_, _, count)| *count == 0)
            .map(|(aspect_id, pattern, _)| {
                let warning = UnmatchedPatternWarning { aspect_id, pattern };
                warn!("{}", warning);
                warning
            })
            .collect()
    }
}

impl fmt::Debug for AdviceRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceRegistryBuilder")
            .field("aspects", &self.aspects.read().len())
            .field("cached", &self.cached_len())
            .field("builds", &self.build_count())
            .finish()
    }
}
