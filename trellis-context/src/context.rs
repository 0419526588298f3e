//! 应用上下文
//!
//! `ApplicationContext` 把 bean 注册表与通知注册表组装在一起，负责构建时校验、
//! 预实例化单例、软/硬重载以及关闭。读取操作总是针对当前生效的状态快照，
//! 重载在互斥锁内完成，替换状态是一次原子的指针交换。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use trellis_aop::{
    intercept, AdviceContext, AdviceRegistry, AdviceRegistryBuilder, AopBeanPostProcessor,
    AspectDefinition, JoinPoint, UnmatchedPatternWarning,
};
use trellis_core::{
    BeanDefinition, BeanFactory, BeanFactoryExt, BeanInstance, BeanPostProcessor, BeanRegistry,
    BeanRegistryBuilder, ClassRegistry, ContainerError, ContainerResult, Environment,
    FactoryHandle, Scope, ScopeManager, Value,
};

use crate::config::{ContextConfig, KernelConfig};
use crate::rules::{RuleSet, TargetDescriptorSupplier};

/// 重载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// 保留定义未变化的单例以及进行中的 request/session 作用域
    Soft,
    /// 丢弃全部实例与作用域，等同于关闭后重新构建
    Hard,
}

/// 某一版本规则对应的运行状态
struct ContextState {
    beans: Arc<BeanRegistry>,
    advices: Arc<AdviceRegistryBuilder>,
    rules: RuleSet,
}

/// 各版本之间共享、不随重载变化的部分
struct Assembly {
    classes: Arc<ClassRegistry>,
    environment: Arc<Environment>,
    kernel: KernelConfig,
    targets: Option<Arc<dyn TargetDescriptorSupplier>>,
    handle: Arc<FactoryHandle>,
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,
}

impl Assembly {
    /// 按规则组装新的状态
    ///
    /// 所有校验都在替换之前完成：任何一步失败时调用方持有的旧状态保持不变。
    fn install(
        &self,
        rules: RuleSet,
        current: Option<&ContextState>,
        kind: ReloadKind,
    ) -> ContainerResult<Arc<ContextState>> {
        let candidate = Arc::new(AdviceRegistryBuilder::new(rules.aspect_registry()?));

        let (advices, scopes, previous) = match (current, kind) {
            (Some(state), ReloadKind::Soft) => (
                Arc::clone(&state.advices),
                Arc::clone(state.beans.scope_manager()),
                Some(Arc::clone(&state.beans)),
            ),
            _ => (Arc::clone(&candidate), Arc::new(ScopeManager::new()), None),
        };

        let mut builder = self.prepare(&rules, &advices, scopes)?;
        self.check_aspect_references(&rules, builder.registered())?;
        self.verify(&candidate, builder.registered())?;

        if let Some(previous) = previous {
            builder = builder.retain_from(previous);
        }
        let beans = builder.build()?;

        if !Arc::ptr_eq(&advices, &candidate) {
            advices.replace_aspects(candidate.aspects());
        }

        Ok(Arc::new(ContextState {
            beans,
            advices,
            rules,
        }))
    }

    fn prepare(
        &self,
        rules: &RuleSet,
        advices: &Arc<AdviceRegistryBuilder>,
        scopes: Arc<ScopeManager>,
    ) -> ContainerResult<BeanRegistryBuilder> {
        let mut builder = BeanRegistry::builder(Arc::clone(&self.classes))
            .environment(Arc::clone(&self.environment))
            .scope_manager(scopes)
            .factory_handle(Arc::clone(&self.handle))
            .definitions(rules.beans.iter().cloned())?;

        for processor in &self.post_processors {
            builder = builder.post_processor(Arc::clone(processor));
        }
        builder = builder.post_processor(Arc::new(AopBeanPostProcessor::new(
            Arc::clone(advices),
            Arc::clone(&self.handle),
        )));

        builder.validate()?;
        Ok(builder)
    }

    /// 切面的通知 bean 与动作引用的 bean 必须已定义
    fn check_aspect_references(
        &self,
        rules: &RuleSet,
        definitions: &[BeanDefinition],
    ) -> ContainerResult<()> {
        for aspect in &rules.aspects {
            let referenced = aspect
                .advice_bean_id()
                .map(str::to_string)
                .into_iter()
                .chain(
                    aspect
                        .advices()
                        .iter()
                        .flat_map(|advice| advice.action.referenced_beans()),
                );

            for bean_id in referenced {
                if !definitions.iter().any(|definition| definition.id == bean_id) {
                    error!(
                        "Aspect '{}' references undefined bean '{}'",
                        aspect.id(),
                        bean_id
                    );
                    return Err(ContainerError::BeanReference {
                        referrer: format!("aspect '{}'", aspect.id()),
                        missing: bean_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// 所有已知目标的连接点：bean 的每个方法，加上外部提供的路由与会话
    fn join_points(&self, definitions: &[BeanDefinition]) -> Vec<JoinPoint> {
        let mut targets = Vec::new();
        for definition in definitions {
            if let Some(class) = self.classes.get(&definition.class_name) {
                targets.extend(
                    class
                        .method_names()
                        .map(|method| JoinPoint::bean(&definition.id, class.name(), method)),
                );
            }
        }
        if let Some(supplier) = &self.targets {
            targets.extend(supplier.targets());
        }
        targets
    }

    fn verify(
        &self,
        advices: &AdviceRegistryBuilder,
        definitions: &[BeanDefinition],
    ) -> ContainerResult<Vec<UnmatchedPatternWarning>> {
        let warnings = advices.verify_patterns(&self.join_points(definitions));
        if self.kernel.strict_pointcut_verification {
            if let Some(first) = warnings.first() {
                error!("Strict pointcut verification failed: {}", first);
                return Err(first.clone().into_error());
            }
        }
        Ok(warnings)
    }
}

/// 应用上下文
pub struct ApplicationContext {
    assembly: Assembly,
    state: RwLock<Arc<ContextState>>,
    reload_lock: Mutex<()>,
    shut_down: AtomicBool,
    /// 每个线程打开的请求作用域所属的管理器，离开时回到同一个管理器
    request_scopes: Mutex<HashMap<ThreadId, Vec<Arc<ScopeManager>>>>,
}

impl ApplicationContext {
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    fn state(&self) -> Arc<ContextState> {
        Arc::clone(&self.state.read())
    }

    fn active_state(&self) -> ContainerResult<Arc<ContextState>> {
        if !self.is_active() {
            return Err(ContainerError::ContextInactive);
        }
        Ok(self.state())
    }

    fn pre_instantiate(&self, state: &ContextState) -> ContainerResult<()> {
        if self.assembly.kernel.pre_instantiate_singletons {
            state.beans.initialize()?;
        }
        Ok(())
    }

    pub fn get_bean(&self, id: &str) -> ContainerResult<BeanInstance> {
        self.active_state()?.beans.get_bean(id)
    }

    /// 获取 bean 并转换为具体类型
    pub fn get_bean_as<T: Any + Send + Sync>(&self, id: &str) -> ContainerResult<Arc<T>> {
        self.active_state()?.beans.get_bean_as::<T>(id)
    }

    /// 获取 bean 并检查它可赋值给 `class_name`
    pub fn get_bean_of_class(&self, id: &str, class_name: &str) -> ContainerResult<BeanInstance> {
        self.active_state()?.beans.get_bean_of_class(id, class_name)
    }

    pub fn contains_bean(&self, id: &str) -> bool {
        self.state().beans.contains_bean(id)
    }

    pub fn bean_names(&self) -> Vec<String> {
        self.state().beans.bean_names()
    }

    pub fn definition(&self, id: &str) -> Option<Arc<BeanDefinition>> {
        self.state().beans.definition(id).cloned()
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.assembly.environment
    }

    pub fn kernel_config(&self) -> &KernelConfig {
        &self.assembly.kernel
    }

    /// 当前生效的规则
    pub fn rules(&self) -> RuleSet {
        self.state().rules.clone()
    }

    /// 当前生效的 bean 注册表
    pub fn bean_registry(&self) -> Arc<BeanRegistry> {
        Arc::clone(&self.state().beans)
    }

    pub fn enter_request_scope(&self) -> ContainerResult<()> {
        let scopes = Arc::clone(self.active_state()?.beans.scope_manager());
        scopes.enter_request_scope();
        self.request_scopes
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push(scopes);
        Ok(())
    }

    /// 离开当前线程最内层的请求作用域
    ///
    /// 作用域在进入时的管理器上结束；硬重载或关闭已销毁它时只解除绑定。
    pub fn exit_request_scope(&self) -> ContainerResult<()> {
        let scopes = {
            let thread = thread::current().id();
            let mut entered = self.request_scopes.lock();
            let scopes = entered.get_mut(&thread).and_then(Vec::pop);
            if entered.get(&thread).is_some_and(Vec::is_empty) {
                entered.remove(&thread);
            }
            scopes
        };
        match scopes {
            Some(scopes) => scopes.exit_request_scope(),
            None => Err(ContainerError::ScopeNotActive(Scope::Request)),
        }
    }

    /// 在一个 request 作用域内执行 `f`，结束时销毁作用域内的实例
    pub fn in_request_scope<R>(&self, f: impl FnOnce() -> R) -> ContainerResult<R> {
        self.enter_request_scope()?;
        let result = f();
        self.exit_request_scope()?;
        Ok(result)
    }

    /// 把当前线程关联到会话，会话不存在时创建
    pub fn enter_session_scope(&self, session_id: &str) -> ContainerResult<()> {
        self.active_state()?
            .beans
            .scope_manager()
            .enter_session_scope(session_id);
        Ok(())
    }

    /// 解除当前线程与会话的关联，会话本身保留
    pub fn leave_session_scope(&self) -> ContainerResult<()> {
        self.state().beans.scope_manager().leave_session_scope()
    }

    /// 结束会话并销毁其中的实例
    pub fn exit_session_scope(&self, session_id: &str) -> ContainerResult<()> {
        self.state().beans.scope_manager().exit_session_scope(session_id)
    }

    /// 连接点上生效的通知
    pub fn advice_registry(&self, join_point: &JoinPoint) -> Arc<AdviceRegistry> {
        self.state().advices.registry_for(join_point)
    }

    /// 以通知包裹任意调用（路由、会话等非 bean 目标）
    pub fn run_intercepted<F>(&self, ctx: &mut AdviceContext, call: F) -> anyhow::Result<Value>
    where
        F: FnOnce(&mut AdviceContext) -> anyhow::Result<Value>,
    {
        let state = self.active_state()?;
        let registry = state.advices.registry_for(ctx.join_point());
        ctx.attach_factory(self.assembly.handle.factory().ok());
        intercept(&registry, ctx, call)
    }

    /// 声明了 Job 通知的切面，供宿主调度
    pub fn job_aspects(&self) -> Vec<Arc<AspectDefinition>> {
        self.state().advices.aspects().job_aspects()
    }

    /// 重新检查当前规则的切点，返回未命中任何目标的模式
    pub fn verify_patterns(&self) -> Vec<UnmatchedPatternWarning> {
        let state = self.state();
        let definitions: Vec<BeanDefinition> = state
            .beans
            .definitions()
            .map(|definition| definition.as_ref().clone())
            .collect();
        state
            .advices
            .verify_patterns(&self.assembly.join_points(&definitions))
    }

    /// 用新的规则替换当前规则
    ///
    /// 校验失败时返回错误，当前规则与实例保持不变。
    pub fn reload(&self, rules: RuleSet, kind: ReloadKind) -> ContainerResult<()> {
        let _guard = self.reload_lock.lock();
        let current = self.active_state()?;
        info!(
            "Reloading application context ({:?}): {} bean(s), {} aspect(s)",
            kind,
            rules.beans.len(),
            rules.aspects.len()
        );

        let next = self
            .assembly
            .install(rules, Some(&*current), kind)
            .map_err(|e| {
                error!("Reload failed, keeping previous rules: {}", e);
                e
            })?;

        *self.state.write() = Arc::clone(&next);
        match kind {
            ReloadKind::Soft => current.beans.destroy_singletons(),
            ReloadKind::Hard => current.beans.shutdown(),
        }

        if let Err(e) = self.pre_instantiate(&next) {
            warn!("New rules installed but eager initialization failed: {}", e);
            return Err(e);
        }
        info!("Application context reloaded");
        Ok(())
    }

    /// 关闭上下文，销毁所有实例；重复调用无效果
    pub fn shutdown(&self) {
        let _guard = self.reload_lock.lock();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Application context already shut down");
            return;
        }
        info!("Shutting down application context");
        self.state().beans.shutdown();
    }

    pub fn is_active(&self) -> bool {
        !self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for ApplicationContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ApplicationContext")
            .field("beans", &state.beans.bean_names())
            .field("aspects", &state.rules.aspects.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// 应用上下文构建器
#[derive(Default)]
pub struct ApplicationContextBuilder {
    classes: Option<Arc<ClassRegistry>>,
    rules: RuleSet,
    config: ContextConfig,
    environment: Option<Arc<Environment>>,
    targets: Option<Arc<dyn TargetDescriptorSupplier>>,
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,
    init_logging: bool,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 类注册表，未设置时使用 inventory 扫描到的类
    pub fn classes(mut self, classes: impl Into<Arc<ClassRegistry>>) -> Self {
        self.classes = Some(classes.into());
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn bean(mut self, definition: BeanDefinition) -> Self {
        self.rules.beans.push(definition);
        self
    }

    pub fn aspect(mut self, aspect: AspectDefinition) -> Self {
        self.rules.aspects.push(aspect);
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config_file(mut self, path: impl AsRef<Path>) -> ContainerResult<Self> {
        self.config = ContextConfig::from_file(path)?;
        Ok(self)
    }

    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// 非 bean 目标的来源，用于切点校验
    pub fn targets(mut self, targets: impl TargetDescriptorSupplier + 'static) -> Self {
        self.targets = Some(Arc::new(targets));
        self
    }

    pub fn post_processor(mut self, processor: Arc<dyn BeanPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// 构建时按配置安装全局日志订阅者
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> ContainerResult<ApplicationContext> {
        if self.init_logging {
            if let Err(e) = self.config.logging_config()?.init() {
                warn!("Logging not initialized: {}", e);
            }
        }

        let classes = self
            .classes
            .unwrap_or_else(|| Arc::new(ClassRegistry::scan()));
        let environment = self.environment.unwrap_or_default();
        if !self.config.properties.is_empty() {
            environment.add_property_source(Box::new(self.config.property_source()));
        }

        let assembly = Assembly {
            classes,
            environment,
            kernel: self.config.kernel.clone(),
            targets: self.targets,
            handle: FactoryHandle::new(),
            post_processors: self.post_processors,
        };

        info!(
            "Building application context: {} bean(s), {} aspect(s)",
            self.rules.beans.len(),
            self.rules.aspects.len()
        );
        let state = assembly.install(self.rules, None, ReloadKind::Hard)?;

        let context = ApplicationContext {
            assembly,
            state: RwLock::new(Arc::clone(&state)),
            reload_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
            request_scopes: Mutex::new(HashMap::new()),
        };
        context.pre_instantiate(&state)?;

        info!("Application context started");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_aop::{EmitAction, InvokeAction, JoinpointScope, PointcutPattern};
    use trellis_core::ClassDescriptor;

    struct Plain;

    fn classes() -> ClassRegistry {
        let mut classes = ClassRegistry::new();
        classes.register(
            ClassDescriptor::builder::<Plain>("test.Plain")
                .constructor(&[], |_| Ok(Plain))
                .method("ping", |_, _| Ok(Value::from("pong")))
                .build(),
        );
        classes
    }

    fn builder() -> ApplicationContextBuilder {
        ApplicationContext::builder()
            .classes(classes())
            .bean(BeanDefinition::new("plain", "test.Plain"))
    }

    #[test]
    fn test_build_and_get() {
        let context = builder().build().unwrap();
        let bean = context.get_bean("plain").unwrap();
        assert_eq!(bean.invoke("ping", &[]).unwrap(), Value::from("pong"));
        assert!(context.contains_bean("plain"));
        assert!(!context.contains_bean("missing"));
    }

    #[test]
    fn test_missing_advice_bean() {
        let aspect = AspectDefinition::builder("audit", JoinpointScope::Bean)
            .advice_bean("auditor")
            .before(InvokeAction::new("record"))
            .build();

        let err = builder().aspect(aspect).build().unwrap_err();
        assert!(matches!(err, ContainerError::BeanReference { ref missing, .. } if missing == "auditor"));
    }

    #[test]
    fn test_strict_verification() {
        let aspect = AspectDefinition::builder("log", JoinpointScope::Bean)
            .pointcut(PointcutPattern::parse("nothing*").unwrap())
            .before(EmitAction::value("x"))
            .build();

        let lenient = builder().aspect(aspect.clone()).build().unwrap();
        assert_eq!(lenient.verify_patterns().len(), 1);

        let mut config = ContextConfig::default();
        config.kernel.strict_pointcut_verification = true;
        let err = builder().aspect(aspect).config(config).build().unwrap_err();
        assert!(matches!(err, ContainerError::UnmatchedPointcut { .. }));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let context = builder().build().unwrap();
        context.shutdown();
        context.shutdown();
        assert!(!context.is_active());
        assert!(matches!(
            context.get_bean("plain"),
            Err(ContainerError::ContextInactive)
        ));
        assert!(context.reload(RuleSet::new(), ReloadKind::Soft).is_err());
    }

    #[test]
    fn test_failed_reload_keeps_rules() {
        let context = builder().build().unwrap();
        let broken = RuleSet::new().bean(BeanDefinition::new("plain", "test.Missing"));

        assert!(context.reload(broken, ReloadKind::Soft).is_err());
        assert_eq!(context.rules().beans[0].class_name, "test.Plain");
        assert!(context.get_bean("plain").is_ok());
    }
}
