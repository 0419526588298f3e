//! BeanRegistry - 作用域感知的对象注册表
//!
//! 持有只读的 bean 定义，按作用域创建、缓存和销毁实例。
//!
//! # 构造流程
//! 1. 求值构造参数模板（或使用显式传入的参数）
//! 2. 通过静态工厂方法或类型距离最小的构造函数实例化
//! 3. 求值并注入属性
//! 4. BeanPostProcessor.post_process_before_initialization（AOP 在这里包装代理）
//! 5. 在最终对象上调用 init 方法
//! 6. BeanPostProcessor.post_process_after_initialization

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::bean::BeanDefinition;
use crate::bean_factory::{BeanFactory, FactoryHandle};
use crate::class::{ClassDescriptor, ClassRegistry};
use crate::config::Environment;
use crate::error::{ContainerError, ContainerResult};
use crate::instance::{BeanInstance, PlainBean};
use crate::item::EvaluationContext;
use crate::lifecycle::BeanPostProcessor;
use crate::scope::{Scope, ScopeInstance, ScopeManager, ScopeStore};
use crate::utils::dependency::{
    validate_dependency_graph, CreationTracker, DependencyValidationError,
};
use crate::value::Value;

/// 对象注册表
pub struct BeanRegistry {
    classes: Arc<ClassRegistry>,
    environment: Arc<Environment>,

    /// Bean 定义存储
    definitions: HashMap<String, Arc<BeanDefinition>>,

    /// 声明顺序
    order: Vec<String>,

    singletons: ScopeStore,
    application: ScopeStore,
    scopes: Arc<ScopeManager>,

    /// Bean 后置处理器列表（按优先级排序）
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,

    /// 循环依赖检测
    creation_tracker: CreationTracker,

    handle: Arc<FactoryHandle>,
    shut_down: AtomicBool,

    /// 已交给下一版本注册表的实例，销毁时跳过
    handed_over: Mutex<HashSet<String>>,
}

impl BeanRegistry {
    pub fn builder(classes: Arc<ClassRegistry>) -> BeanRegistryBuilder {
        BeanRegistryBuilder {
            classes,
            environment: None,
            definitions: Vec::new(),
            post_processors: Vec::new(),
            scopes: None,
            handle: None,
            previous: None,
        }
    }

    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    pub fn scope_manager(&self) -> &Arc<ScopeManager> {
        &self.scopes
    }

    pub fn factory_handle(&self) -> &Arc<FactoryHandle> {
        &self.handle
    }

    pub fn definition(&self, id: &str) -> Option<&Arc<BeanDefinition>> {
        self.definitions.get(id)
    }

    /// 按声明顺序返回所有定义
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<BeanDefinition>> {
        self.order.iter().filter_map(|id| self.definitions.get(id))
    }

    pub fn bean_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn singleton_store(&self) -> &ScopeStore {
        &self.singletons
    }

    pub fn application_store(&self) -> &ScopeStore {
        &self.application
    }

    pub fn is_active(&self) -> bool {
        !self.shut_down.load(Ordering::Acquire)
    }

    /// 获取 Bean 并检查它的类是否可以赋给 `class_name`
    pub fn get_bean_of_class(&self, id: &str, class_name: &str) -> ContainerResult<BeanInstance> {
        let bean = self.get_bean(id)?;
        if !self.classes.is_assignable(bean.class_name(), class_name) {
            return Err(ContainerError::TypeMismatch {
                expected: class_name.to_string(),
                found: bean.class_name().to_string(),
            });
        }
        Ok(bean)
    }

    /// 使用显式参数构造一个新实例（不经过作用域缓存）
    ///
    /// 显式参数替代定义中的构造参数模板
    pub fn construct(
        &self,
        definition: &BeanDefinition,
        args: Option<Vec<Value>>,
    ) -> ContainerResult<BeanInstance> {
        self.create_bean(definition, args)
    }

    /// 预实例化所有非延迟的单例与 application 作用域 bean
    pub fn initialize(&self) -> ContainerResult<()> {
        let eager: Vec<&Arc<BeanDefinition>> =
            self.definitions().filter(|definition| definition.is_eager()).collect();
        tracing::info!("Pre-instantiating {} singleton bean(s)", eager.len());

        for definition in eager {
            self.get_bean(&definition.id)?;
        }
        Ok(())
    }

    /// 销毁单例与 application 存储，已交给下一版本的实例只移出不销毁
    pub fn destroy_singletons(&self) {
        for bean_id in self.handed_over.lock().drain() {
            self.singletons.take(&bean_id);
            self.application.take(&bean_id);
        }
        let destroyed = self.application.destroy() + self.singletons.destroy();
        tracing::debug!("Destroyed {} singleton bean(s)", destroyed);
    }

    /// 关闭注册表：销毁单例、application 实例与所有会话
    ///
    /// 重复调用不会再次执行销毁方法
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Bean registry already shut down");
            return;
        }
        tracing::info!("Shutting down bean registry");
        self.destroy_singletons();
        self.scopes.destroy_all();
    }

    fn get_or_create(
        &self,
        store: &ScopeStore,
        definition: &BeanDefinition,
    ) -> ContainerResult<BeanInstance> {
        // 检查缓存
        if let Some(bean) = store.get(&definition.id) {
            tracing::debug!(
                "Returning cached instance of {} bean '{}'",
                definition.scope,
                definition.id
            );
            return Ok(bean);
        }

        let lock = store.construction_lock(&definition.id);
        let _guard = lock.lock();
        if let Some(bean) = store.get(&definition.id) {
            return Ok(bean);
        }

        if definition.scope == Scope::Singleton {
            tracing::info!("Creating shared instance of singleton bean '{}'", definition.id);
        } else {
            tracing::debug!(
                "Creating instance of {} bean '{}'",
                definition.scope,
                definition.id
            );
        }

        let bean = self.create_bean(definition, None)?;
        store.put(ScopeInstance::new(
            definition.id.clone(),
            bean.clone(),
            definition.destroy_method.clone(),
        ));
        Ok(bean)
    }

    fn create_bean(
        &self,
        definition: &BeanDefinition,
        args: Option<Vec<Value>>,
    ) -> ContainerResult<BeanInstance> {
        // 检查循环依赖
        if !self.creation_tracker.start_creating(&definition.id) {
            let chain = self.creation_tracker.current_chain();
            return Err(ContainerError::CircularDependency(format!(
                "{} -> {}",
                chain.join(" -> "),
                definition.id
            )));
        }

        // 使用 RAII 模式确保在任何情况下都会清理标记
        struct CreationGuard<'a> {
            tracker: &'a CreationTracker,
            name: &'a str,
        }

        impl Drop for CreationGuard<'_> {
            fn drop(&mut self) {
                self.tracker.finish_creating(self.name);
            }
        }

        let _guard = CreationGuard {
            tracker: &self.creation_tracker,
            name: &definition.id,
        };

        self.instantiate(definition, args).map_err(|source| {
            // 保留循环依赖错误，不要包装它
            if let Some(ContainerError::CircularDependency(chain)) =
                source.downcast_ref::<ContainerError>()
            {
                return ContainerError::CircularDependency(chain.clone());
            }
            tracing::debug!("Creation of bean '{}' failed: {:#}", definition.id, source);
            ContainerError::BeanCreation {
                bean_id: definition.id.clone(),
                definition: definition.to_string(),
                source,
            }
        })
    }

    fn instantiate(
        &self,
        definition: &BeanDefinition,
        args: Option<Vec<Value>>,
    ) -> anyhow::Result<BeanInstance> {
        let class = self.class_of(definition)?;

        // 1. 构造参数
        let args = match args {
            Some(args) => args,
            None => definition
                .constructor_args
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    item.evaluate(self)
                        .with_context(|| format!("Failed to resolve constructor argument #{}", idx))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
        };

        // 2. 实例化
        let mut target = self.instantiate_target(&class, definition, &args)?;

        // 3. 属性注入
        for property in &definition.properties {
            let setter = class
                .setter(&property.name)
                .ok_or_else(|| ContainerError::NoSuchProperty {
                    class_name: class.name().to_string(),
                    property: property.name.clone(),
                })?;
            let value = property
                .value
                .evaluate(self)
                .with_context(|| format!("Failed to resolve property '{}'", property.name))?;
            setter(target.as_mut(), value)
                .with_context(|| format!("Failed to set property '{}'", property.name))?;
        }

        let target: Arc<dyn Any + Send + Sync> = Arc::from(target);
        let mut bean = BeanInstance::new(PlainBean::new(definition.id.clone(), class, target));

        // 4. BeanPostProcessor.postProcessBeforeInitialization
        for processor in &self.post_processors {
            bean = processor
                .post_process_before_initialization(bean, definition)
                .with_context(|| format!("Post-processor '{}' failed", processor.name()))?;
        }

        // 5. init 回调
        if let Some(init_method) = &definition.init_method {
            tracing::trace!("Invoking init method '{}' on bean '{}'", init_method, definition.id);
            bean.invoke(init_method, &[])
                .with_context(|| format!("Init method '{}' failed", init_method))?;
        }

        // 6. BeanPostProcessor.postProcessAfterInitialization
        for processor in &self.post_processors {
            bean = processor
                .post_process_after_initialization(bean, definition)
                .with_context(|| format!("Post-processor '{}' failed", processor.name()))?;
        }

        Ok(bean)
    }

    fn instantiate_target(
        &self,
        class: &ClassDescriptor,
        definition: &BeanDefinition,
        args: &[Value],
    ) -> anyhow::Result<Box<dyn Any + Send + Sync>> {
        let describe_args = || {
            args.iter()
                .map(|arg| arg.type_name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        match &definition.factory_method {
            Some(name) => {
                let factory = class.factory_method(name).ok_or_else(|| {
                    ContainerError::NoSuchMethod {
                        class_name: class.name().to_string(),
                        method: name.clone(),
                    }
                })?;
                if self.classes.arguments_distance(factory, args).is_none() {
                    return Err(ContainerError::NoMatchingConstructor {
                        class_name: format!("{}::{}", class.name(), name),
                        arguments: describe_args(),
                    }
                    .into());
                }
                factory.invoke(args)
            }
            None => {
                let constructor = self
                    .classes
                    .resolve_constructor(class.constructors(), args)
                    .ok_or_else(|| ContainerError::NoMatchingConstructor {
                        class_name: class.name().to_string(),
                        arguments: describe_args(),
                    })?;
                constructor.invoke(args)
            }
        }
    }

    fn class_of(&self, definition: &BeanDefinition) -> ContainerResult<Arc<ClassDescriptor>> {
        self.classes
            .get(&definition.class_name)
            .ok_or_else(|| ContainerError::ClassNotFound {
                bean_id: definition.id.clone(),
                class_name: definition.class_name.clone(),
            })
    }
}

impl BeanFactory for BeanRegistry {
    fn get_bean(&self, id: &str) -> ContainerResult<BeanInstance> {
        tracing::trace!("Requesting bean: '{}'", id);

        if !self.is_active() {
            return Err(ContainerError::ContextInactive);
        }

        let definition = self.definitions.get(id).ok_or_else(|| {
            tracing::debug!("Bean '{}' not found in registry", id);
            ContainerError::BeanNotFound(id.to_string())
        })?;

        match definition.scope {
            Scope::Singleton => self.get_or_create(&self.singletons, definition),
            Scope::Application => self.get_or_create(&self.application, definition),
            Scope::Prototype => {
                tracing::debug!("Creating new instance of prototype bean '{}'", id);
                self.create_bean(definition, None)
            }
            Scope::Request | Scope::Session => {
                let store = self.scopes.current_store(definition.scope).ok_or_else(|| {
                    ContainerError::UnsupportedScope {
                        bean_id: id.to_string(),
                        scope: definition.scope,
                    }
                })?;
                self.get_or_create(&store, definition)
            }
        }
    }

    fn contains_bean(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }
}

impl EvaluationContext for BeanRegistry {
    fn bean(&self, id: &str) -> anyhow::Result<Value> {
        Ok(Value::Bean(self.get_bean(id)?))
    }

    fn property(&self, key: &str) -> Option<Value> {
        self.environment.get(key).map(Value::from)
    }
}

impl fmt::Debug for BeanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanRegistry")
            .field("definitions", &self.order)
            .field("singletons", &self.singletons)
            .field("application", &self.application)
            .field("active", &self.is_active())
            .finish()
    }
}

/// BeanRegistry 构建器
pub struct BeanRegistryBuilder {
    classes: Arc<ClassRegistry>,
    environment: Option<Arc<Environment>>,
    definitions: Vec<BeanDefinition>,
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,
    scopes: Option<Arc<ScopeManager>>,
    handle: Option<Arc<FactoryHandle>>,
    previous: Option<Arc<BeanRegistry>>,
}

impl BeanRegistryBuilder {
    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// 注册 Bean 定义
    ///
    /// 同 id 的定义：先前的定义为 important 时总是报错；
    /// 新定义声明 overriding 时替换先前的定义；否则报 `DuplicateBean`。
    pub fn register(&mut self, definition: BeanDefinition) -> ContainerResult<()> {
        let Some(existing) = self.definitions.iter_mut().find(|d| d.id == definition.id) else {
            tracing::trace!("Registering bean definition '{}'", definition.id);
            self.definitions.push(definition);
            return Ok(());
        };

        if existing.important || !definition.overriding {
            tracing::error!("Duplicate bean definition '{}'", definition.id);
            return Err(ContainerError::DuplicateBean(definition.id));
        }
        tracing::info!(
            "Overriding bean definition '{}': [{}] replaced by [{}]",
            definition.id,
            existing,
            definition
        );
        *existing = definition;
        Ok(())
    }

    pub fn definition(mut self, definition: BeanDefinition) -> ContainerResult<Self> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn definitions(
        mut self,
        definitions: impl IntoIterator<Item = BeanDefinition>,
    ) -> ContainerResult<Self> {
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(self)
    }

    /// 已注册的定义（重复规则已生效）
    pub fn registered(&self) -> &[BeanDefinition] {
        &self.definitions
    }

    /// 添加 BeanPostProcessor
    pub fn post_processor(mut self, processor: Arc<dyn BeanPostProcessor>) -> Self {
        tracing::debug!("Registering BeanPostProcessor: {}", processor.name());
        self.post_processors.push(processor);
        self
    }

    /// 共享的外部作用域管理器（软重载时沿用）
    pub fn scope_manager(mut self, scopes: Arc<ScopeManager>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// 共享的工厂引用，构建完成后指向新的注册表
    pub fn factory_handle(mut self, handle: Arc<FactoryHandle>) -> Self {
        self.handle = Some(handle);
        self
    }

    /// 从旧的注册表接管定义未变化的单例与 application 实例
    pub fn retain_from(mut self, previous: Arc<BeanRegistry>) -> Self {
        self.previous = Some(previous);
        self
    }

    /// 校验所有定义
    pub fn validate(&self) -> ContainerResult<()> {
        for definition in &self.definitions {
            let class = self.classes.get(&definition.class_name).ok_or_else(|| {
                ContainerError::ClassNotFound {
                    bean_id: definition.id.clone(),
                    class_name: definition.class_name.clone(),
                }
            })?;

            if let Some(name) = &definition.factory_method {
                if class.factory_method(name).is_none() {
                    return Err(ContainerError::NoSuchMethod {
                        class_name: class.name().to_string(),
                        method: name.clone(),
                    });
                }
            }

            for method in [&definition.init_method, &definition.destroy_method]
                .into_iter()
                .flatten()
            {
                if !class.has_method(method) {
                    return Err(ContainerError::NoSuchMethod {
                        class_name: class.name().to_string(),
                        method: method.clone(),
                    });
                }
            }

            for property in &definition.properties {
                if class.setter(&property.name).is_none() {
                    return Err(ContainerError::NoSuchProperty {
                        class_name: class.name().to_string(),
                        property: property.name.clone(),
                    });
                }
            }
        }

        let graph: Vec<(String, Vec<String>)> = self
            .definitions
            .iter()
            .map(|definition| (definition.id.clone(), definition.referenced_beans()))
            .collect();

        validate_dependency_graph(&graph).map_err(|e| match e {
            DependencyValidationError::MissingDependency { bean, missing } => {
                ContainerError::BeanReference {
                    referrer: bean,
                    missing,
                }
            }
            DependencyValidationError::CircularDependency { cycle } => {
                ContainerError::CircularDependency(cycle.join(" -> "))
            }
        })
    }

    pub fn build(mut self) -> ContainerResult<Arc<BeanRegistry>> {
        self.validate()?;
        self.post_processors.sort_by_key(|processor| processor.order());

        let order: Vec<String> = self.definitions.iter().map(|d| d.id.clone()).collect();
        let definitions: HashMap<String, Arc<BeanDefinition>> = self
            .definitions
            .into_iter()
            .map(|definition| (definition.id.clone(), Arc::new(definition)))
            .collect();

        let registry = Arc::new(BeanRegistry {
            classes: self.classes,
            environment: self.environment.unwrap_or_default(),
            definitions,
            order,
            singletons: ScopeStore::new(Scope::Singleton),
            application: ScopeStore::new(Scope::Application),
            scopes: self.scopes.unwrap_or_default(),
            post_processors: self.post_processors,
            creation_tracker: CreationTracker::new(),
            handle: self.handle.unwrap_or_else(FactoryHandle::new),
            shut_down: AtomicBool::new(false),
            handed_over: Mutex::new(HashSet::new()),
        });

        if let Some(previous) = self.previous {
            let retained = registry.retain_instances(&previous);
            tracing::info!("Retained {} unchanged singleton bean(s)", retained);
        }

        let factory: Weak<dyn BeanFactory> = Arc::downgrade(&registry) as Weak<dyn BeanFactory>;
        registry.handle.bind(factory);

        tracing::debug!("Bean registry built with {} definition(s)", registry.len());
        Ok(registry)
    }
}

impl BeanRegistry {
    /// 共享旧注册表中定义未变化的实例
    ///
    /// 旧存储保留这些实例，直到旧注册表被替换后销毁；替换前的读取仍然得到同一个实例。
    fn retain_instances(&self, previous: &BeanRegistry) -> usize {
        let mut retained = 0;
        for (old_store, new_store) in [
            (&previous.singletons, &self.singletons),
            (&previous.application, &self.application),
        ] {
            for instance in old_store.snapshot() {
                let unchanged = matches!(
                    (previous.definition(&instance.bean_id), self.definition(&instance.bean_id)),
                    (Some(old), Some(new)) if old == new
                );
                if !unchanged {
                    continue;
                }
                tracing::debug!("Retaining singleton bean '{}'", instance.bean_id);
                previous.handed_over.lock().insert(instance.bean_id.clone());
                new_store.put(instance);
                retained += 1;
            }
        }
        retained
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use parking_lot::Mutex;

    use super::*;
    use crate::bean_factory::BeanFactoryExt;
    use crate::config::{ConfigValue, MapPropertySource};
    use crate::instance::Bean;
    use crate::item::ItemValue;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Repository {
        url: String,
    }

    struct Service {
        repository: Option<Arc<Repository>>,
        greeting: String,
        log: Log,
    }

    struct Counter;

    struct Linked {
        peer: Option<BeanInstance>,
    }

    static COUNTER_CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

    fn classes(log: &Log) -> Arc<ClassRegistry> {
        let init_log = Arc::clone(log);
        let destroy_log = Arc::clone(log);
        let ctor_log = Arc::clone(log);
        Arc::new(
            ClassRegistry::new()
                .with(
                    ClassDescriptor::builder::<Repository>("demo.Repository")
                        .constructor(&[], |_| Ok(Repository { url: "mem://".into() }))
                        .constructor(&["string"], |args| {
                            Ok(Repository { url: args[0].to_string() })
                        })
                        .factory_method("in_memory", &[], |_| {
                            Ok(Repository { url: "factory://".into() })
                        })
                        .method("url", |this: &Repository, _| Ok(Value::from(this.url.clone())))
                        .build(),
                )
                .with(
                    ClassDescriptor::builder::<Service>("demo.Service")
                        .extends("demo.Component")
                        .constructor(&[], move |_| {
                            Ok(Service {
                                repository: None,
                                greeting: String::new(),
                                log: Arc::clone(&ctor_log),
                            })
                        })
                        .property("repository", |this: &mut Service, value| {
                            this.repository = value.downcast::<Repository>();
                            Ok(())
                        })
                        .property("greeting", |this: &mut Service, value| {
                            this.greeting = value.to_string();
                            Ok(())
                        })
                        .method("init", move |this: &Service, _| {
                            init_log.lock().push(format!("init:{}", this.greeting));
                            Ok(Value::Null)
                        })
                        .method("close", move |_: &Service, _| {
                            destroy_log.lock().push("close".to_string());
                            Ok(Value::Null)
                        })
                        .method("greet", |this: &Service, args| {
                            this.log.lock().push("greet".to_string());
                            Ok(Value::from(format!("{} {}", this.greeting, args[0])))
                        })
                        .build(),
                )
                .with(
                    ClassDescriptor::builder::<Counter>("demo.Counter")
                        .constructor(&[], |_| {
                            COUNTER_CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(Counter)
                        })
                        .build(),
                )
                .with(
                    ClassDescriptor::builder::<Linked>("demo.Slow")
                        .constructor(&[], |_| {
                            std::thread::sleep(std::time::Duration::from_millis(100));
                            Ok(Linked { peer: None })
                        })
                        .property("peer", |this: &mut Linked, value| {
                            this.peer = value.as_bean().cloned();
                            Ok(())
                        })
                        .build(),
                )
                .with(
                    ClassDescriptor::builder::<Counter>("demo.Flaky")
                        .constructor(&["bool"], |args| {
                            if args[0].as_bool() == Some(true) {
                                anyhow::bail!("flaky construction");
                            }
                            Ok(Counter)
                        })
                        .build(),
                ),
        )
    }

    fn service_definition() -> BeanDefinition {
        BeanDefinition::new("service", "demo.Service")
            .with_property("repository", ItemValue::bean("repository"))
            .with_property("greeting", ItemValue::text("%{greeting:Hi}"))
            .with_init("init")
            .with_destroy("close")
    }

    fn registry(log: &Log, definitions: Vec<BeanDefinition>) -> Arc<BeanRegistry> {
        BeanRegistry::builder(classes(log))
            .definitions(definitions)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_singleton_identity_and_prototype_distinctness() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![
                BeanDefinition::new("repository", "demo.Repository"),
                BeanDefinition::new("draft", "demo.Repository").with_scope(Scope::Prototype),
            ],
        );

        let a = registry.get_bean("repository").unwrap();
        let b = registry.get_bean("repository").unwrap();
        assert!(a.ptr_eq(&b));

        let p1 = registry.get_bean("draft").unwrap();
        let p2 = registry.get_bean("draft").unwrap();
        assert!(!p1.ptr_eq(&p2));
        assert!(registry.singleton_store().contains("repository"));
        assert!(!registry.singleton_store().contains("draft"));
    }

    #[test]
    fn test_construction_pipeline_injects_and_initializes() {
        let log = Log::default();
        let environment = Arc::new(Environment::new());
        environment.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property("greeting", ConfigValue::String("Hello".into())),
        ));
        let registry = BeanRegistry::builder(classes(&log))
            .environment(environment)
            .definitions(vec![
                BeanDefinition::new("repository", "demo.Repository").with_arg("db://main"),
                service_definition(),
            ])
            .unwrap()
            .build()
            .unwrap();

        let service = registry.get_bean_as::<Service>("service").unwrap();
        assert_eq!(service.greeting, "Hello");
        assert_eq!(service.repository.as_ref().unwrap().url, "db://main");
        assert_eq!(*log.lock(), vec!["init:Hello"]);

        let bean = registry.get_bean("service").unwrap();
        assert_eq!(
            bean.invoke("greet", &[Value::from("Ada")]).unwrap(),
            Value::from("Hello Ada")
        );
    }

    #[test]
    fn test_factory_method_and_explicit_arguments() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![BeanDefinition::new("repository", "demo.Repository")
                .with_factory_method("in_memory")],
        );
        let repository = registry.get_bean_as::<Repository>("repository").unwrap();
        assert_eq!(repository.url, "factory://");

        let definition = BeanDefinition::new("other", "demo.Repository");
        let built = registry
            .construct(&definition, Some(vec![Value::from("explicit://")]))
            .unwrap();
        assert_eq!(built.downcast::<Repository>().unwrap().url, "explicit://");
    }

    #[test]
    fn test_no_matching_constructor_is_bean_creation_error() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![BeanDefinition::new("repository", "demo.Repository").with_arg(42)],
        );
        let err = registry.get_bean("repository").unwrap_err();
        match err {
            ContainerError::BeanCreation {
                bean_id,
                definition,
                source,
            } => {
                assert_eq!(bean_id, "repository");
                assert!(definition.contains("demo.Repository"));
                assert!(matches!(
                    source.downcast_ref::<ContainerError>(),
                    Some(ContainerError::NoMatchingConstructor { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failed_singleton_is_not_cached() {
        let log = Log::default();
        let environment = Arc::new(Environment::new());
        let registry = BeanRegistry::builder(classes(&log))
            .environment(Arc::clone(&environment))
            .definition(
                BeanDefinition::new("flaky", "demo.Flaky")
                    .with_lazy(true)
                    .with_arg(ItemValue::property_or("fail", true)),
            )
            .unwrap()
            .build()
            .unwrap();

        assert!(matches!(
            registry.get_bean("flaky"),
            Err(ContainerError::BeanCreation { .. })
        ));
        assert!(!registry.singleton_store().contains("flaky"));

        environment.add_property_source(Box::new(
            MapPropertySource::new("fix").with_property("fail", ConfigValue::Bool(false)),
        ));
        assert!(registry.get_bean("flaky").is_ok());
    }

    #[test]
    fn test_unknown_bean_and_type_mismatch() {
        let log = Log::default();
        let registry = registry(&log, vec![BeanDefinition::new("repository", "demo.Repository")]);

        assert!(matches!(
            registry.get_bean("missing"),
            Err(ContainerError::BeanNotFound(id)) if id == "missing"
        ));
        assert!(matches!(
            registry.get_bean_as::<Service>("repository"),
            Err(ContainerError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.get_bean_of_class("repository", "demo.Service"),
            Err(ContainerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_get_bean_of_class_accepts_supertype() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![
                BeanDefinition::new("repository", "demo.Repository"),
                service_definition(),
            ],
        );
        assert!(registry.get_bean_of_class("service", "demo.Component").is_ok());
    }

    #[test]
    fn test_shutdown_twice_destroys_once() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![
                BeanDefinition::new("repository", "demo.Repository"),
                service_definition(),
            ],
        );
        registry.initialize().unwrap();

        registry.shutdown();
        registry.shutdown();

        let closes = log.lock().iter().filter(|entry| *entry == "close").count();
        assert_eq!(closes, 1);
        assert!(matches!(
            registry.get_bean("service"),
            Err(ContainerError::ContextInactive)
        ));
    }

    #[test]
    fn test_duplicate_definition_rules() {
        let log = Log::default();
        let mut builder = BeanRegistry::builder(classes(&log));
        builder
            .register(BeanDefinition::new("repository", "demo.Repository"))
            .unwrap();

        assert!(matches!(
            builder.register(BeanDefinition::new("repository", "demo.Repository")),
            Err(ContainerError::DuplicateBean(_))
        ));
        builder
            .register(
                BeanDefinition::new("repository", "demo.Repository")
                    .with_factory_method("in_memory")
                    .with_overriding(true)
                    .with_important(true),
            )
            .unwrap();
        assert!(matches!(
            builder.register(
                BeanDefinition::new("repository", "demo.Repository").with_overriding(true)
            ),
            Err(ContainerError::DuplicateBean(_))
        ));

        let registry = builder.build().unwrap();
        assert_eq!(registry.len(), 1);
        let repository = registry.get_bean_as::<Repository>("repository").unwrap();
        assert_eq!(repository.url, "factory://");
    }

    #[test]
    fn test_build_validation_errors() {
        let log = Log::default();
        let missing_ref = BeanRegistry::builder(classes(&log))
            .definition(service_definition())
            .unwrap()
            .build();
        assert!(matches!(
            missing_ref,
            Err(ContainerError::BeanReference { referrer, missing })
                if referrer == "service" && missing == "repository"
        ));

        let unknown_class = BeanRegistry::builder(classes(&log))
            .definition(BeanDefinition::new("x", "demo.Missing"))
            .unwrap()
            .build();
        assert!(matches!(unknown_class, Err(ContainerError::ClassNotFound { .. })));

        let bad_init = BeanRegistry::builder(classes(&log))
            .definition(BeanDefinition::new("x", "demo.Repository").with_init("start"))
            .unwrap()
            .build();
        assert!(matches!(bad_init, Err(ContainerError::NoSuchMethod { .. })));

        let cycle = BeanRegistry::builder(classes(&log))
            .definitions(vec![
                BeanDefinition::new("a", "demo.Repository").with_arg(ItemValue::bean("b")),
                BeanDefinition::new("b", "demo.Repository").with_arg(ItemValue::text("#{a}")),
            ])
            .unwrap()
            .build();
        assert!(matches!(cycle, Err(ContainerError::CircularDependency(_))));
    }

    #[test]
    fn test_request_scope_requires_active_request() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![BeanDefinition::new("cart", "demo.Repository").with_scope(Scope::Request)],
        );

        assert!(matches!(
            registry.get_bean("cart"),
            Err(ContainerError::UnsupportedScope { scope: Scope::Request, .. })
        ));

        registry.scope_manager().enter_request_scope();
        let first = registry.get_bean("cart").unwrap();
        assert!(first.ptr_eq(&registry.get_bean("cart").unwrap()));
        registry.scope_manager().exit_request_scope().unwrap();

        registry.scope_manager().enter_request_scope();
        let second = registry.get_bean("cart").unwrap();
        assert!(!first.ptr_eq(&second));
        registry.scope_manager().exit_request_scope().unwrap();
    }

    #[test]
    fn test_session_scope_destroys_on_invalidation() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![
                BeanDefinition::new("repository", "demo.Repository"),
                service_definition().with_scope(Scope::Session),
            ],
        );
        let scopes = registry.scope_manager();

        scopes.enter_session_scope("alice");
        let first = registry.get_bean("service").unwrap();
        scopes.leave_session_scope().unwrap();
        assert!(matches!(
            registry.get_bean("service"),
            Err(ContainerError::UnsupportedScope { .. })
        ));

        scopes.enter_session_scope("alice");
        assert!(first.ptr_eq(&registry.get_bean("service").unwrap()));
        scopes.exit_session_scope("alice").unwrap();
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_concurrent_lazy_singleton_constructed_once() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![BeanDefinition::new("counter", "demo.Counter").with_lazy(true)],
        );
        registry.initialize().unwrap();
        let before = COUNTER_CONSTRUCTIONS.load(Ordering::SeqCst);

        let barrier = Barrier::new(100);
        let instances: Vec<BeanInstance> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_bean("counter").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(COUNTER_CONSTRUCTIONS.load(Ordering::SeqCst) - before, 1);
        assert!(instances.iter().all(|bean| bean.ptr_eq(&instances[0])));
    }

    #[test]
    fn test_lazy_chains_across_scopes_do_not_deadlock() {
        let log = Log::default();
        let registry = registry(
            &log,
            vec![
                BeanDefinition::new("s1", "demo.Slow")
                    .with_lazy(true)
                    .with_property("peer", ItemValue::bean("a1")),
                BeanDefinition::new("a1", "demo.Slow")
                    .with_scope(Scope::Application)
                    .with_lazy(true),
                BeanDefinition::new("a2", "demo.Slow")
                    .with_scope(Scope::Application)
                    .with_lazy(true)
                    .with_property("peer", ItemValue::bean("s2")),
                BeanDefinition::new("s2", "demo.Slow").with_lazy(true),
            ],
        );

        let (tx, rx) = std::sync::mpsc::channel();
        for id in ["s1", "a2"] {
            let registry = Arc::clone(&registry);
            let tx = tx.clone();
            std::thread::spawn(move || {
                let _ = tx.send((id, registry.get_bean(id).is_ok()));
            });
        }

        let timeout = std::time::Duration::from_secs(5);
        let mut completed: Vec<_> = (0..2).map(|_| rx.recv_timeout(timeout).unwrap()).collect();
        completed.sort();
        assert_eq!(completed, vec![("a2", true), ("s1", true)]);

        let s1 = registry.get_bean_as::<Linked>("s1").unwrap();
        assert!(s1.peer.as_ref().unwrap().ptr_eq(&registry.get_bean("a1").unwrap()));
        assert!(registry.application_store().contains("a2"));
        assert!(registry.singleton_store().contains("s2"));
    }

    struct Recording {
        inner: BeanInstance,
        calls: Log,
    }

    impl Bean for Recording {
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
            self.calls.lock().push(method.to_string());
            self.inner.invoke(method, args)
        }

        fn is_proxy(&self) -> bool {
            true
        }
    }

    struct RecordingProcessor {
        calls: Log,
    }

    impl BeanPostProcessor for RecordingProcessor {
        fn post_process_before_initialization(
            &self,
            bean: BeanInstance,
            definition: &BeanDefinition,
        ) -> anyhow::Result<BeanInstance> {
            if definition.class_name != "demo.Service" {
                return Ok(bean);
            }
            Ok(BeanInstance::new(Recording {
                inner: bean,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    #[test]
    fn test_init_runs_on_post_processed_bean() {
        let log = Log::default();
        let calls = Log::default();
        let registry = BeanRegistry::builder(classes(&log))
            .definitions(vec![
                BeanDefinition::new("repository", "demo.Repository"),
                service_definition(),
            ])
            .unwrap()
            .post_processor(Arc::new(RecordingProcessor {
                calls: Arc::clone(&calls),
            }))
            .build()
            .unwrap();

        let service = registry.get_bean("service").unwrap();
        assert!(service.is_proxy());
        assert!(!registry.get_bean("repository").unwrap().is_proxy());
        assert_eq!(*calls.lock(), vec!["init"]);
        assert!(registry.get_bean_as::<Service>("service").is_ok());
    }

    #[test]
    fn test_retain_from_keeps_unchanged_singletons() {
        let log = Log::default();
        let handle = FactoryHandle::new();
        let first = BeanRegistry::builder(classes(&log))
            .factory_handle(Arc::clone(&handle))
            .definitions(vec![
                BeanDefinition::new("repository", "demo.Repository"),
                BeanDefinition::new("draft", "demo.Repository").with_arg("v1"),
            ])
            .unwrap()
            .build()
            .unwrap();
        first.initialize().unwrap();
        let repository = first.get_bean("repository").unwrap();
        let draft = first.get_bean("draft").unwrap();

        let second = BeanRegistry::builder(classes(&log))
            .factory_handle(Arc::clone(&handle))
            .retain_from(Arc::clone(&first))
            .definitions(vec![
                BeanDefinition::new("repository", "demo.Repository"),
                BeanDefinition::new("draft", "demo.Repository").with_arg("v2"),
            ])
            .unwrap()
            .build()
            .unwrap();

        assert!(second.get_bean("repository").unwrap().ptr_eq(&repository));
        assert!(!second.get_bean("draft").unwrap().ptr_eq(&draft));
        assert!(first.singleton_store().contains("draft"));
        assert!(first.get_bean("repository").unwrap().ptr_eq(&repository));

        first.destroy_singletons();
        assert!(first.singleton_store().is_empty());
        assert!(second.singleton_store().contains("repository"));

        let bound = handle.factory().unwrap();
        assert!(bound.get_bean("repository").unwrap().ptr_eq(&repository));
    }
}
