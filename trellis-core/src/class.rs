//! 类元数据
//!
//! Rust 没有运行时反射，因此实现类型通过 `ClassDescriptor` 描述：
//! 类名、父类型、构造函数（带参数类型）、静态工厂方法、属性 setter 和方法表。
//! 方法表就是内核的"虚函数表"，代理对象通过替换调用路径实现拦截。

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::value::{types, Value};

/// 赋值给 `any` 的类型距离
pub const ANY_TYPE_DISTANCE: u32 = 100;

pub type ConstructorFn =
    Arc<dyn Fn(&[Value]) -> anyhow::Result<Box<dyn Any + Send + Sync>> + Send + Sync>;
pub type SetterFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), Value) -> anyhow::Result<()> + Send + Sync>;
pub type MethodFn =
    Arc<dyn Fn(&(dyn Any + Send + Sync), &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// 构造函数或静态工厂方法
#[derive(Clone)]
pub struct Constructor {
    parameter_types: Vec<String>,
    func: ConstructorFn,
}

impl Constructor {
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn invoke(&self, args: &[Value]) -> anyhow::Result<Box<dyn Any + Send + Sync>> {
        (self.func)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.parameter_types.join(", "))
    }
}

/// 类描述
pub struct ClassDescriptor {
    name: String,
    type_id: TypeId,
    rust_type: &'static str,
    supertypes: Vec<String>,
    constructors: Vec<Constructor>,
    factory_methods: HashMap<String, Constructor>,
    properties: HashMap<String, SetterFn>,
    methods: HashMap<String, MethodFn>,
    method_order: Vec<String>,
}

impl ClassDescriptor {
    /// 为类型 `T` 创建类描述构建器
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder {
            descriptor: ClassDescriptor {
                name: name.into(),
                type_id: TypeId::of::<T>(),
                rust_type: std::any::type_name::<T>(),
                supertypes: Vec::new(),
                constructors: Vec::new(),
                factory_methods: HashMap::new(),
                properties: HashMap::new(),
                methods: HashMap::new(),
                method_order: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    /// 按声明顺序返回构造函数
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn factory_method(&self, name: &str) -> Option<&Constructor> {
        self.factory_methods.get(name)
    }

    pub fn setter(&self, property: &str) -> Option<&SetterFn> {
        self.properties.get(property)
    }

    pub fn method(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// 按声明顺序返回方法名
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.method_order.iter().map(String::as_str)
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type)
            .field("supertypes", &self.supertypes)
            .field("constructors", &self.constructors)
            .field("methods", &self.method_order)
            .finish()
    }
}

/// 类描述构建器
pub struct ClassBuilder<T> {
    descriptor: ClassDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    /// 声明父类型或实现的接口名称
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.descriptor.supertypes.push(supertype.into());
        self
    }

    /// 添加构造函数，参数类型用于重载解析
    pub fn constructor<F>(mut self, parameter_types: &[&str], f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.descriptor.constructors.push(Self::wrap_constructor(parameter_types, f));
        self
    }

    /// 添加静态工厂方法
    pub fn factory_method<F>(mut self, name: impl Into<String>, parameter_types: &[&str], f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.descriptor
            .factory_methods
            .insert(name.into(), Self::wrap_constructor(parameter_types, f));
        self
    }

    /// 添加属性 setter
    pub fn property<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let rust_type = self.descriptor.rust_type;
        let setter: SetterFn = Arc::new(move |target, value| {
            let this = target
                .downcast_mut::<T>()
                .ok_or_else(|| anyhow!("target is not a {}", rust_type))?;
            f(this, value)
        });
        self.descriptor.properties.insert(name.into(), setter);
        self
    }

    /// 添加可调用（可被拦截）的方法
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let rust_type = self.descriptor.rust_type;
        let method: MethodFn = Arc::new(move |target, args| {
            let this = target
                .downcast_ref::<T>()
                .ok_or_else(|| anyhow!("target is not a {}", rust_type))?;
            f(this, args)
        });
        if self.descriptor.methods.insert(name.clone(), method).is_none() {
            self.descriptor.method_order.push(name);
        }
        self
    }

    pub fn build(self) -> ClassDescriptor {
        self.descriptor
    }

    fn wrap_constructor<F>(parameter_types: &[&str], f: F) -> Constructor
    where
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Constructor {
            parameter_types: parameter_types.iter().map(|t| t.to_string()).collect(),
            func: Arc::new(move |args| {
                let instance = f(args)?;
                Ok(Box::new(instance) as Box<dyn Any + Send + Sync>)
            }),
        }
    }
}

/// 通过 inventory 在链接期提交的类注册
pub struct ClassRegistration {
    pub name: &'static str,
    pub describe: fn() -> ClassDescriptor,
}

impl ClassRegistration {
    pub const fn new(name: &'static str, describe: fn() -> ClassDescriptor) -> Self {
        Self { name, describe }
    }
}

inventory::collect!(ClassRegistration);

/// 类注册表
#[derive(Default, Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<ClassDescriptor>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载所有通过 `inventory::submit!` 提交的类
    pub fn scan() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ClassRegistration> {
            tracing::debug!("  ├─ Loading class: {}", registration.name);
            registry.register((registration.describe)());
        }
        tracing::debug!("Scanned {} class(es)", registry.len());
        registry
    }

    pub fn register(&mut self, descriptor: ClassDescriptor) {
        let name = descriptor.name().to_string();
        if self.classes.insert(name.clone(), Arc::new(descriptor)).is_some() {
            tracing::warn!("Class '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn with(mut self, descriptor: ClassDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// 计算值类型 `from` 赋给参数类型 `to` 的距离
    ///
    /// - 完全相同：0
    /// - `int` → `float`：1
    /// - `null` → 非基本类型：1
    /// - 父类型：继承层数
    /// - 任意类型 → `any`：`ANY_TYPE_DISTANCE`
    /// - 不相关：`None`
    pub fn type_distance(&self, from: &str, to: &str) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        if to == types::ANY {
            return Some(ANY_TYPE_DISTANCE);
        }
        if from == types::NULL {
            return (!types::is_primitive(to)).then_some(1);
        }
        if from == types::INT && to == types::FLOAT {
            return Some(1);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(from, 0u32)]);
        while let Some((current, depth)) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(descriptor) = self.classes.get(current) else {
                continue;
            };
            for supertype in descriptor.supertypes() {
                if supertype == to {
                    return Some(depth + 1);
                }
                queue.push_back((supertype.as_str(), depth + 1));
            }
        }
        None
    }

    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        self.type_distance(from, to).is_some()
    }

    /// 选择总类型距离最小的构造函数，距离相同时取先声明的
    pub fn resolve_constructor<'a>(
        &self,
        candidates: &'a [Constructor],
        args: &[Value],
    ) -> Option<&'a Constructor> {
        let mut best: Option<(u32, &Constructor)> = None;
        for candidate in candidates {
            let Some(distance) = self.arguments_distance(candidate, args) else {
                continue;
            };
            if best.map_or(true, |(current, _)| distance < current) {
                best = Some((distance, candidate));
            }
        }
        best.map(|(_, constructor)| constructor)
    }

    /// 参数列表到构造函数参数类型的总距离
    pub fn arguments_distance(&self, constructor: &Constructor, args: &[Value]) -> Option<u32> {
        if constructor.parameter_types.len() != args.len() {
            return None;
        }
        constructor
            .parameter_types
            .iter()
            .zip(args)
            .try_fold(0u32, |total, (parameter, arg)| {
                self.type_distance(arg.type_name(), parameter)
                    .map(|distance| total + distance)
            })
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}
