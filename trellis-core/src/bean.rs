use std::fmt;

use crate::item::ItemValue;
use crate::Scope;

/// 属性注入条目
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyItem {
    pub name: String,
    pub value: ItemValue,
}

impl PropertyItem {
    pub fn new(name: impl Into<String>, value: impl Into<ItemValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Bean 定义 - 描述如何创建和管理 Bean
///
/// 构建完成后只读，可在线程间共享
#[derive(Debug, Clone, PartialEq)]
pub struct BeanDefinition {
    /// Bean 的 id
    pub id: String,

    /// 实现类名称（在 `ClassRegistry` 中解析）
    pub class_name: String,

    /// Bean 的作用域
    pub scope: Scope,

    /// 静态工厂方法名称
    pub factory_method: Option<String>,

    /// 初始化回调方法名称
    pub init_method: Option<String>,

    /// 销毁回调方法名称
    pub destroy_method: Option<String>,

    /// 是否延迟初始化（仅对单例和 application 作用域有效）
    pub lazy: bool,

    /// 重要的定义不允许被覆盖
    pub important: bool,

    /// 显式声明覆盖同 id 的先前定义
    pub overriding: bool,

    /// 构造参数模板
    pub constructor_args: Vec<ItemValue>,

    /// 属性模板
    pub properties: Vec<PropertyItem>,
}

impl BeanDefinition {
    /// 创建新的 Bean 定义
    pub fn new(id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            scope: Scope::default(),
            factory_method: None,
            init_method: None,
            destroy_method: None,
            lazy: false,
            important: false,
            overriding: false,
            constructor_args: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// 设置延迟初始化
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn with_overriding(mut self, overriding: bool) -> Self {
        self.overriding = overriding;
        self
    }

    pub fn with_factory_method(mut self, name: impl Into<String>) -> Self {
        self.factory_method = Some(name.into());
        self
    }

    /// 设置初始化回调
    pub fn with_init(mut self, method: impl Into<String>) -> Self {
        self.init_method = Some(method.into());
        self
    }

    /// 设置销毁回调
    pub fn with_destroy(mut self, method: impl Into<String>) -> Self {
        self.destroy_method = Some(method.into());
        self
    }

    /// 追加构造参数
    pub fn with_arg(mut self, value: impl Into<ItemValue>) -> Self {
        self.constructor_args.push(value.into());
        self
    }

    /// 追加属性
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<ItemValue>) -> Self {
        self.properties.push(PropertyItem::new(name, value));
        self
    }

    /// 构造参数与属性模板中引用的全部 bean id
    pub fn referenced_beans(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for item in &self.constructor_args {
            item.collect_bean_refs(&mut ids);
        }
        for property in &self.properties {
            property.value.collect_bean_refs(&mut ids);
        }
        ids
    }

    /// 单例与 application 作用域的 bean 在启动时预实例化，除非声明为 lazy
    pub fn is_eager(&self) -> bool {
        matches!(self.scope, Scope::Singleton | Scope::Application) && !self.lazy
    }
}

impl fmt::Display for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bean id='{}', class='{}', scope={}",
            self.id, self.class_name, self.scope
        )?;
        if let Some(factory_method) = &self.factory_method {
            write!(f, ", factory-method='{}'", factory_method)?;
        }
        if self.lazy {
            f.write_str(", lazy")?;
        }
        Ok(())
    }
}
