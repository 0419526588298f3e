//! 配置项
//!
//! 条目模板中的 `%{key}` 与 `ItemValue::Property` 从 `Environment` 取值。
//! 环境由多个配置源组成，优先级高的配置源先被查询。

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{ContainerError, ContainerResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// 布尔值；字符串 "true"/"false" 也被接受（环境变量只能是字符串）
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn from_toml(value: &toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s.clone()),
            toml::Value::Integer(i) => ConfigValue::Int(*i),
            toml::Value::Float(x) => ConfigValue::Float(*x),
            toml::Value::Boolean(b) => ConfigValue::Bool(*b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::Array(items.iter().map(Self::from_toml).collect())
            }
            toml::Value::Table(table) => ConfigValue::Object(
                table
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_toml(value)))
                    .collect(),
            ),
        }
    }
}

/// 配置源
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// 数字越大越先被查询
    fn priority(&self) -> i32 {
        0
    }
}

pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    /// 添加配置源；同优先级时先添加的先被查询
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        tracing::debug!(
            "Adding property source '{}' (priority {})",
            source.name(),
            source.priority()
        );
        let mut sources = self.sources.write();
        sources.push(source);
        sources.sort_by_key(|source| std::cmp::Reverse(source.priority()));
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        let found = sources
            .iter()
            .find_map(|source| source.get(key).map(|value| (source.name(), value)));
        match found {
            Some((source, value)) => {
                tracing::trace!("Property '{}' resolved from '{}'", key, source);
                Some(value)
            }
            None => {
                tracing::trace!("Property '{}' is not defined", key);
                None
            }
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .sources
            .read()
            .iter()
            .map(|source| source.name().to_string())
            .collect();
        f.debug_struct("Environment").field("sources", &names).finish()
    }
}

/// 以前缀区分的环境变量，`greeter.prefix` 对应 `{PREFIX}GREETER_PREFIX`
pub struct EnvironmentPropertySource {
    prefix: String,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.variable_name(key))
            .ok()
            .map(ConfigValue::String)
    }

    fn priority(&self) -> i32 {
        100
    }
}

/// 展平为点分键的 TOML 表
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_str(content: &str, name: String) -> ContainerResult<Self> {
        let value: toml::Value = toml::from_str(content).map_err(|e| {
            ContainerError::Config(format!("Failed to parse TOML source '{}': {}", name, e))
        })?;
        Ok(Self::from_value(&value, name))
    }

    /// `{ a = { b = 1 } }` 展平为 `a.b = 1`；数组保持为 `ConfigValue::Array`
    pub fn from_value(value: &toml::Value, name: String) -> Self {
        let mut properties = HashMap::new();
        let mut pending = vec![(String::new(), value)];
        while let Some((prefix, value)) = pending.pop() {
            match value {
                toml::Value::Table(table) => {
                    for (key, nested) in table {
                        let path = if prefix.is_empty() {
                            key.clone()
                        } else {
                            format!("{}.{}", prefix, key)
                        };
                        pending.push((path, nested));
                    }
                }
                leaf => {
                    properties.insert(prefix, ConfigValue::from_toml(leaf));
                }
            }
        }

        Self {
            name,
            properties,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 代码中直接给出的配置项
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
