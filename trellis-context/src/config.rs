//! 上下文配置文件
//!
//! ```toml
//! [kernel]
//! strict_pointcut_verification = true
//! pre_instantiate_singletons = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [properties]
//! greeting.prefix = "Hello"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use trellis_core::{ContainerError, ContainerResult, TomlPropertySource};

use crate::logging::LoggingConfig;

/// 内核行为开关
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// 切点条目没有匹配任何目标时构建失败（否则只记录警告）
    pub strict_pointcut_verification: bool,

    /// 构建完成后立即创建非懒加载的单例
    pub pre_instantiate_singletons: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            strict_pointcut_verification: false,
            pre_instantiate_singletons: true,
        }
    }
}

/// `[logging]` 段，未填写的项使用 `LoggingConfig` 的默认值
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub filter: Option<String>,
    pub show_target: Option<bool>,
    pub show_thread_ids: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub kernel: KernelConfig,
    pub logging: LoggingSection,
    /// 展平后加入环境的配置项
    pub properties: toml::Table,
}

impl ContextConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ContainerError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ContainerResult<Self> {
        toml::from_str(content)
            .map_err(|e| ContainerError::Config(format!("Failed to parse context config: {}", e)))
    }

    /// `[properties]` 表对应的配置源
    pub fn property_source(&self) -> TomlPropertySource {
        TomlPropertySource::from_value(
            &toml::Value::Table(self.properties.clone()),
            "context:properties".to_string(),
        )
        .with_priority(10)
    }

    pub fn logging_config(&self) -> ContainerResult<LoggingConfig> {
        LoggingConfig::from_env().apply(&self.logging)
    }
}
