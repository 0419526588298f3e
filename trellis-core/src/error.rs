//! 统一的错误类型
//!
//! 内核自身的错误使用 `ContainerError`（thiserror 枚举），
//! 用户代码（构造函数、方法、通知动作）返回 `anyhow::Result`，
//! 由内核包装为带上下文的 `ContainerError`。

use std::fmt;
use thiserror::Error;

use crate::Scope;

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No bean named '{0}' is defined")]
    BeanNotFound(String),

    #[error("Bean '{bean_id}' has scope {scope} but no {scope} scope is active on this thread")]
    UnsupportedScope { bean_id: String, scope: Scope },

    #[error("Error creating bean '{bean_id}' ({definition}): {source}")]
    BeanCreation {
        bean_id: String,
        definition: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bean '{0}' is already defined and cannot be overridden")]
    DuplicateBean(String),

    #[error("'{referrer}' references bean '{missing}' which is not defined")]
    BeanReference { referrer: String, missing: String },

    #[error("Class '{class_name}' required by bean '{bean_id}' is not registered")]
    ClassNotFound { bean_id: String, class_name: String },

    #[error("No constructor of '{class_name}' accepts arguments ({arguments})")]
    NoMatchingConstructor { class_name: String, arguments: String },

    #[error("Class '{class_name}' has no method '{method}'")]
    NoSuchMethod { class_name: String, method: String },

    #[error("Class '{class_name}' has no property '{property}'")]
    NoSuchProperty { class_name: String, property: String },

    #[error("Type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("No {0} scope is active on this thread")]
    ScopeNotActive(Scope),

    #[error("Pointcut pattern '{pattern}' of aspect '{aspect_id}' matches no target")]
    UnmatchedPointcut { aspect_id: String, pattern: String },

    #[error("Invalid pointcut pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("Application context is not active")]
    ContextInactive,
}

impl ContainerError {
    /// 错误变体名称，参与异常通知的类型匹配
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BeanNotFound(_) => "BeanNotFoundException",
            Self::UnsupportedScope { .. } => "UnsupportedScopeException",
            Self::BeanCreation { .. } => "BeanCreationException",
            Self::DuplicateBean(_) => "DuplicateBeanException",
            Self::BeanReference { .. } => "BeanReferenceException",
            Self::ClassNotFound { .. } => "ClassNotFoundException",
            Self::NoMatchingConstructor { .. } => "NoMatchingConstructorException",
            Self::NoSuchMethod { .. } => "NoSuchMethodException",
            Self::NoSuchProperty { .. } => "NoSuchPropertyException",
            Self::TypeMismatch { .. } => "TypeMismatchException",
            Self::CircularDependency(_) => "CircularDependencyException",
            Self::ScopeNotActive(_) => "ScopeNotActiveException",
            Self::UnmatchedPointcut { .. } => "UnmatchedPointcutException",
            Self::InvalidPattern { .. } => "InvalidPatternException",
            Self::Config(_) => "ConfigException",
            Self::LoggingInitFailed(_) => "LoggingInitException",
            Self::ContextInactive => "ContextInactiveException",
        }
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// 所有错误类型的根名称，声明它的异常通知可以捕获任何错误
pub const ROOT_ERROR_TYPE: &str = "Error";

/// 带类型谱系的业务错误
///
/// Bean 方法通过返回 `Fault` 声明具体的错误类型，例如：
///
/// ```
/// use trellis_core::Fault;
///
/// let fault = Fault::new("TypeError", "expected a string").extends("ValueError");
/// assert_eq!(fault.lineage(), ["TypeError", "ValueError", "Error"]);
/// ```
#[derive(Debug, Clone, Error)]
pub struct Fault {
    lineage: Vec<String>,
    message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            lineage: vec![kind.into()],
            message: message.into(),
        }
    }

    /// 追加一个更通用的父类型
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.lineage.push(parent.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.lineage[0]
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 从最具体到最通用的类型名称，总是以 `Error` 结尾
    pub fn lineage(&self) -> Vec<String> {
        let mut lineage = self.lineage.clone();
        if lineage.last().map(String::as_str) != Some(ROOT_ERROR_TYPE) {
            lineage.push(ROOT_ERROR_TYPE.to_string());
        }
        lineage
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message)
    }
}

/// 计算任意错误的类型谱系
///
/// 依次查找错误链中的 `Fault` 与 `ContainerError`，
/// 找不到时只返回根类型 `Error`。
pub fn error_lineage(error: &anyhow::Error) -> Vec<String> {
    for cause in error.chain() {
        if let Some(fault) = cause.downcast_ref::<Fault>() {
            return fault.lineage();
        }
        if let Some(container_error) = cause.downcast_ref::<ContainerError>() {
            return vec![
                container_error.kind_name().to_string(),
                "ContainerError".to_string(),
                ROOT_ERROR_TYPE.to_string(),
            ];
        }
    }
    vec![ROOT_ERROR_TYPE.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_lineage_ends_with_root() {
        let fault = Fault::new("TypeError", "bad");
        assert_eq!(fault.lineage(), vec!["TypeError", "Error"]);

        let explicit = Fault::new("TypeError", "bad").extends("Error");
        assert_eq!(explicit.lineage(), vec!["TypeError", "Error"]);
    }

    #[test]
    fn test_error_lineage_of_anyhow_errors() {
        let err = anyhow::Error::new(Fault::new("IoError", "disk"));
        assert_eq!(error_lineage(&err), vec!["IoError", "Error"]);

        let err = anyhow::Error::new(ContainerError::BeanNotFound("x".into()));
        assert_eq!(
            error_lineage(&err),
            vec!["BeanNotFoundException", "ContainerError", "Error"]
        );

        let err = anyhow::anyhow!("plain");
        assert_eq!(error_lineage(&err), vec!["Error"]);
    }

    #[test]
    fn test_error_lineage_follows_context_chain() {
        let err = anyhow::Error::new(Fault::new("TypeError", "bad")).context("while greeting");
        assert_eq!(error_lineage(&err), vec!["TypeError", "Error"]);
    }
}
