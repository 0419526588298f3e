//! 连接点（JoinPoint）定义
//!
//! 连接点描述一个可以被通知的目标：bean 的方法调用、路由（translet）的某个阶段，
//! 或者会话。它同时是通知注册表的缓存键。

use std::fmt;
use std::str::FromStr;

use trellis_core::ContainerError;

/// 切面作用的连接点范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinpointScope {
    /// bean 方法调用
    Bean,
    /// 整个路由处理
    Translet,
    /// 路由的请求阶段
    Request,
    /// 路由的响应阶段
    Response,
    /// 路由的内容生成阶段
    Content,
    /// 会话
    Session,
}

/// 目标种类，决定哪些切面与目标兼容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Bean,
    Route,
    Session,
}

impl JoinpointScope {
    pub const ALL: [JoinpointScope; 6] = [
        JoinpointScope::Bean,
        JoinpointScope::Translet,
        JoinpointScope::Request,
        JoinpointScope::Response,
        JoinpointScope::Content,
        JoinpointScope::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JoinpointScope::Bean => "bean",
            JoinpointScope::Translet => "translet",
            JoinpointScope::Request => "request",
            JoinpointScope::Response => "response",
            JoinpointScope::Content => "content",
            JoinpointScope::Session => "session",
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        match self {
            JoinpointScope::Bean => TargetKind::Bean,
            JoinpointScope::Translet
            | JoinpointScope::Request
            | JoinpointScope::Response
            | JoinpointScope::Content => TargetKind::Route,
            JoinpointScope::Session => TargetKind::Session,
        }
    }

    /// 两个范围是否作用于同一种目标
    pub fn is_compatible_with(&self, other: JoinpointScope) -> bool {
        self.target_kind() == other.target_kind()
    }
}

impl fmt::Display for JoinpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinpointScope {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        JoinpointScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == lower)
            .ok_or_else(|| ContainerError::Config(format!("Unknown joinpoint scope '{}'", s)))
    }
}

/// 连接点信息
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinPoint {
    /// 连接点范围
    pub scope: JoinpointScope,

    /// bean id 或路由名称
    pub target_name: String,

    /// 目标类名称
    pub class_name: Option<String>,

    /// 方法名称
    pub method_name: Option<String>,
}

impl JoinPoint {
    /// bean 方法调用
    pub fn bean(
        bean_id: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            scope: JoinpointScope::Bean,
            target_name: bean_id.into(),
            class_name: Some(class_name.into()),
            method_name: Some(method_name.into()),
        }
    }

    /// 路由的某个阶段
    pub fn route(scope: JoinpointScope, route_name: impl Into<String>) -> Self {
        Self {
            scope,
            target_name: route_name.into(),
            class_name: None,
            method_name: None,
        }
    }

    /// 会话
    pub fn session(name: impl Into<String>) -> Self {
        Self::route(JoinpointScope::Session, name)
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    pub fn kind(&self) -> TargetKind {
        self.scope.target_kind()
    }

    /// 获取完整的签名
    pub fn signature(&self) -> String {
        let mut signature = format!("{}:{}", self.scope, self.target_name);
        if let Some(class_name) = &self.class_name {
            signature.push('@');
            signature.push_str(class_name);
        }
        if let Some(method_name) = &self.method_name {
            signature.push('^');
            signature.push_str(method_name);
        }
        signature
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}
