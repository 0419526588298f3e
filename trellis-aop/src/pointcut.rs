//! 切点（Pointcut）模式
//!
//! 一个切点由若干包含条目与排除条目组成。每个条目有四个可选段：
//! 范围、目标名称、类名、方法名，文本形式为 `[scope:][target][@class][^method]`。
//!
//! 段使用通配符语法：
//! - `*` 匹配不含分隔符的任意字符
//! - `**` 匹配任意字符（包括分隔符）
//! - `?` 匹配单个非分隔符字符
//!
//! bean 目标和类名以 `.` 分隔，路由目标以 `/` 分隔，范围和方法名没有分隔符。
//! 也可以直接给出正则表达式作为段。

use std::fmt;

use regex::Regex;
use trellis_core::{ContainerError, ContainerResult};

use crate::joinpoint::{JoinPoint, TargetKind};

/// 段的分隔规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    None,
    Dot,
    /// 目标名称：bean 使用 `.`，路由使用 `/`
    Target,
}

/// 通配符转换为锚定的正则表达式
fn glob_to_regex(glob: &str, separator: Option<char>) -> String {
    let (single, any) = match separator {
        Some(sep) => {
            let escaped = regex::escape(&sep.to_string());
            (format!("[^{}]", escaped), format!("[^{}]*", escaped))
        }
        None => (".".to_string(), ".*".to_string()),
    };

    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str(&any),
            '?' => out.push_str(&single),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn compile(pattern: &str, source: &str) -> ContainerResult<Regex> {
    Regex::new(pattern).map_err(|e| ContainerError::InvalidPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })
}

/// 单个段的匹配器
#[derive(Debug, Clone)]
pub struct PatternSegment {
    text: String,
    regex: Regex,
    route_regex: Option<Regex>,
    wildcard: bool,
}

impl PatternSegment {
    fn glob(text: &str, separator: Separator) -> ContainerResult<Self> {
        let (regex, route_regex) = match separator {
            Separator::None => (compile(&glob_to_regex(text, None), text)?, None),
            Separator::Dot => (compile(&glob_to_regex(text, Some('.')), text)?, None),
            Separator::Target => (
                compile(&glob_to_regex(text, Some('.')), text)?,
                Some(compile(&glob_to_regex(text, Some('/')), text)?),
            ),
        };
        Ok(Self {
            text: text.to_string(),
            regex,
            route_regex,
            wildcard: text.chars().all(|c| c == '*'),
        })
    }

    fn regex(pattern: &str) -> ContainerResult<Self> {
        Ok(Self {
            text: format!("/{}/", pattern),
            regex: compile(pattern, pattern)?,
            route_regex: None,
            wildcard: false,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 纯通配符段匹配任何值，包括缺失的值
    fn matches(&self, value: Option<&str>, kind: TargetKind) -> bool {
        if self.wildcard {
            return true;
        }
        let Some(value) = value else {
            return false;
        };
        match (&self.route_regex, kind) {
            (Some(route), TargetKind::Route) => route.is_match(value),
            _ => self.regex.is_match(value),
        }
    }
}

/// 切点条目：四个可选段，缺失的段无条件匹配
#[derive(Debug, Clone, Default)]
pub struct PatternEntry {
    scope: Option<PatternSegment>,
    target: Option<PatternSegment>,
    class: Option<PatternSegment>,
    method: Option<PatternSegment>,
}

impl PatternEntry {
    pub fn builder() -> PatternEntryBuilder {
        PatternEntryBuilder::default()
    }

    /// 从四个段创建，`None` 表示该段缺失
    ///
    /// ```
    /// use trellis_aop::PatternEntry;
    ///
    /// let entry = PatternEntry::from_segments([Some("*"), Some("admin.*"), None, None]).unwrap();
    /// assert_eq!(entry.to_string(), "*:admin.*");
    /// ```
    pub fn from_segments(segments: [Option<&str>; 4]) -> ContainerResult<Self> {
        let [scope, target, class, method] = segments;
        let mut builder = Self::builder();
        if let Some(scope) = scope {
            builder = builder.scope(scope);
        }
        if let Some(target) = target {
            builder = builder.target(target);
        }
        if let Some(class) = class {
            builder = builder.class(class);
        }
        if let Some(method) = method {
            builder = builder.method(method);
        }
        builder.build()
    }

    /// 解析 `[scope:][target][@class][^method]`
    pub fn parse(text: &str) -> ContainerResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ContainerError::InvalidPattern {
                pattern: text.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        let (rest, method) = match text.rsplit_once('^') {
            Some((rest, method)) => (rest, Some(method)),
            None => (text, None),
        };
        let (rest, class) = match rest.rsplit_once('@') {
            Some((rest, class)) => (rest, Some(class)),
            None => (rest, None),
        };
        let (scope, target) = match rest.split_once(':') {
            Some((scope, target)) => (Some(scope), target),
            None => (None, rest),
        };

        fn non_empty(s: Option<&str>) -> Option<&str> {
            s.map(str::trim).filter(|s| !s.is_empty())
        }
        Self::from_segments([
            non_empty(scope),
            non_empty(Some(target)),
            non_empty(class),
            non_empty(method),
        ])
        .map_err(|e| match e {
            ContainerError::InvalidPattern { reason, .. } => ContainerError::InvalidPattern {
                pattern: text.to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn matches(&self, join_point: &JoinPoint) -> bool {
        let kind = join_point.kind();
        let check = |segment: &Option<PatternSegment>, value: Option<&str>| {
            segment.as_ref().map_or(true, |s| s.matches(value, kind))
        };

        check(&self.scope, Some(join_point.scope.as_str()))
            && check(&self.target, Some(&join_point.target_name))
            && check(&self.class, join_point.class_name.as_deref())
            && check(&self.method, join_point.method_name.as_deref())
    }
}

impl fmt::Display for PatternEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.scope {
            write!(f, "{}:", scope.text())?;
        }
        if let Some(target) = &self.target {
            f.write_str(target.text())?;
        }
        if let Some(class) = &self.class {
            write!(f, "@{}", class.text())?;
        }
        if let Some(method) = &self.method {
            write!(f, "^{}", method.text())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum SegmentSource {
    Glob(String),
    Regex(String),
}

/// 条目构建器，正则在 `build` 时编译
#[derive(Debug, Default)]
pub struct PatternEntryBuilder {
    scope: Option<SegmentSource>,
    target: Option<SegmentSource>,
    class: Option<SegmentSource>,
    method: Option<SegmentSource>,
}

impl PatternEntryBuilder {
    pub fn scope(mut self, glob: &str) -> Self {
        self.scope = Some(SegmentSource::Glob(glob.to_string()));
        self
    }

    pub fn target(mut self, glob: &str) -> Self {
        self.target = Some(SegmentSource::Glob(glob.to_string()));
        self
    }

    pub fn target_regex(mut self, regex: &str) -> Self {
        self.target = Some(SegmentSource::Regex(regex.to_string()));
        self
    }

    pub fn class(mut self, glob: &str) -> Self {
        self.class = Some(SegmentSource::Glob(glob.to_string()));
        self
    }

    pub fn class_regex(mut self, regex: &str) -> Self {
        self.class = Some(SegmentSource::Regex(regex.to_string()));
        self
    }

    pub fn method(mut self, glob: &str) -> Self {
        self.method = Some(SegmentSource::Glob(glob.to_string()));
        self
    }

    pub fn method_regex(mut self, regex: &str) -> Self {
        self.method = Some(SegmentSource::Regex(regex.to_string()));
        self
    }

    pub fn build(self) -> ContainerResult<PatternEntry> {
        let segment = |source: Option<SegmentSource>, separator| -> ContainerResult<_> {
            source
                .map(|source| match source {
                    SegmentSource::Glob(glob) => PatternSegment::glob(&glob, separator),
                    SegmentSource::Regex(regex) => PatternSegment::regex(&regex),
                })
                .transpose()
        };

        Ok(PatternEntry {
            scope: segment(self.scope, Separator::None)?,
            target: segment(self.target, Separator::Target)?,
            class: segment(self.class, Separator::Dot)?,
            method: segment(self.method, Separator::None)?,
        })
    }
}

/// 切点：包含条目与排除条目
///
/// 没有包含条目时匹配一切未被排除的连接点。
#[derive(Debug, Clone, Default)]
pub struct PointcutPattern {
    includes: Vec<PatternEntry>,
    excludes: Vec<PatternEntry>,
}

impl PointcutPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, entry: PatternEntry) -> Self {
        self.includes.push(entry);
        self
    }

    pub fn exclude(mut self, entry: PatternEntry) -> Self {
        self.excludes.push(entry);
        self
    }

    /// 解析以逗号或换行分隔的条目列表，`!` 前缀表示排除
    ///
    /// ```
    /// use trellis_aop::{JoinPoint, PointcutPattern};
    ///
    /// let pointcut = PointcutPattern::parse("bean:admin.*, !^delete*").unwrap();
    /// assert!(pointcut.matches(&JoinPoint::bean("admin.users", "demo.Users", "list")));
    /// assert!(!pointcut.matches(&JoinPoint::bean("admin.users", "demo.Users", "deleteAll")));
    /// ```
    pub fn parse(text: &str) -> ContainerResult<Self> {
        let mut pattern = Self::new();
        for item in text.split([',', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
            match item.strip_prefix('!') {
                Some(excluded) => pattern.excludes.push(PatternEntry::parse(excluded)?),
                None => {
                    let included = item.strip_prefix('+').unwrap_or(item);
                    pattern.includes.push(PatternEntry::parse(included)?);
                }
            }
        }
        Ok(pattern)
    }

    pub fn includes(&self) -> &[PatternEntry] {
        &self.includes
    }

    pub fn excludes(&self) -> &[PatternEntry] {
        &self.excludes
    }

    pub fn is_excluded(&self, join_point: &JoinPoint) -> bool {
        self.excludes.iter().any(|e| e.matches(join_point))
    }

    pub fn matches(&self, join_point: &JoinPoint) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|e| e.matches(join_point));
        included && !self.is_excluded(join_point)
    }
}

impl fmt::Display for PointcutPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .includes
            .iter()
            .map(|e| e.to_string())
            .chain(self.excludes.iter().map(|e| format!("!{}", e)))
            .collect::<Vec<_>>();
        f.write_str(&entries.join(", "))
    }
}
