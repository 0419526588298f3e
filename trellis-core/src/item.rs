//! 条目模板
//!
//! 构造参数与属性以 `ItemValue` 声明，在构造时求值。文本模板支持四种标记：
//!
//! | 标记        | 含义           |
//! |-------------|----------------|
//! | `${name}`   | 请求参数       |
//! | `@{name}`   | 请求属性       |
//! | `#{id}`     | 另一个 bean    |
//! | `%{key}`    | 环境配置项     |
//!
//! 每个标记都可以带 `:default` 后缀。只由一个标记组成的模板求值为原始值，
//! 混合文本则拼接为字符串。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::value::Value;

/// 模板求值所需的外部数据
pub trait EvaluationContext {
    /// 取得另一个 bean
    fn bean(&self, id: &str) -> anyhow::Result<Value>;

    /// 环境配置项
    fn property(&self, key: &str) -> Option<Value>;

    fn parameter(&self, _name: &str) -> Option<Value> {
        None
    }

    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// 条目值
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Value(Value),
    Bean(String),
    Property { key: String, default: Option<Value> },
    Parameter(String),
    Attribute(String),
    Text(String),
    List(Vec<ItemValue>),
    Map(BTreeMap<String, ItemValue>),
}

impl ItemValue {
    pub fn bean(id: impl Into<String>) -> Self {
        ItemValue::Bean(id.into())
    }

    pub fn text(template: impl Into<String>) -> Self {
        ItemValue::Text(template.into())
    }

    pub fn property(key: impl Into<String>) -> Self {
        ItemValue::Property {
            key: key.into(),
            default: None,
        }
    }

    pub fn property_or(key: impl Into<String>, default: impl Into<Value>) -> Self {
        ItemValue::Property {
            key: key.into(),
            default: Some(default.into()),
        }
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        ItemValue::Parameter(name.into())
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        ItemValue::Attribute(name.into())
    }

    /// 收集引用的 bean id（去重，保持出现顺序）
    pub fn collect_bean_refs(&self, ids: &mut Vec<String>) {
        match self {
            ItemValue::Bean(id) => push_unique(ids, id),
            ItemValue::Text(template) => {
                for token in tokenize(template) {
                    if let Token::Reference {
                        kind: TokenKind::Bean,
                        name,
                        ..
                    } = token
                    {
                        push_unique(ids, name);
                    }
                }
            }
            ItemValue::List(items) => {
                for item in items {
                    item.collect_bean_refs(ids);
                }
            }
            ItemValue::Map(entries) => {
                for item in entries.values() {
                    item.collect_bean_refs(ids);
                }
            }
            ItemValue::Value(_)
            | ItemValue::Property { .. }
            | ItemValue::Parameter(_)
            | ItemValue::Attribute(_) => {}
        }
    }

    /// 求值
    pub fn evaluate(&self, ctx: &dyn EvaluationContext) -> anyhow::Result<Value> {
        match self {
            ItemValue::Value(value) => Ok(value.clone()),
            ItemValue::Bean(id) => ctx.bean(id),
            ItemValue::Property { key, default } => Ok(ctx
                .property(key)
                .or_else(|| default.clone())
                .unwrap_or_default()),
            ItemValue::Parameter(name) => Ok(ctx.parameter(name).unwrap_or_default()),
            ItemValue::Attribute(name) => Ok(ctx.attribute(name).unwrap_or_default()),
            ItemValue::Text(template) => evaluate_template(template, ctx),
            ItemValue::List(items) => items
                .iter()
                .map(|item| item.evaluate(ctx))
                .collect::<anyhow::Result<Vec<_>>>()
                .map(Value::List),
            ItemValue::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), item.evaluate(ctx)?)))
                .collect::<anyhow::Result<BTreeMap<_, _>>>()
                .map(Value::Map),
        }
    }
}

impl From<Value> for ItemValue {
    fn from(value: Value) -> Self {
        ItemValue::Value(value)
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::Value(Value::from(s))
    }
}

impl From<String> for ItemValue {
    fn from(s: String) -> Self {
        ItemValue::Value(Value::from(s))
    }
}

macro_rules! item_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ItemValue {
                fn from(value: $ty) -> Self {
                    ItemValue::Value(Value::from(value))
                }
            }
        )*
    };
}

item_from_value!(i32, i64, f64, bool);

impl From<Vec<ItemValue>> for ItemValue {
    fn from(items: Vec<ItemValue>) -> Self {
        ItemValue::List(items)
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Parameter,
    Attribute,
    Bean,
    Property,
}

impl TokenKind {
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '$' => Some(TokenKind::Parameter),
            '@' => Some(TokenKind::Attribute),
            '#' => Some(TokenKind::Bean),
            '%' => Some(TokenKind::Property),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Literal(&'a str),
    Reference {
        kind: TokenKind,
        name: &'a str,
        default: Option<&'a str>,
    },
}

/// 切分模板；没有闭合 `}` 的标记按普通文本处理
fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;
    let bytes = template.as_bytes();

    while pos + 1 < bytes.len() {
        let Some(kind) =
            TokenKind::from_symbol(bytes[pos] as char).filter(|_| bytes[pos + 1] == b'{')
        else {
            pos += 1;
            continue;
        };
        let Some(close) = template[pos + 2..].find('}') else {
            break;
        };
        if literal_start < pos {
            tokens.push(Token::Literal(&template[literal_start..pos]));
        }
        let body = &template[pos + 2..pos + 2 + close];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (body.trim(), None),
        };
        tokens.push(Token::Reference {
            kind,
            name,
            default,
        });
        pos += close + 3;
        literal_start = pos;
    }

    if literal_start < template.len() {
        tokens.push(Token::Literal(&template[literal_start..]));
    }
    tokens
}

fn resolve_token(
    kind: TokenKind,
    name: &str,
    default: Option<&str>,
    ctx: &dyn EvaluationContext,
) -> anyhow::Result<Value> {
    let value = match kind {
        TokenKind::Bean => return ctx.bean(name),
        TokenKind::Parameter => ctx.parameter(name),
        TokenKind::Attribute => ctx.attribute(name),
        TokenKind::Property => ctx.property(name),
    };
    Ok(value
        .filter(|value| !value.is_null())
        .or_else(|| default.map(Value::from))
        .unwrap_or_default())
}

fn evaluate_template(template: &str, ctx: &dyn EvaluationContext) -> anyhow::Result<Value> {
    let tokens = tokenize(template);
    if let [Token::Reference {
        kind,
        name,
        default,
    }] = tokens.as_slice()
    {
        return resolve_token(*kind, name, *default, ctx);
    }

    let mut out = String::with_capacity(template.len());
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Reference {
                kind,
                name,
                default,
            } => {
                let value = resolve_token(kind, name, default, ctx)?;
                let _ = write!(out, "{}", value);
            }
        }
    }
    Ok(Value::Str(out))
}
