//! Serializable predicates for relay filter doors.
//!
//! A [`Condition`] is a small tagged AST: comparisons, boolean combinators
//! and member access over the message (or its payload). It is built once at
//! definition time, stored with the door definition, and interpreted for
//! every message the door examines.
//!
//! Construction is where unsupported shapes are rejected. Member paths on
//! the message must name real message fields, constants must serialize,
//! and function calls must name a known [`Function`]. Anything else fails
//! with [`ConditionError::NotSupported`] before the definition exists.
//!
//! ```ignore
//! let condition = Condition::compare(
//!     Operand::payload("value"),
//!     CompareOp::Gt,
//!     Operand::constant(&10)?,
//! )
//! .and(Condition::compare(
//!     Operand::message("from.source_name")?,
//!     CompareOp::StartsWith,
//!     Operand::constant(&"price")?,
//! ));
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::message::SignalMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("not supported in a relay condition: {0}")]
    NotSupported(String),
}

// =============================================================================
// AST
// =============================================================================

/// Where a member path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRoot {
    /// The whole [`SignalMessage`].
    Message,
    /// The payload data the filter was declared over.
    Payload,
}

/// Built-in functions callable from a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Len,
    Lowercase,
    Uppercase,
    IsNull,
}

impl Function {
    pub fn from_name(name: &str) -> Result<Self, ConditionError> {
        match name {
            "len" => Ok(Function::Len),
            "lowercase" => Ok(Function::Lowercase),
            "uppercase" => Ok(Function::Uppercase),
            "is_null" => Ok(Function::IsNull),
            other => Err(ConditionError::NotSupported(format!(
                "function '{}' is not a known condition function",
                other
            ))),
        }
    }

    fn apply(self, value: &Value) -> Value {
        match (self, value) {
            (Function::Len, Value::String(s)) => Value::from(s.chars().count()),
            (Function::Len, Value::Array(items)) => Value::from(items.len()),
            (Function::Len, Value::Object(map)) => Value::from(map.len()),
            (Function::Lowercase, Value::String(s)) => Value::String(s.to_lowercase()),
            (Function::Uppercase, Value::String(s)) => Value::String(s.to_uppercase()),
            (Function::IsNull, v) => Value::Bool(v.is_null()),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    Member { root: MemberRoot, path: Vec<String> },
    Constant { value: Value },
    Call { function: Function, argument: Box<Operand> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Constant {
        value: bool,
    },
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    Truthy {
        operand: Operand,
    },
}

// =============================================================================
// Construction
// =============================================================================

const MESSAGE_FIELDS: &[&str] = &["uid", "emitted_at", "from"];

const SOURCE_FIELDS: &[&str] = &[
    "signal_uid",
    "source_definition_uid",
    "source_name",
    "is_door",
    "emitted_at",
    "sender",
    "metadata",
    "origins",
    "payload",
];

const PAYLOAD_FIELDS: &[&str] = &["carry_type", "data"];

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_message_path(path: &[String]) -> Result<(), ConditionError> {
    let unknown = |segment: &str| {
        ConditionError::NotSupported(format!(
            "'{}' is not a member of the signal message ({})",
            segment,
            path.join(".")
        ))
    };

    let Some(first) = path.first() else {
        return Ok(());
    };
    if !MESSAGE_FIELDS.contains(&first.as_str()) {
        return Err(unknown(first));
    }
    if first != "from" {
        return match path.get(1) {
            Some(extra) => Err(unknown(extra)),
            None => Ok(()),
        };
    }

    let Some(field) = path.get(1) else {
        return Ok(());
    };
    if !SOURCE_FIELDS.contains(&field.as_str()) {
        return Err(unknown(field));
    }
    // metadata keys and origins entries are open-ended.
    if field == "payload" {
        if let Some(inner) = path.get(2) {
            if !PAYLOAD_FIELDS.contains(&inner.as_str()) {
                return Err(unknown(inner));
            }
        }
    }
    Ok(())
}

impl Operand {
    /// Member of the message, e.g. `"from.source_name"` or
    /// `"from.metadata.tenant"`.
    pub fn message(path: &str) -> Result<Self, ConditionError> {
        let path = split_path(path);
        check_message_path(&path)?;
        Ok(Operand::Member {
            root: MemberRoot::Message,
            path,
        })
    }

    /// Member of the payload data. An empty path is the whole payload.
    pub fn payload(path: &str) -> Self {
        Operand::Member {
            root: MemberRoot::Payload,
            path: split_path(path),
        }
    }

    /// A constant captured by value.
    pub fn constant<T: Serialize + ?Sized>(value: &T) -> Result<Self, ConditionError> {
        let value = serde_json::to_value(value).map_err(|e| {
            ConditionError::NotSupported(format!("constant cannot be captured: {}", e))
        })?;
        Ok(Operand::Constant { value })
    }

    pub fn call(function: &str, argument: Operand) -> Result<Self, ConditionError> {
        Ok(Operand::Call {
            function: Function::from_name(function)?,
            argument: Box::new(argument),
        })
    }

    fn validate(&self) -> Result<(), ConditionError> {
        match self {
            Operand::Member {
                root: MemberRoot::Message,
                path,
            } => check_message_path(path),
            Operand::Member { .. } | Operand::Constant { .. } => Ok(()),
            Operand::Call { argument, .. } => argument.validate(),
        }
    }

    fn resolve<'a>(&'a self, view: &'a MessageView<'a>) -> Cow<'a, Value> {
        match self {
            Operand::Member { root, path } => {
                let start = match root {
                    MemberRoot::Message => Some(&view.message),
                    MemberRoot::Payload => view.payload,
                };
                match start.and_then(|v| walk(v, path)) {
                    Some(found) => Cow::Borrowed(found),
                    None => Cow::Owned(Value::Null),
                }
            }
            Operand::Constant { value } => Cow::Borrowed(value),
            Operand::Call { function, argument } => {
                Cow::Owned(function.apply(argument.resolve(view).as_ref()))
            }
        }
    }
}

impl Condition {
    pub fn always() -> Self {
        Condition::Constant { value: true }
    }

    pub fn never() -> Self {
        Condition::Constant { value: false }
    }

    pub fn compare(left: Operand, op: CompareOp, right: Operand) -> Self {
        Condition::Compare { left, op, right }
    }

    pub fn truthy(operand: Operand) -> Self {
        Condition::Truthy { operand }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::All { mut conditions } => {
                conditions.push(other);
                Condition::All { conditions }
            }
            first => Condition::All {
                conditions: vec![first, other],
            },
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Any { mut conditions } => {
                conditions.push(other);
                Condition::Any { conditions }
            }
            first => Condition::Any {
                conditions: vec![first, other],
            },
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Condition::Not {
            condition: Box::new(self),
        }
    }

    /// Re-check a condition that did not come from the constructors
    /// (deserialized or built from struct literals).
    pub fn validate(&self) -> Result<(), ConditionError> {
        match self {
            Condition::Constant { .. } => Ok(()),
            Condition::Compare { left, right, .. } => {
                left.validate()?;
                right.validate()
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                conditions.iter().try_for_each(Condition::validate)
            }
            Condition::Not { condition } => condition.validate(),
            Condition::Truthy { operand } => operand.validate(),
        }
    }

    /// Evaluate against `message`, with `payload` bound to the payload root.
    pub fn evaluate(&self, message: &SignalMessage, payload: Option<&Value>) -> bool {
        let view = MessageView {
            message: serde_json::to_value(message).unwrap_or(Value::Null),
            payload,
        };
        self.eval(&view)
    }

    fn eval(&self, view: &MessageView<'_>) -> bool {
        match self {
            Condition::Constant { value } => *value,
            Condition::Compare { left, op, right } => {
                compare(left.resolve(view).as_ref(), *op, right.resolve(view).as_ref())
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.eval(view)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.eval(view)),
            Condition::Not { condition } => !condition.eval(view),
            Condition::Truthy { operand } => truthy(operand.resolve(view).as_ref()),
        }
    }
}

// =============================================================================
// Interpretation
// =============================================================================

struct MessageView<'a> {
    message: Value,
    payload: Option<&'a Value>,
}

fn walk<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))
}

/// Integers compare exactly; only a float on either side goes through `f64`.
fn compare_numbers(left: &Number, right: &Number) -> Option<std::cmp::Ordering> {
    match (as_integer(left), as_integer(right)) {
        (Some(l), Some(r)) => Some(l.cmp(&r)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r) == Some(std::cmp::Ordering::Equal),
        _ => left == right,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = || -> Option<Ordering> {
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            _ => None,
        }
    };

    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => ordering() == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering() == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        CompareOp::StartsWith => match (left, right) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
    }
}
