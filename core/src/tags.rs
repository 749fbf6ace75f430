use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// string -> scalar map attached to every entity
pub type Tags = BTreeMap<String, TagValue>;

/// Scalar tag value. Tag equality is loose: both sides are compared through
/// their string rendering so `Int(3)` matches a `"3"` read back from disk.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Loose equality through the string rendering.
    pub fn matches(&self, other: &TagValue) -> bool {
        self.to_string() == other.to_string()
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for TagValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&serde_json::Value> for TagValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Build a one-entry tag delta, the usual return value of a sweep callback.
pub fn tag(key: impl Into<String>, value: impl Into<TagValue>) -> Tags {
    let mut tags = Tags::new();
    tags.insert(key.into(), value.into());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_equality_stringifies() {
        assert_eq!(TagValue::Int(3), TagValue::Text("3".into()));
        assert_eq!(TagValue::Bool(true), TagValue::Text("true".into()));
        assert_ne!(TagValue::Int(3), TagValue::Text("3.0".into()));
    }

    #[test]
    fn json_scalars_map_over() {
        assert_eq!(TagValue::from(&serde_json::json!(7)), TagValue::Int(7));
        assert_eq!(
            TagValue::from(&serde_json::json!("x")),
            TagValue::Text("x".into())
        );
    }

    #[test]
    fn tag_builds_single_entry() {
        let tags = tag("Run_Number", 4);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["Run_Number"], TagValue::Int(4));
    }
}
