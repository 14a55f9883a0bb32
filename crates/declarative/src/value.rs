//! Attribute values and resource references

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A dynamically typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Borrow the value as a string, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a boolean.
    ///
    /// Accepts real booleans and the strings "true"/"false".
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s == "true" => Some(true),
            Self::String(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    /// Flatten the value into a list of strings.
    ///
    /// Scalars become single-element lists.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.iter().map(ToString::to_string).collect(),
            other => vec![other.to_string()],
        }
    }

    /// Equality that treats `true` and `"true"` alike
    pub fn loosely_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self.as_bool(), other.as_bool()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Self::List(a), Self::List(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
                }
                _ => self.to_string() == other.to_string(),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::String(s) => write!(f, "{}", s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Attribute name to value, ordered for deterministic output
pub type Attributes = BTreeMap<String, Value>;

/// A reference to a resource instance, written `Type[name]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Lowercase type name
    pub type_name: String,
    /// Instance name (title)
    pub name: String,
}

impl ResourceRef {
    pub fn new(type_name: &str, name: &str) -> Self {
        Self {
            type_name: type_name.to_lowercase(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.type_name.chars();
        let type_name = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        write!(f, "{}[{}]", type_name, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (type_name, rest) = s
            .split_once('[')
            .ok_or_else(|| format!("invalid resource reference '{}'", s))?;
        let name = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("invalid resource reference '{}'", s))?;

        if type_name.is_empty() || name.is_empty() {
            return Err(format!("invalid resource reference '{}'", s));
        }

        Ok(Self::new(type_name, name))
    }
}
