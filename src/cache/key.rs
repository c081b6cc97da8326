//! Deterministic cache keys derived from a request's shape.

use std::fmt::{self, Write as _};

use serde::Serialize;

/// A primitive value identifying a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Null,
}

impl KeyPart {
    fn write_normalized(&self, out: &mut String) {
        // type tags keep "1" and 1 apart
        let _ = match self {
            KeyPart::Str(s) => write!(out, "s{}", serde_json::Value::from(s.as_str())),
            KeyPart::Int(i) => write!(out, "i{}", i),
            KeyPart::UInt(u) => write!(out, "u{}", u),
            KeyPart::Float(f) => {
                // -0.0 and 0.0 denote the same request
                let f = if *f == 0.0 { 0.0 } else { *f };
                write!(out, "f{:x}", f.to_bits())
            }
            KeyPart::Bool(b) => write!(out, "b{}", b),
            KeyPart::Null => write!(out, "n"),
        };
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Str(value.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<u64> for KeyPart {
    fn from(value: u64) -> Self {
        KeyPart::UInt(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        KeyPart::UInt(u64::from(value))
    }
}

impl From<f64> for KeyPart {
    fn from(value: f64) -> Self {
        KeyPart::Float(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyPart::Null, Into::into)
    }
}

/// Cache key: operation name plus normalized, ordered key parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(operation: &str, parts: &[KeyPart]) -> Self {
        let mut key = String::with_capacity(operation.len() + parts.len() * 8 + 2);
        key.push_str(operation);
        key.push('(');
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            part.write_normalized(&mut key);
        }
        key.push(')');
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
