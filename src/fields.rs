//! Contextual fields attached to observations and their log records.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::telemetry::AttributeValue;

/// A field value. Strings, booleans and integers are mirrored onto spans;
/// the remaining variants only travel with log records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Json(serde_json::Value),
}

impl FieldValue {
    /// Capture any `Debug` value as a log-only field.
    pub fn debug<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Self::Json(serde_json::Value::String(format!("{value:?}")))
    }

    /// The span attribute for this value, if its type is supported.
    ///
    /// Unsigned values above `i64::MAX` have no lossless attribute form and
    /// are dropped like unsupported types.
    pub fn as_attribute(&self) -> Option<AttributeValue> {
        match self {
            Self::Str(s) => Some(AttributeValue::Str(s.clone())),
            Self::Bool(b) => Some(AttributeValue::Bool(*b)),
            Self::I64(i) => Some(AttributeValue::Int(*i)),
            Self::U64(u) => i64::try_from(*u).ok().map(AttributeValue::Int),
            Self::F64(_) | Self::Json(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::I64(i) => write!(f, "{i}"),
            Self::U64(u) => write!(f, "{u}"),
            Self::F64(x) => write!(f, "{x}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! field_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

field_from!(Str: String, &str);
field_from!(Bool: bool);
field_from!(I64: i8, i16, i32, i64);
field_from!(U64: u8, u16, u32, u64);
field_from!(F64: f32, f64);
field_from!(Json: serde_json::Value);

impl From<isize> for FieldValue {
    fn from(value: isize) -> Self {
        Self::I64(value as i64)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        Self::U64(value as u64)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

/// Key/value fields. Insertion order is irrelevant; the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(HashMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render as a JSON object for text-only log backends.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_types_become_attributes() {
        assert_eq!(FieldValue::from("a").as_attribute(), Some(AttributeValue::Str("a".into())));
        assert_eq!(FieldValue::from(true).as_attribute(), Some(AttributeValue::Bool(true)));
        assert_eq!(FieldValue::from(-3i32).as_attribute(), Some(AttributeValue::Int(-3)));
        assert_eq!(FieldValue::from(7u32).as_attribute(), Some(AttributeValue::Int(7)));
    }

    #[test]
    fn unsupported_types_are_log_only() {
        assert_eq!(FieldValue::from(1.5f64).as_attribute(), None);
        assert_eq!(FieldValue::debug(&vec![1, 2]).as_attribute(), None);
        assert_eq!(FieldValue::from(u64::MAX).as_attribute(), None);
    }

    #[test]
    fn last_write_wins() {
        let mut fields = Fields::new();
        fields.insert("k", "v1");
        fields.insert("k", "v2");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("k"), Some(&FieldValue::Str("v2".into())));
    }

    #[test]
    fn json_rendering() {
        let fields: Fields = [("user_id", 42)].into_iter().collect();
        assert_eq!(fields.to_json(), r#"{"user_id":42}"#);
    }
}
