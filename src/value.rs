//! Values that flow through models, cells, and chains.
//!
//! A `Value` is either plain data (scalars, lists, string-keyed maps) or a
//! handle to a live `Model` or `Updatable` cell. Plain data compares
//! structurally; handles compare by identity. Cyclic structures are not
//! supported by equality or serialization.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::Model;
use crate::updatable::Updatable;

/// A dynamically typed value.
///
/// # Examples
///
/// ```
/// use notify_chain::Value;
///
/// let v = Value::from(serde_json::json!({"a": 1, "b": {"c": 2}}));
/// assert!(v.is_map());
/// assert_eq!(v.get("a"), Some(&Value::Int(1)));
/// assert_eq!(Value::Int(1), Value::Float(1.0));
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Explicit null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Handle to a live model.
    Model(Model),
    /// Handle to a live cell.
    Cell(Updatable),
}

impl Value {
    /// True for `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for a `Bool`.
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// True for an `Int`.
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// True for a `Float`.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// True for a `String`.
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// True for a `List`.
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// True for a `Map`.
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// True for a model handle.
    pub const fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// True for a cell handle.
    pub const fn is_cell(&self) -> bool {
        matches!(self, Self::Cell(_))
    }

    /// True for values a chain can step into: maps, lists, models, cells.
    pub const fn is_object(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_) | Self::Model(_) | Self::Cell(_))
    }

    /// The boolean, if this is a `Bool`.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer, if this is an `Int`.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The number as `f64`, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The string slice, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The items, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// The entries, if this is a `Map`.
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// The model handle, if this is a `Model`.
    pub const fn as_model(&self) -> Option<&Model> {
        match self {
            Self::Model(v) => Some(v),
            _ => None,
        }
    }

    /// The cell handle, if this is a `Cell`.
    pub const fn as_cell(&self) -> Option<&Updatable> {
        match self {
            Self::Cell(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Builds a map value from key/value pairs.
    pub fn map_of<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Model(_) => "model",
            Self::Cell(_) => "cell",
        }
    }

    /// One-level union: keys from `incoming` replace same-named keys, other
    /// keys survive. Anything other than map-onto-map is replaced.
    #[must_use]
    pub fn shallow_merge(&self, incoming: &Value) -> Value {
        match (self, incoming) {
            (Self::Map(current), Self::Map(next)) => {
                let mut out = current.clone();
                for (k, v) in next {
                    out.insert(k.clone(), v.clone());
                }
                Self::Map(out)
            }
            _ => incoming.clone(),
        }
    }

    /// Recursive union: nested maps merge instead of being replaced, lists
    /// concatenate, anything else is replaced by `incoming`.
    #[must_use]
    pub fn deep_merge(&self, incoming: &Value) -> Value {
        match (self, incoming) {
            (Self::Map(current), Self::Map(next)) => {
                let mut out = current.clone();
                for (k, v) in next {
                    let merged = match out.get(k) {
                        Some(existing) => existing.deep_merge(v),
                        None => v.clone(),
                    };
                    out.insert(k.clone(), merged);
                }
                Self::Map(out)
            }
            (Self::List(current), Self::List(next)) => {
                Self::List(current.iter().chain(next.iter()).cloned().collect())
            }
            _ => incoming.clone(),
        }
    }

    /// Converts to JSON. Models become objects of their current fields,
    /// cells their current value (or null).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::String(v) => Json::String(v.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Self::Model(model) => {
                Json::Object(model.snapshot().iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Self::Cell(cell) => cell.peek().map_or(Json::Null, |v| v.to_json()),
        }
    }
}

/// NaN equals NaN, so repeated NaN writes collapse like any other value.
/// Integers and floats are equal only when the float is exactly that integer.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => int_equals_float(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Model(a), Self::Model(b)) => a.ptr_eq(b),
            (Self::Cell(a), Self::Cell(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::float_cmp)]
fn int_equals_float(int: i64, float: f64) -> bool {
    // [-2^63, 2^63) is exactly the range that converts to i64 without saturating.
    float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 && float as i64 == int
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
            Self::Model(model) => write!(f, "model:{}", model.type_name()),
            Self::Cell(_) => write!(f, "cell"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(v) => serializer.serialize_str(v),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => serialize_fields(map, serializer),
            Self::Model(model) => serialize_fields(&model.snapshot(), serializer),
            Self::Cell(cell) => match cell.peek() {
                Some(v) => v.serialize(serializer),
                None => serializer.serialize_unit(),
            },
        }
    }
}

fn serialize_fields<S: Serializer>(fields: &BTreeMap<String, Value>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (k, v) in fields {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<Model> for Value {
    fn from(v: Model) -> Self {
        Self::Model(v)
    }
}

impl From<&Model> for Value {
    fn from(v: &Model) -> Self {
        Self::Model(v.clone())
    }
}

impl From<Updatable> for Value {
    fn from(v: Updatable) -> Self {
        Self::Cell(v)
    }
}

impl From<&Updatable> for Value {
    fn from(v: &Updatable) -> Self {
        Self::Cell(v.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match v {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_value_scalars() {
        assert!(Value::Bool(true).is_bool());
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert!(Value::default().is_null());
        assert_eq!(Value::Int(4).type_name(), "int");
    }

    #[test]
    fn test_value_objects() {
        let val = v(json!({"key": [1, 2]}));
        assert!(val.is_object());
        assert!(!Value::Int(1).is_object());
        assert_eq!(val.get("key").and_then(Value::as_list).map(<[Value]>::len), Some(2));
        assert_eq!(val.type_name(), "map");
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(v(json!({"a": {"b": [1, 2]}})), v(json!({"a": {"b": [1, 2]}})));
        assert_ne!(v(json!({"a": {"b": [1, 2]}})), v(json!({"a": {"b": [2, 1]}})));
        assert_ne!(Value::Null, Value::Bool(false));
    }

    #[test]
    fn test_nan_equals_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(f64::NAN), Value::Float(0.0));
        assert_eq!(v(json!([1.5])), Value::List(vec![Value::Float(1.5)]));
    }

    #[test]
    fn test_int_float_equality_is_exact() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));

        let big = (1_i64 << 53) + 1;
        assert_ne!(Value::Int(big), Value::Float((1_i64 << 53) as f64));
        assert_ne!(Value::Int(i64::MAX), Value::Float(i64::MAX as f64));
        assert_ne!(Value::Int(0), Value::Float(f64::NAN));
    }

    #[test]
    fn test_shallow_merge_replaces_nested() {
        let merged = v(json!({"a": 1, "b": {"c": 2}})).shallow_merge(&v(json!({"b": {"d": 4}})));
        assert_eq!(merged, v(json!({"a": 1, "b": {"d": 4}})));
    }

    #[test]
    fn test_deep_merge_unions_nested() {
        let merged = v(json!({"a": 1, "b": {"c": 2}})).deep_merge(&v(json!({"b": {"d": 4}})));
        assert_eq!(merged, v(json!({"a": 1, "b": {"c": 2, "d": 4}})));
    }

    #[test]
    fn test_deep_merge_concatenates_lists() {
        let merged = v(json!({"xs": [1]})).deep_merge(&v(json!({"xs": [2]})));
        assert_eq!(merged, v(json!({"xs": [1, 2]})));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Int(42)), "42");
        assert_eq!(format!("{}", Value::from("hi")), "\"hi\"");
        assert_eq!(format!("{}", v(json!({"a": 1}))), "{\"a\":1}");
    }

    #[test]
    fn test_value_serialization() {
        let val = v(json!({"title": "foo", "tags": ["x"], "done": false}));
        let text = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(val, back);
        assert_eq!(val.to_json(), json!({"title": "foo", "tags": ["x"], "done": false}));
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,6}".prop_map(Value::String),
        ]
    }

    fn flat_map() -> impl Strategy<Value = BTreeMap<String, Value>> {
        prop::collection::btree_map("[a-d]", scalar(), 0..4)
    }

    proptest! {
        #[test]
        fn prop_shallow_merge_keeps_incoming_keys(a in flat_map(), b in flat_map()) {
            let merged = Value::Map(a.clone()).shallow_merge(&Value::Map(b.clone()));
            let merged = merged.as_map().unwrap();
            for (k, val) in &b {
                prop_assert_eq!(merged.get(k), Some(val));
            }
            for (k, val) in &a {
                if !b.contains_key(k) {
                    prop_assert_eq!(merged.get(k), Some(val));
                }
            }
        }

        #[test]
        fn prop_flat_maps_merge_the_same_either_way(a in flat_map(), b in flat_map()) {
            let shallow = Value::Map(a.clone()).shallow_merge(&Value::Map(b.clone()));
            let deep = Value::Map(a).deep_merge(&Value::Map(b));
            prop_assert_eq!(shallow, deep);
        }

        #[test]
        fn prop_equality_is_reflexive(a in flat_map()) {
            let val = Value::Map(a);
            prop_assert_eq!(val.clone(), val);
        }
    }
}
