//! Dynamic value model for action arguments and reply payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// String-keyed map of dynamic values, ordered by key.
pub type VariantMap = BTreeMap<String, Value>;

/// Deepest list/map nesting accepted when decoding a [`Value`].
pub const MAX_VALUE_DEPTH: usize = 64;

/// A dynamically typed value.
///
/// Decoding rejects values nested deeper than [`MAX_VALUE_DEPTH`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Value>),
    Map(VariantMap),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats; floats are returned as-is.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&VariantMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert into JSON for display. Byte blobs become arrays of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => map_to_json(m),
        }
    }
}

const VARIANTS: &[&str] = &[
    "Null", "Bool", "Int", "Float", "String", "Bytes", "List", "Map",
];

#[derive(Clone, Copy)]
enum Tag {
    Null,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    List,
    Map,
}

const TAGS: [Tag; 8] = [
    Tag::Null,
    Tag::Bool,
    Tag::Int,
    Tag::Float,
    Tag::String,
    Tag::Bytes,
    Tag::List,
    Tag::Map,
];

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = Tag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a value variant")
            }

            fn visit_u64<E: de::Error>(self, index: u64) -> Result<Tag, E> {
                usize::try_from(index)
                    .ok()
                    .and_then(|i| TAGS.get(i).copied())
                    .ok_or_else(|| {
                        E::invalid_value(de::Unexpected::Unsigned(index), &"variant index 0..8")
                    })
            }

            fn visit_str<E: de::Error>(self, name: &str) -> Result<Tag, E> {
                VARIANTS
                    .iter()
                    .position(|v| *v == name)
                    .map(|i| TAGS[i])
                    .ok_or_else(|| E::unknown_variant(name, VARIANTS))
            }
        }

        deserializer.deserialize_identifier(TagVisitor)
    }
}

/// Decodes one [`Value`] found `depth` levels below the outermost one.
#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl ValueSeed {
    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        if self.depth > MAX_VALUE_DEPTH {
            return Err(de::Error::custom(format_args!(
                "value nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        deserializer.deserialize_enum("Value", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (tag, variant) = data.variant::<Tag>()?;
        Ok(match tag {
            Tag::Null => {
                variant.unit_variant()?;
                Value::Null
            }
            Tag::Bool => Value::Bool(variant.newtype_variant()?),
            Tag::Int => Value::Int(variant.newtype_variant()?),
            Tag::Float => Value::Float(variant.newtype_variant()?),
            Tag::String => Value::String(variant.newtype_variant()?),
            Tag::Bytes => {
                Value::Bytes(variant.newtype_variant::<serde_bytes::ByteBuf>()?.into_vec())
            }
            Tag::List => Value::List(variant.newtype_variant_seed(ListSeed(self.nested()))?),
            Tag::Map => Value::Map(variant.newtype_variant_seed(MapSeed(self.nested()))?),
        })
    }
}

struct ListSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for ListSeed {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Value>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Value>, A::Error> {
        // Length hints come from the peer; cap the preallocation.
        let mut list = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(value) = seq.next_element_seed(self.0)? {
            list.push(value);
        }
        Ok(list)
    }
}

struct MapSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for MapSeed {
    type Value = VariantMap;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<VariantMap, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MapSeed {
    type Value = VariantMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<VariantMap, A::Error> {
        let mut map = VariantMap::new();
        while let Some(key) = access.next_key::<String>()? {
            let value = access.next_value_seed(self.0)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueSeed { depth: 0 }.deserialize(deserializer)
    }
}

/// Convert a whole map into a JSON object.
pub fn map_to_json(map: &VariantMap) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Convert a JSON object into a map. Non-object input yields `None`.
pub fn map_from_json(json: serde_json::Value) -> Option<VariantMap> {
    match Value::from(json) {
        Value::Map(m) => Some(m),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<VariantMap> for Value {
    fn from(m: VariantMap) -> Self {
        Value::Map(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_match_variant() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(7_i64).as_i64(), Some(7));
        assert_eq!(Value::from(7_i64).as_f64(), Some(7.0));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(vec![1_u8, 2]).as_bytes(), Some(&[1_u8, 2][..]));
        assert!(Value::from("x").as_i64().is_none());
        assert!(Value::Null.is_null());
    }

    #[test]
    fn json_numbers_prefer_integers() {
        assert_eq!(Value::from(json!(42)), Value::Int(42));
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
    }

    #[test]
    fn json_object_becomes_nested_map() {
        let map = map_from_json(json!({"a": {"b": [1, "two", false]}})).unwrap();
        let inner = map["a"].as_map().unwrap();
        assert_eq!(
            inner["b"],
            Value::List(vec![Value::Int(1), Value::from("two"), Value::Bool(false)])
        );
        assert_eq!(map_to_json(&map), json!({"a": {"b": [1, "two", false]}}));
    }

    #[test]
    fn nested_values_survive_the_wire() {
        let mut inner = VariantMap::new();
        inner.insert("blob".to_string(), Value::Bytes(vec![0, 255]));
        inner.insert("f".to_string(), Value::Float(0.5));
        let mut map = VariantMap::new();
        map.insert(
            "list".to_string(),
            Value::List(vec![Value::Null, Value::Map(inner), Value::from("s")]),
        );
        map.insert("n".to_string(), Value::Int(-3));

        let decoded = crate::wire::decode_map(&crate::wire::encode_map(&map).unwrap()).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn nesting_up_to_the_limit_decodes() {
        let mut value = Value::Null;
        for _ in 0..MAX_VALUE_DEPTH {
            value = Value::List(vec![value]);
        }
        let bytes = crate::wire::encode(&value).unwrap();
        assert_eq!(crate::wire::decode::<Value>(&bytes).unwrap(), value);

        let too_deep = Value::List(vec![value]);
        let bytes = crate::wire::encode(&too_deep).unwrap();
        assert!(crate::wire::decode::<Value>(&bytes).is_err());
    }

    #[test]
    fn non_object_json_is_not_a_map() {
        assert!(map_from_json(json!([1, 2])).is_none());
    }
}
