//! Value types carried by requests, responses and result trees
//!
//! This module defines:
//! - NValue: tagged union over every reply shape a backend can produce
//! - ValueType: the tag alone, used when asking a backend to load a key
//!
//! ## Type Rules
//!
//! - Different tags are never equal: `Integer(1) != Double(1.0)`
//! - `Double` uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - `Set` compares as a sequence; backends that do not preserve member
//!   order must sort before comparing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of an [`NValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// No value (missing key, nil reply)
    Null,
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// Ordered list
    Array,
    /// Unordered unique members
    Set,
    /// Members ordered by score
    ZSet,
    /// Field/value map
    Hash,
}

impl ValueType {
    /// Lowercase name as reported by `TYPE`-style commands.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "none",
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::Array => "list",
            ValueType::Set => "set",
            ValueType::ZSet => "zset",
            ValueType::Hash => "hash",
        }
    }

    /// Parse a backend type name (`string`, `list`, `set`, `zset`, `hash`, `none`).
    ///
    /// Unknown names map to [`ValueType::String`].
    pub fn from_name(name: &str) -> ValueType {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => ValueType::Null,
            "list" | "array" => ValueType::Array,
            "set" => ValueType::Set,
            "zset" => ValueType::ZSet,
            "hash" => ValueType::Hash,
            "integer" => ValueType::Integer,
            "double" => ValueType::Double,
            "boolean" => ValueType::Boolean,
            _ => ValueType::String,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value read from or written to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NValue {
    /// Absent value
    Null,
    /// UTF-8 string
    String(String),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float (IEEE-754)
    Double(f64),
    /// Boolean
    Boolean(bool),
    /// Ordered list of values
    Array(Vec<NValue>),
    /// Set members
    Set(Vec<NValue>),
    /// Ordered set as `(member, score)` pairs
    ZSet(Vec<(String, f64)>),
    /// Hash as `(field, value)` pairs in insertion order
    Hash(Vec<(String, String)>),
}

impl PartialEq for NValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NValue::Null, NValue::Null) => true,
            (NValue::String(a), NValue::String(b)) => a == b,
            (NValue::Integer(a), NValue::Integer(b)) => a == b,
            // IEEE-754: NaN != NaN, -0.0 == 0.0
            (NValue::Double(a), NValue::Double(b)) => a == b,
            (NValue::Boolean(a), NValue::Boolean(b)) => a == b,
            (NValue::Array(a), NValue::Array(b)) => a == b,
            (NValue::Set(a), NValue::Set(b)) => a == b,
            (NValue::ZSet(a), NValue::ZSet(b)) => a == b,
            (NValue::Hash(a), NValue::Hash(b)) => a == b,
            _ => false,
        }
    }
}

impl NValue {
    /// Tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            NValue::Null => ValueType::Null,
            NValue::String(_) => ValueType::String,
            NValue::Integer(_) => ValueType::Integer,
            NValue::Double(_) => ValueType::Double,
            NValue::Boolean(_) => ValueType::Boolean,
            NValue::Array(_) => ValueType::Array,
            NValue::Set(_) => ValueType::Set,
            NValue::ZSet(_) => ValueType::ZSet,
            NValue::Hash(_) => ValueType::Hash,
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, NValue::Null)
    }

    /// True for every multi-element tag.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            NValue::Array(_) | NValue::Set(_) | NValue::ZSet(_) | NValue::Hash(_)
        )
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read an integer, parsing string payloads.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            NValue::Integer(i) => Some(*i),
            NValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the elements of an array or set.
    pub fn as_array(&self) -> Option<&[NValue]> {
        match self {
            NValue::Array(items) | NValue::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Flatten into the argument words a command line would carry.
    ///
    /// Scalars yield one word, arrays and sets one word per element,
    /// ordered sets `score member` pairs and hashes `field value` pairs.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            NValue::Null => Vec::new(),
            NValue::Array(items) | NValue::Set(items) => {
                items.iter().map(|v| v.to_string()).collect()
            }
            NValue::ZSet(members) => members
                .iter()
                .flat_map(|(member, score)| [format_double(*score), member.clone()])
                .collect(),
            NValue::Hash(fields) => fields
                .iter()
                .flat_map(|(field, value)| [field.clone(), value.clone()])
                .collect(),
            scalar => vec![scalar.to_string()],
        }
    }

    /// Coerce a raw reply into `ty`.
    ///
    /// Protocol replies arrive as strings and flat arrays. Hash replies are
    /// `field value` pairs, ordered-set replies `member score` pairs. Values
    /// that already carry the requested tag pass through unchanged; anything
    /// that cannot be coerced is returned as-is.
    pub fn coerce(self, ty: ValueType) -> NValue {
        if self.value_type() == ty {
            return self;
        }
        match (ty, self) {
            (ValueType::Array, NValue::Set(items)) => NValue::Array(items),
            (ValueType::Set, NValue::Array(items)) => NValue::Set(items),
            (ValueType::Hash, NValue::Array(items)) if items.len() % 2 == 0 => NValue::Hash(
                items
                    .chunks(2)
                    .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                    .collect(),
            ),
            (ValueType::ZSet, NValue::Array(items)) if items.len() % 2 == 0 => {
                let members: Option<Vec<(String, f64)>> = items
                    .chunks(2)
                    .map(|pair| {
                        let score = pair[1].to_string().parse::<f64>().ok()?;
                        Some((pair[0].to_string(), score))
                    })
                    .collect();
                match members {
                    Some(members) => NValue::ZSet(members),
                    None => NValue::Array(items),
                }
            }
            (ValueType::Integer, NValue::String(s)) => match s.trim().parse() {
                Ok(i) => NValue::Integer(i),
                Err(_) => NValue::String(s),
            },
            (ValueType::Double, NValue::String(s)) => match s.trim().parse() {
                Ok(d) => NValue::Double(d),
                Err(_) => NValue::String(s),
            },
            (ValueType::Boolean, NValue::String(s)) => match s.as_str() {
                "true" => NValue::Boolean(true),
                "false" => NValue::Boolean(false),
                _ => NValue::String(s),
            },
            (ValueType::String, value) if !value.is_collection() && !value.is_null() => {
                NValue::String(value.to_string())
            }
            (_, value) => value,
        }
    }
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.is_finite() && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        d.to_string()
    }
}

/// Elements of collections are joined by a single space.
impl fmt::Display for NValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NValue::Null => f.write_str("(nil)"),
            NValue::String(s) => f.write_str(s),
            NValue::Integer(i) => write!(f, "{}", i),
            NValue::Double(d) => f.write_str(&format_double(*d)),
            NValue::Boolean(b) => write!(f, "{}", b),
            _ => f.write_str(&self.to_args().join(" ")),
        }
    }
}

impl From<&str> for NValue {
    fn from(s: &str) -> Self {
        NValue::String(s.to_string())
    }
}

impl From<String> for NValue {
    fn from(s: String) -> Self {
        NValue::String(s)
    }
}

impl From<i64> for NValue {
    fn from(i: i64) -> Self {
        NValue::Integer(i)
    }
}

impl From<f64> for NValue {
    fn from(d: f64) -> Self {
        NValue::Double(d)
    }
}

impl From<bool> for NValue {
    fn from(b: bool) -> Self {
        NValue::Boolean(b)
    }
}

impl From<Vec<NValue>> for NValue {
    fn from(items: Vec<NValue>) -> Self {
        NValue::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_tags_never_equal() {
        assert_ne!(NValue::Integer(1), NValue::Double(1.0));
        assert_ne!(NValue::String("1".into()), NValue::Integer(1));
        assert_ne!(
            NValue::Array(vec!["a".into()]),
            NValue::Set(vec!["a".into()])
        );
    }

    #[test]
    fn test_double_ieee_equality() {
        assert_ne!(NValue::Double(f64::NAN), NValue::Double(f64::NAN));
        assert_eq!(NValue::Double(-0.0), NValue::Double(0.0));
    }

    #[test]
    fn test_display_joins_with_space() {
        let v = NValue::Array(vec!["a".into(), NValue::Integer(2), "c".into()]);
        assert_eq!(v.to_string(), "a 2 c");
        assert_eq!(NValue::Null.to_string(), "(nil)");
        assert_eq!(NValue::Double(3.0).to_string(), "3");
        assert_eq!(NValue::Double(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_to_args_for_zset_and_hash() {
        let z = NValue::ZSet(vec![("a".into(), 1.0), ("b".into(), 2.5)]);
        assert_eq!(z.to_args(), vec!["1", "a", "2.5", "b"]);

        let h = NValue::Hash(vec![("f".into(), "v".into())]);
        assert_eq!(h.to_args(), vec!["f", "v"]);
    }

    #[test]
    fn test_coerce_flat_reply_to_hash() {
        let reply = NValue::Array(vec!["f1".into(), "v1".into(), "f2".into(), "v2".into()]);
        assert_eq!(
            reply.coerce(ValueType::Hash),
            NValue::Hash(vec![
                ("f1".into(), "v1".into()),
                ("f2".into(), "v2".into())
            ])
        );
    }

    #[test]
    fn test_coerce_flat_reply_to_zset() {
        let reply = NValue::Array(vec!["m".into(), "1.5".into()]);
        assert_eq!(
            reply.coerce(ValueType::ZSet),
            NValue::ZSet(vec![("m".into(), 1.5)])
        );
    }

    #[test]
    fn test_coerce_bad_zset_score_is_unchanged() {
        let reply = NValue::Array(vec!["m".into(), "high".into()]);
        assert_eq!(reply.clone().coerce(ValueType::ZSet), reply);
    }

    #[test]
    fn test_coerce_scalars() {
        assert_eq!(NValue::from("42").coerce(ValueType::Integer), NValue::Integer(42));
        assert_eq!(NValue::from("x").coerce(ValueType::Integer), NValue::from("x"));
        assert_eq!(NValue::Integer(7).coerce(ValueType::String), NValue::from("7"));
        assert_eq!(NValue::from("true").coerce(ValueType::Boolean), NValue::Boolean(true));
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::from_name("list"), ValueType::Array);
        assert_eq!(ValueType::from_name("ZSET\r\n"), ValueType::ZSet);
        assert_eq!(ValueType::from_name("weird"), ValueType::String);
        assert_eq!(ValueType::Hash.to_string(), "hash");
    }

    #[test]
    fn test_serde_round_trip() {
        let v = NValue::Hash(vec![("a".into(), "b".into())]);
        let json = serde_json::to_string(&v).unwrap();
        let back: NValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
