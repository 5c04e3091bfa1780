//! Typed values and nullable attribute values
//!
//! [`Value`] is the closed set of primitive data an attribute can hold.
//! [`NullableValue`] binds a value to one attribute and distinguishes three
//! states: unset (nothing supplied), explicit null (the literal `null`), and
//! valid (parsed data of the attribute's type).

use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::attribute::{Attribute, AttributeType, DATE_FORMAT};

/// A primitive value of one of the catalog's types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Date(NaiveDate),
    /// Presence of a flag attribute
    Flag,
}

impl Value {
    /// The attribute type this value satisfies
    #[must_use]
    pub const fn kind(&self) -> AttributeType {
        match self {
            Self::Int(_) => AttributeType::Int,
            Self::Uint(_) => AttributeType::Uint,
            Self::Float(_) => AttributeType::Float,
            Self::Bool(_) => AttributeType::Bool,
            Self::Text(_) => AttributeType::String,
            Self::Date(_) => AttributeType::Date,
            Self::Flag => AttributeType::Flag,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Self::Flag => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Uint(v) => serializer.serialize_u64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Date(v) => serializer.collect_str(&v.format(DATE_FORMAT)),
            Self::Flag => serializer.serialize_bool(true),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

/// Raw input offered to [`NullableValue::scan`]
///
/// Text comes from query strings, typed values from database rows, and
/// `Missing` stands for a database NULL or an absent column.
#[derive(Debug, Clone, Copy)]
pub enum Raw<'a> {
    Text(&'a str),
    Typed(&'a Value),
    Missing,
}

impl<'a> From<&'a str> for Raw<'a> {
    fn from(text: &'a str) -> Self {
        Raw::Text(text)
    }
}

impl<'a> From<&'a String> for Raw<'a> {
    fn from(text: &'a String) -> Self {
        Raw::Text(text.as_str())
    }
}

impl<'a> From<&'a Value> for Raw<'a> {
    fn from(value: &'a Value) -> Self {
        Raw::Typed(value)
    }
}

impl<'a> From<Option<&'a Value>> for Raw<'a> {
    fn from(value: Option<&'a Value>) -> Self {
        value.map_or(Raw::Missing, Raw::Typed)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Unset,
    Null,
    Valid(Value),
}

/// A value bound to one attribute that may be unset or explicitly null
#[derive(Debug, Clone, PartialEq)]
pub struct NullableValue {
    attribute: Attribute,
    state: State,
}

impl NullableValue {
    /// Create an unset value for `attribute`
    #[must_use]
    pub const fn new(attribute: Attribute) -> Self {
        Self {
            attribute,
            state: State::Unset,
        }
    }

    /// Create a value and immediately scan `raw` into it
    pub fn parse<'a>(attribute: Attribute, raw: impl Into<Raw<'a>>) -> Self {
        let mut value = Self::new(attribute);
        value.scan(raw);
        value
    }

    pub const fn attribute(&self) -> Attribute {
        self.attribute
    }

    /// True when the value holds data of the attribute's type
    pub const fn is_valid(&self) -> bool {
        matches!(self.state, State::Valid(_))
    }

    /// True when the caller explicitly supplied `null`
    pub const fn is_absolute_null(&self) -> bool {
        matches!(self.state, State::Null)
    }

    /// True when neither data nor an explicit null was supplied
    pub const fn is_unset(&self) -> bool {
        matches!(self.state, State::Unset)
    }

    /// The parsed data, if valid
    pub fn data(&self) -> Option<&Value> {
        match &self.state {
            State::Valid(value) => Some(value),
            _ => None,
        }
    }

    /// Parse `raw` into this value, replacing any previous state
    ///
    /// Text equal to `null` in any letter case becomes an explicit null. Other
    /// text goes through the attribute type's string parser and typed input
    /// must already be of the attribute's type. Anything that fails to parse
    /// leaves the value unset.
    pub fn scan<'a>(&mut self, raw: impl Into<Raw<'a>>) {
        let kind = self.attribute.kind();
        self.state = match raw.into() {
            Raw::Text(text) => Self::scan_text(kind, text),
            Raw::Typed(Value::Text(text)) => Self::scan_text(kind, text),
            Raw::Typed(value) => kind.parse_typed(value).map_or(State::Unset, State::Valid),
            Raw::Missing => State::Unset,
        };
    }

    fn scan_text(kind: AttributeType, text: &str) -> State {
        if text.eq_ignore_ascii_case("null") {
            return State::Null;
        }
        kind.parse_str(text).map_or(State::Unset, State::Valid)
    }

    /// Scan `fallback` only when the value is unset
    ///
    /// An explicit null is kept, so a client can still clear a field that
    /// has a default.
    pub fn default_to<'a>(&mut self, fallback: impl Into<Raw<'a>>) {
        if self.is_unset() {
            self.scan(fallback);
        }
    }

    /// The data if valid, `fallback` if unset, `None` for an explicit null
    #[must_use]
    pub fn coalesce(&self, fallback: impl Into<Value>) -> Option<Value> {
        match &self.state {
            State::Valid(value) => Some(value.clone()),
            State::Null => None,
            State::Unset => Some(fallback.into()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.data() {
            Some(Value::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.data() {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.data() {
            Some(Value::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.data() {
            Some(Value::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data() {
            Some(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.data() {
            Some(Value::Date(v)) => Some(*v),
            _ => None,
        }
    }

    /// Convert into a bound SQL parameter; anything but valid data is a typed NULL
    #[must_use]
    pub fn to_param(&self) -> Param {
        match &self.state {
            State::Valid(value) => Param::Value(value.clone()),
            _ => Param::Null(self.attribute.kind()),
        }
    }
}

impl Serialize for NullableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.data() {
            Some(value) => value.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// A parameter bound to a SQL statement placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    /// NULL typed as the given attribute type
    Null(AttributeType),
}

macro_rules! param_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for Param {
            fn from(value: $ty) -> Self {
                Param::Value(value.into())
            }
        })+
    };
}

param_from!(i64, u64, f64, bool, &str, String, NaiveDate);

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Value(value)
    }
}

impl From<&NullableValue> for Param {
    fn from(value: &NullableValue) -> Self {
        value.to_param()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_null_literal_any_case() {
        for text in ["null", "NULL", "Null", "nUlL"] {
            let value = NullableValue::parse(Attribute::Uid, text);
            assert!(value.is_absolute_null(), "{text}");
            assert!(!value.is_valid());
            assert_eq!(value.data(), None);
        }
    }

    #[test]
    fn test_scan_text_of_declared_type() {
        let value = NullableValue::parse(Attribute::Uid, "1001");
        assert!(value.is_valid());
        assert!(!value.is_absolute_null());
        assert_eq!(value.as_i64(), Some(1001));
    }

    #[test]
    fn test_scan_wrong_type_leaves_unset() {
        let value = NullableValue::parse(Attribute::Uid, "abc");
        assert!(value.is_unset());
        assert!(!value.is_valid());
        assert!(!value.is_absolute_null());
    }

    #[test]
    fn test_scan_typed_input() {
        let value = NullableValue::parse(Attribute::Status, &Value::Bool(false));
        assert_eq!(value.as_bool(), Some(false));

        let value = NullableValue::parse(Attribute::Quota, &Value::Int(3));
        assert!(value.is_unset());

        let value = NullableValue::parse(Attribute::Uid, &Value::Text("12".to_string()));
        assert_eq!(value.as_i64(), Some(12));
    }

    #[test]
    fn test_scan_missing_is_unset() {
        let value = NullableValue::parse(Attribute::Shell, Raw::Missing);
        assert!(value.is_unset());
    }

    #[test]
    fn test_rescan_replaces_state() {
        let mut value = NullableValue::parse(Attribute::Shell, "null");
        assert!(value.is_absolute_null());
        value.scan("/bin/zsh");
        assert_eq!(value.as_str(), Some("/bin/zsh"));
        assert!(!value.is_absolute_null());
    }

    #[test]
    fn test_default_to_is_idempotent_on_valid() {
        let mut value = NullableValue::parse(Attribute::Shell, "/bin/bash");
        value.default_to("/sbin/nologin");
        assert_eq!(value.as_str(), Some("/bin/bash"));

        let mut value = NullableValue::new(Attribute::Shell);
        value.default_to("/sbin/nologin");
        value.default_to("/bin/sh");
        assert_eq!(value.as_str(), Some("/sbin/nologin"));
    }

    #[test]
    fn test_default_to_keeps_explicit_null() {
        let mut value = NullableValue::parse(Attribute::Status, "NULL");
        value.default_to("true");
        assert!(value.is_absolute_null());
        assert_eq!(value.as_bool(), None);
    }

    #[test]
    fn test_coalesce() {
        let value = NullableValue::new(Attribute::Limit);
        assert_eq!(value.coalesce(10_u64), Some(Value::Uint(10)));

        let value = NullableValue::parse(Attribute::Limit, "3");
        assert_eq!(value.coalesce(10_u64), Some(Value::Uint(3)));
    }

    #[test]
    fn test_coalesce_keeps_explicit_null() {
        let value = NullableValue::parse(Attribute::Leader, "null");
        assert!(value.is_absolute_null());
        assert_eq!(value.coalesce(false), None);
    }

    #[test]
    fn test_date_parsing_and_serialization() {
        let value = NullableValue::parse(Attribute::ExpirationDate, "2030-12-01");
        assert_eq!(
            value.as_date(),
            NaiveDate::from_ymd_opt(2030, 12, 1)
        );
        assert_eq!(serde_json::to_value(&value).unwrap(), serde_json::json!("2030-12-01"));
    }

    #[test]
    fn test_serialize_null_states() {
        let unset = NullableValue::new(Attribute::FullName);
        let null = NullableValue::parse(Attribute::FullName, "null");
        assert_eq!(serde_json::to_value(&unset).unwrap(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(&null).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_to_param() {
        let value = NullableValue::parse(Attribute::Gid, "5");
        assert_eq!(value.to_param(), Param::Value(Value::Int(5)));

        let value = NullableValue::parse(Attribute::Gid, "null");
        assert_eq!(value.to_param(), Param::Null(AttributeType::Int));

        let value = NullableValue::new(Attribute::ExpirationDate);
        assert_eq!(Param::from(&value), Param::Null(AttributeType::Date));
    }
}
