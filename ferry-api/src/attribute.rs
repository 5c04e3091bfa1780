//! Attribute catalog
//!
//! Every query parameter an endpoint can accept is an [`Attribute`] drawn from
//! a closed catalog. Each attribute has exactly one [`AttributeType`], fixed at
//! compile time, which decides how raw input for it is parsed.
//!
//! # Example
//!
//! ```rust
//! use ferry_api::attribute::{Attribute, AttributeType};
//!
//! let attribute: Attribute = "uid".parse().unwrap();
//! assert_eq!(attribute, Attribute::Uid);
//! assert_eq!(attribute.kind(), AttributeType::Int);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};

use crate::value::Value;

/// Calendar format accepted for date attributes (`YYYY-MM-DD`)
pub const DATE_FORMAT: &str = "%Y-%m-%d";

macro_rules! catalog {
    ($($(#[$meta:meta])* $variant:ident => $name:literal : $kind:ident,)+) => {
        /// A named, typed field of the parameter catalog
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Attribute {
            $($(#[$meta])* $variant,)+
        }

        impl Attribute {
            /// Every attribute in the catalog
            pub const ALL: &'static [Attribute] = &[$(Attribute::$variant,)+];

            /// The parameter name as it appears in a query string
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Attribute::$variant => $name,)+
                }
            }

            /// The primitive type values of this attribute must have
            #[must_use]
            pub const fn kind(self) -> AttributeType {
                match self {
                    $(Attribute::$variant => AttributeType::$kind,)+
                }
            }
        }
    };
}

catalog! {
    UserName => "username": String,
    GroupName => "groupname": String,
    UnitName => "unitname": String,
    FullName => "fullname": String,
    ResourceName => "resourcename": String,
    GroupType => "grouptype": String,
    UnitType => "unittype": String,
    Dn => "dn": String,
    Shell => "shell": String,
    HomeDir => "homedir": String,
    Fqan => "fqan": String,
    Role => "role": String,
    VomsUrl => "vomsurl": String,
    CondorGroup => "condorgroup": String,
    Subject => "subject": String,
    Uid => "uid": Int,
    Gid => "gid": Int,
    GroupId => "groupid": Int,
    UnitId => "unitid": Int,
    FiscalYear => "fiscalyear": Int,
    /// Upper bound on the number of rows a listing returns
    Limit => "limit": Uint,
    Quota => "quota": Float,
    UsedHours => "usedhours": Float,
    Status => "status": Bool,
    Primary => "primary": Bool,
    Leader => "leader": Bool,
    GroupAccount => "groupaccount": Bool,
    Banned => "banned": Bool,
    ExpirationDate => "expirationdate": Date,
    LastUpdated => "lastupdated": Date,
    /// Implicit on every endpoint; asks for the parameter description
    Help => "help": Flag,
}

static BY_NAME: Lazy<HashMap<&'static str, Attribute>> = Lazy::new(|| {
    Attribute::ALL
        .iter()
        .map(|attribute| (attribute.name(), *attribute))
        .collect()
});

impl Attribute {
    /// Look up an attribute by its parameter name
    pub fn lookup(name: &str) -> Option<Self> {
        BY_NAME.get(name).copied()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Attribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Error returned when a name is not part of the catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attribute '{0}'")]
pub struct UnknownAttribute(pub String);

impl FromStr for Attribute {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| UnknownAttribute(s.to_string()))
    }
}

/// Primitive kind carried by an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// Signed 64-bit integer
    Int,
    /// Unsigned 64-bit integer
    Uint,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// Text, passed through unchanged
    String,
    /// Calendar date in [`DATE_FORMAT`]
    Date,
    /// Valueless switch; present or absent
    Flag,
}

impl AttributeType {
    /// Human readable name, used in binding error messages
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Uint => "unsigned integer",
            Self::Float => "float",
            Self::Bool => "boolean",
            Self::String => "string",
            Self::Date => "date",
            Self::Flag => "flag",
        }
    }

    /// Accept an already typed value if it holds exactly this kind
    ///
    /// No coercion happens between kinds: a float is never accepted for an
    /// integer attribute, nor an integer for a float one.
    #[must_use]
    pub fn parse_typed(&self, value: &Value) -> Option<Value> {
        let accepted = matches!(
            (self, value),
            (Self::Int, Value::Int(_))
                | (Self::Uint, Value::Uint(_))
                | (Self::Float, Value::Float(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::String, Value::Text(_))
                | (Self::Date, Value::Date(_))
                | (Self::Flag, Value::Flag)
        );
        accepted.then(|| value.clone())
    }

    /// Parse raw text into this kind, returning `None` when it does not fit
    #[must_use]
    pub fn parse_str(&self, text: &str) -> Option<Value> {
        match self {
            Self::String => Some(Value::Text(text.to_string())),
            Self::Int => text.parse().ok().map(Value::Int),
            Self::Uint => text.parse().ok().map(Value::Uint),
            Self::Float => text.parse().ok().map(Value::Float),
            Self::Bool => parse_bool(text).map(Value::Bool),
            Self::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .map(Value::Date),
            Self::Flag => text.is_empty().then_some(Value::Flag),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AttributeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
