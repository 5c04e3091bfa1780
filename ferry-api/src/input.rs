//! Endpoint input models and parameter binding
//!
//! An [`InputModel`] declares which attributes an endpoint accepts and which of
//! them are required. [`Input::parse`] binds raw query parameters against a
//! model, collecting every violation in one pass.

use std::collections::{BTreeMap, HashMap};
use std::ops::Index;

use once_cell::sync::Lazy;
use serde_json::json;

use crate::attribute::{Attribute, AttributeType};
use crate::value::{NullableValue, Raw};

/// One declared parameter of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub attribute: Attribute,
    pub required: bool,
}

/// Ordered set of parameters an endpoint accepts
///
/// The `help` flag is accepted by every model without being declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputModel(Vec<Parameter>);

impl InputModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required parameter
    #[must_use]
    pub fn required(self, attribute: Attribute) -> Self {
        self.add(attribute, true)
    }

    /// Declare an optional parameter
    #[must_use]
    pub fn optional(self, attribute: Attribute) -> Self {
        self.add(attribute, false)
    }

    /// Declare a parameter, replacing an earlier declaration of the same attribute
    #[must_use]
    pub fn add(mut self, attribute: Attribute, required: bool) -> Self {
        match self.0.iter_mut().find(|p| p.attribute == attribute) {
            Some(existing) => existing.required = required,
            None => self.0.push(Parameter {
                attribute,
                required,
            }),
        }
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.0
    }

    pub fn contains(&self, attribute: Attribute) -> bool {
        self.0.iter().any(|p| p.attribute == attribute)
    }

    /// Describe the declared parameters as `{name: {type, required}}`
    #[must_use]
    pub fn help(&self) -> serde_json::Value {
        let described: BTreeMap<&str, serde_json::Value> = self
            .0
            .iter()
            .map(|p| {
                (
                    p.attribute.name(),
                    json!({ "type": p.attribute.kind(), "required": p.required }),
                )
            })
            .collect();
        json!(described)
    }

    fn with_help(&self) -> impl Iterator<Item = Parameter> + '_ {
        let implicit = (!self.contains(Attribute::Help)).then_some(Parameter {
            attribute: Attribute::Help,
            required: false,
        });
        self.0.iter().copied().chain(implicit)
    }
}

/// A violation found while binding raw parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("parameter {attribute} requires a {kind} value")]
    WrongType {
        attribute: Attribute,
        kind: AttributeType,
    },

    #[error("required parameter {0} not provided")]
    Missing(Attribute),

    #[error("{0} is not a valid parameter for this api")]
    Unknown(String),
}

static UNSET: Lazy<HashMap<Attribute, NullableValue>> = Lazy::new(|| {
    Attribute::ALL
        .iter()
        .map(|attribute| (*attribute, NullableValue::new(*attribute)))
        .collect()
});

/// Bound parameters of one request
///
/// Indexing an attribute that was not bound yields an unset value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Input(HashMap<Attribute, NullableValue>);

impl Input {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `params` against `model`
    ///
    /// Declared parameters are processed in model order. Values are trimmed
    /// and an empty value counts as not supplied, except for flags where
    /// presence alone is the value. When a name repeats, the first occurrence
    /// is used. Every name left over after binding is reported once as
    /// unknown, in the order it first appeared.
    pub fn parse(params: &[(String, String)], model: &InputModel) -> (Input, Vec<BindingError>) {
        let mut input = Input::new();
        let mut errors = Vec::new();
        let mut remaining: Vec<(&str, &str)> = params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        for parameter in model.with_help() {
            let attribute = parameter.attribute;
            let supplied = remaining
                .iter()
                .find(|(name, _)| *name == attribute.name())
                .map(|&(_, value)| value.trim());
            remaining.retain(|(name, _)| *name != attribute.name());

            let mut value = NullableValue::new(attribute);
            let is_flag = attribute.kind() == AttributeType::Flag;
            if let Some(text) = supplied.filter(|text| !text.is_empty() || is_flag) {
                value.scan(Raw::Text(text));
                if !value.is_valid() && !value.is_absolute_null() {
                    errors.push(BindingError::WrongType {
                        attribute,
                        kind: attribute.kind(),
                    });
                    continue;
                }
            }

            if parameter.required && value.is_unset() {
                errors.push(BindingError::Missing(attribute));
                continue;
            }

            input.insert(value);
        }

        let mut unknown: Vec<&str> = Vec::new();
        for (name, _) in remaining {
            if !unknown.contains(&name) {
                unknown.push(name);
            }
        }
        errors.extend(unknown.into_iter().map(|name| BindingError::Unknown(name.to_string())));

        (input, errors)
    }

    /// Add or replace a bound value
    pub fn insert(&mut self, value: NullableValue) {
        self.0.insert(value.attribute(), value);
    }

    /// Scan `raw` into `attribute` and add it
    #[must_use]
    pub fn with_value<'a>(mut self, attribute: Attribute, raw: impl Into<Raw<'a>>) -> Self {
        self.insert(NullableValue::parse(attribute, raw));
        self
    }

    /// True when `attribute` was bound, whatever its state
    pub fn contains(&self, attribute: Attribute) -> bool {
        self.0.contains_key(&attribute)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<Attribute> for Input {
    type Output = NullableValue;

    fn index(&self, attribute: Attribute) -> &NullableValue {
        self.0
            .get(&attribute)
            .or_else(|| UNSET.get(&attribute))
            .unwrap_or_else(|| unreachable!("every attribute has an unset entry"))
    }
}
