use serde_json::Map;

use crate::attribute::Attribute;
use crate::value::{NullableValue, Value};

/// One result row, decoded into catalog values
///
/// A `None` entry is a database NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Option<Value>>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<Value>)>,
        S: Into<String>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(column, value)| (column.into(), value))
            .unzip();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value of `column`; `None` for NULL or an unknown column
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|index| self.values[index].as_ref())
    }

    /// Scan `column` into a value bound to `attribute`
    pub fn nullable(&self, column: &str, attribute: Attribute) -> NullableValue {
        NullableValue::parse(attribute, self.get(column))
    }

    /// Scan the column named after `attribute`
    pub fn attribute(&self, attribute: Attribute) -> NullableValue {
        self.nullable(attribute.name(), attribute)
    }

    /// The row as a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let object: Map<String, serde_json::Value> = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| {
                let value = value
                    .as_ref()
                    .and_then(|v| serde_json::to_value(v).ok())
                    .unwrap_or(serde_json::Value::Null);
                (column.clone(), value)
            })
            .collect();
        serde_json::Value::Object(object)
    }
}
