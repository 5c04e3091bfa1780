use std::fmt;

use crate::value::Param;

/// Longest identifier PostgreSQL accepts without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// A SQL statement with its bound parameters
///
/// ```rust
/// use ferry_api::database::Statement;
///
/// let statement = Statement::new("SELECT uid FROM users WHERE uname = $1").bind("alice");
/// assert_eq!(statement.params().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: &'static str,
    params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: &'static str) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter
    #[must_use]
    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn sql(&self) -> &'static str {
        self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// A statement prepared on a transaction's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedStatement {
    pub sql: &'static str,
    pub parameter_count: usize,
}

impl PreparedStatement {
    /// Pair the prepared text with `params`
    ///
    /// Returns `None` when the number of parameters does not match.
    pub fn statement(&self, params: Vec<Param>) -> Option<Statement> {
        (params.len() == self.parameter_count).then_some(Statement {
            sql: self.sql,
            params,
        })
    }
}

/// A validated savepoint identifier
///
/// Dashes are replaced by underscores; the result must start with a letter or
/// underscore and contain only ASCII letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SavepointName(String);

impl SavepointName {
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.replace('-', "_");
        let mut chars = name.chars();
        let starts_well = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid = starts_well
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && name.len() <= MAX_IDENTIFIER_LEN;
        valid.then_some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::value::Value;

    #[test]
    fn test_savepoint_names() {
        assert_eq!(
            SavepointName::parse("before-groups").unwrap().as_str(),
            "before_groups"
        );
        assert!(SavepointName::parse("sp1").is_some());
        assert!(SavepointName::parse("").is_none());
        assert!(SavepointName::parse("1sp").is_none());
        assert!(SavepointName::parse("sp; DROP TABLE users").is_none());
        assert!(SavepointName::parse(&"s".repeat(64)).is_none());
    }

    #[test]
    fn test_bind_params() {
        let statement = Statement::new("UPDATE users SET shell = $1 WHERE uid = $2")
            .bind(Param::Null(AttributeType::String))
            .bind(10_i64);
        assert_eq!(
            statement.params(),
            &[Param::Null(AttributeType::String), Param::Value(Value::Int(10))]
        );
    }

    #[test]
    fn test_prepared_statement_arity() {
        let prepared = PreparedStatement {
            sql: "SELECT $1::text",
            parameter_count: 1,
        };
        assert!(prepared.statement(vec![]).is_none());
        assert!(prepared.statement(vec![Param::from("x")]).is_some());
    }
}
