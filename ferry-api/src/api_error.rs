//! Domain error classification
//!
//! Query functions report failures as [`ApiError`] values. Each carries an
//! [`ErrorType`] from a strict severity order; the worst severity among a
//! request's errors decides the HTTP status.

use std::fmt;

use axum::http::StatusCode;

/// Severity of a domain error, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ErrorType {
    #[default]
    Ok,
    DataNotFound,
    InvalidData,
    DuplicateData,
    ApiRequirement,
    Fatal,
    DbQuery,
}

impl ErrorType {
    /// Default message for an error of this type about `subject`
    #[must_use]
    pub fn default_message(self, subject: &str) -> String {
        match self {
            Self::DataNotFound => format!("{subject} not found"),
            Self::InvalidData => format!("{subject} is invalid"),
            Self::DuplicateData => format!("{subject} already exists"),
            Self::DbQuery => "error while querying the database".to_string(),
            Self::Ok | Self::ApiRequirement | Self::Fatal => subject.to_string(),
        }
    }

    /// HTTP status for a response whose worst error has this severity
    ///
    /// Only severities above [`ErrorType::Fatal`] change the status; every
    /// lower tier is signalled in the body of a 200 response.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        if self > Self::Fatal {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    /// The most severe type among `errors`, or `Ok` when there are none
    #[must_use]
    pub fn worst(errors: &[ApiError]) -> ErrorType {
        errors.iter().map(|e| e.kind).max().unwrap_or_default()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::DataNotFound => "data_not_found",
            Self::InvalidData => "invalid_data",
            Self::DuplicateData => "duplicate_data",
            Self::ApiRequirement => "api_requirement",
            Self::Fatal => "fatal",
            Self::DbQuery => "db_query",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified error returned by a query function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorType,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `{subject} not found`
    pub fn not_found(subject: impl fmt::Display) -> Self {
        let kind = ErrorType::DataNotFound;
        Self::new(kind, kind.default_message(&subject.to_string()))
    }

    /// `{subject} is invalid`
    pub fn invalid(subject: impl fmt::Display) -> Self {
        let kind = ErrorType::InvalidData;
        Self::new(kind, kind.default_message(&subject.to_string()))
    }

    /// `{subject} already exists`
    pub fn duplicate(subject: impl fmt::Display) -> Self {
        let kind = ErrorType::DuplicateData;
        Self::new(kind, kind.default_message(&subject.to_string()))
    }

    pub fn requirement(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ApiRequirement, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Fatal, message)
    }

    /// The generic database failure
    pub fn db_query() -> Self {
        let kind = ErrorType::DbQuery;
        Self::new(kind, kind.default_message(""))
    }
}
