//! Request identifiers
//!
//! Requests without an id header get a TypeID with the `req` prefix and a
//! UUIDv7 suffix, e.g. `req_01h455vb4pex5vsknk084sn02q`, so ids sort by
//! arrival time in the logs.

use std::fmt;
use std::str::FromStr;

use http::{HeaderValue, Request};
use mti::prelude::*;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};

/// Time-ordered request identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = MagicTypeId::from_str(s).map_err(|e| RequestIdError::Malformed(e.to_string()))?;
        let prefix = id.prefix().as_str();
        if prefix != Self::PREFIX {
            return Err(RequestIdError::WrongPrefix(prefix.to_string()));
        }
        Ok(Self(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestIdError {
    #[error("malformed request id: {0}")]
    Malformed(String),

    #[error("request id has prefix '{0}', expected 'req'")]
    WrongPrefix(String),
}

/// Generates a [`RequestId`] for requests that arrive without one
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let value = HeaderValue::from_str(RequestId::new().as_str()).ok()?;
        Some(TowerRequestId::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_id() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"));
        assert_eq!(id.as_str().len(), 30);
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_parse_request_id() {
        let id: RequestId = "req_01h455vb4pex5vsknk084sn02q".parse().unwrap();
        assert_eq!(id.as_str(), "req_01h455vb4pex5vsknk084sn02q");

        assert_eq!(
            "usr_01h455vb4pex5vsknk084sn02q".parse::<RequestId>(),
            Err(RequestIdError::WrongPrefix("usr".to_string()))
        );
        assert!(matches!(
            "req_nope".parse::<RequestId>(),
            Err(RequestIdError::Malformed(_))
        ));
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(first < RequestId::new());
    }

    #[test]
    fn test_make_request_id() {
        let request = Request::builder().body(()).unwrap();
        let id = MakeTypedRequestId.make_request_id(&request).unwrap();
        let value = id.into_header_value();
        assert!(value.to_str().unwrap().starts_with("req_"));
    }
}
