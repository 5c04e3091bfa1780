//! Response envelope
//!
//! Every FERRY response, success or failure, carries the same JSON body:
//!
//! ```json
//! { "ferry_status": "success", "ferry_error": [], "ferry_output": { ... } }
//! ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Content type of every envelope
pub const CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Outcome of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub status: bool,
    pub errors: Vec<String>,
    pub payload: Option<serde_json::Value>,
}

impl Output {
    #[must_use]
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            status: true,
            errors: Vec::new(),
            payload: Some(payload),
        }
    }

    #[must_use]
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            status: false,
            errors,
            payload: None,
        }
    }

    /// Wire form of this output
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope {
            ferry_status: if self.status { "success" } else { "failure" }.to_string(),
            ferry_error: self.errors.clone(),
            ferry_output: self.payload.clone().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Serialized response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ferry_status: String,
    pub ferry_error: Vec<String>,
    pub ferry_output: serde_json::Value,
}

/// An [`Output`] paired with its HTTP status
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub output: Output,
}

impl Reply {
    pub fn new(status: StatusCode, output: Output) -> Self {
        Self { status, output }
    }

    /// 200 with a success envelope
    pub fn success(payload: serde_json::Value) -> Self {
        Self::new(StatusCode::OK, Output::success(payload))
    }

    /// Failure envelope with the given status
    pub fn failure<I, S>(status: StatusCode, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            status,
            Output::failure(errors.into_iter().map(Into::into).collect()),
        )
    }

    /// 401 with a single error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::failure(StatusCode::UNAUTHORIZED, [message.into()])
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.output.envelope())).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let envelope = Output::success(json!({"uid": 10})).envelope();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "ferry_status": "success",
                "ferry_error": [],
                "ferry_output": {"uid": 10}
            })
        );
    }

    #[test]
    fn test_failure_envelope_has_null_output() {
        let envelope = Output::failure(vec!["a".into(), "b".into()]).envelope();
        assert_eq!(envelope.ferry_status, "failure");
        assert_eq!(envelope.ferry_error, vec!["a", "b"]);
        assert_eq!(envelope.ferry_output, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_reply_response() {
        let response = Reply::unauthorized("client not authorized").into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let envelope: Envelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.ferry_error, vec!["client not authorized"]);
    }
}
