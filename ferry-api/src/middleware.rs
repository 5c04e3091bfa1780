//! Request tracking layers
//!
//! Every request carries an id in the configured header: the client's own, or
//! a generated [`RequestId`](crate::ids::RequestId). The id is echoed on the
//! response and lands in the `request` span. Credentials and the forwarded
//! client certificate are masked wherever headers are logged.

use axum::http::HeaderName;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
};

use crate::error::{Error, Result};
use crate::ids::MakeTypedRequestId;

/// Headers masked in logs
pub const SENSITIVE_HEADERS: [HeaderName; 3] = [
    HeaderName::from_static("authorization"),
    HeaderName::from_static("cookie"),
    HeaderName::from_static("x-ssl-client-cert"),
];

/// Parse the configured request id header name
pub fn request_id_header(name: &str) -> Result<HeaderName> {
    HeaderName::try_from(name)
        .map_err(|e| Error::Internal(format!("invalid request id header '{name}': {e}")))
}

/// Assign a typed request id when the request has none
pub fn request_id_layer(header: HeaderName) -> SetRequestIdLayer<MakeTypedRequestId> {
    SetRequestIdLayer::new(header, MakeTypedRequestId)
}

/// Copy the request id onto the response
pub fn request_id_propagation_layer(header: HeaderName) -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(header)
}

pub fn sensitive_headers_layer() -> SetSensitiveRequestHeadersLayer {
    SetSensitiveRequestHeadersLayer::new(SENSITIVE_HEADERS)
}
