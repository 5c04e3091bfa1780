//! HTTP listener and middleware stack

use std::net::SocketAddr;

use axum::{http::StatusCode, Router};
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::{Config, CorsMode},
    error::Result,
    middleware::{
        request_id_header, request_id_layer, request_id_propagation_layer,
        sensitive_headers_layer,
    },
};

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wrap `app` in the middleware stack
    ///
    /// Layers added later wrap the earlier ones: panic recovery sits next to
    /// the handlers and CORS is outermost. Request ids are assigned and
    /// credentials marked sensitive before the trace span sees the headers.
    pub fn layer(&self, app: Router) -> Result<Router> {
        let middleware = &self.config.middleware;
        let header = request_id_header(&middleware.request_id_header)?;

        let app = match middleware.catch_panic {
            true => app.layer(CatchPanicLayer::new()),
            false => app,
        };

        let trace = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().include_headers(true))
            .on_response(DefaultOnResponse::new().include_headers(true));

        Ok(app
            .layer(trace)
            .layer(sensitive_headers_layer())
            .layer(request_id_propagation_layer(header.clone()))
            .layer(request_id_layer(header))
            .layer(RequestBodyLimitLayer::new(middleware.body_limit_mb * 1024 * 1024))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.config.service.timeout(),
            ))
            .layer(cors_layer(middleware.cors_mode)))
    }

    /// Serve `app` until SIGINT or SIGTERM, then drain in-flight requests
    pub async fn serve(self, app: Router) -> Result<()> {
        let service = &self.config.service;
        let middleware = &self.config.middleware;
        let addr = SocketAddr::from(([0, 0, 0, 0], service.port));

        tracing::info!(
            name = %service.name,
            environment = %service.environment,
            timeout_secs = service.timeout_secs,
            catch_panic = middleware.catch_panic,
            body_limit_mb = middleware.body_limit_mb,
            cors_mode = ?middleware.cors_mode,
            request_id_header = %middleware.request_id_header,
            "starting server"
        );

        let app = self.layer(app)?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("server stopped");
        Ok(())
    }
}

fn cors_layer(mode: CorsMode) -> CorsLayer {
    match mode {
        CorsMode::Permissive => CorsLayer::permissive(),
        CorsMode::Restrictive | CorsMode::Disabled => CorsLayer::new(),
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = received, "shutting down, draining requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn ping_router() -> Router {
        Router::new().route("/ping", get(|| async { "pong" }))
    }

    #[tokio::test]
    async fn test_response_carries_generated_request_id() {
        let app = Server::new(Config::default()).layer(ping_router()).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["x-request-id"]
            .to_str()
            .unwrap()
            .starts_with("req_"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let app = Server::new(Config::default()).layer(
            Router::new().route("/echo", axum::routing::post(|body: String| async move { body })),
        )
        .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from(vec![b'x'; 2 * 1024 * 1024]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_invalid_request_id_header_is_rejected() {
        let mut config = Config::default();
        config.middleware.request_id_header = "bad header".to_string();
        assert!(Server::new(config).layer(Router::new()).is_err());
    }
}
