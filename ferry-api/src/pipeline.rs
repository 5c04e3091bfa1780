//! Request pipeline
//!
//! Every endpoint runs the same sequence: authorize the client, acquire a
//! transaction, bind the query string against the endpoint's input model,
//! invoke its query function, then commit or roll back and write the
//! envelope exactly once.
//!
//! Query functions receive an [`ApiContext`] that carries the transaction
//! explicitly. A query function composing another one hands it
//! [`ApiContext::participant`], which shares the transaction but holds
//! [`CommitKey::PARTICIPANT`], so the nested call can never commit or abort
//! work it did not start.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{field, Instrument, Span};

use crate::{
    api_error::{ApiError, ErrorType},
    attribute::Attribute,
    auth::{AccessRole, Authorization},
    error::{Error, Result},
    input::{Input, InputModel},
    output::Reply,
    state::AppState,
    transaction::{CommitKey, Transaction, TransactionError},
};

/// What the pipeline knows about an incoming request
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Endpoint name
    pub action: String,
    /// Raw query string
    pub query: String,
    /// Decoded query parameters, in order
    pub params: Vec<(String, String)>,
    pub client_ip: Option<IpAddr>,
    pub headers: HeaderMap,
    pub request_id: Option<String>,
}

impl RequestInfo {
    /// Extract request information from HTTP request parts
    pub fn from_parts(
        action: impl Into<String>,
        parts: &Parts,
        request_id_header: &str,
    ) -> Result<Self> {
        let Query(params) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|rejection| Error::BadRequest(rejection.body_text()))?;

        let client_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let request_id = parts
            .headers
            .get(request_id_header)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            action: action.into(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            params,
            client_ip,
            headers: parts.headers.clone(),
            request_id,
        })
    }
}

/// Everything a query function may touch while it runs
pub struct ApiContext<'a> {
    pub request: &'a RequestInfo,
    pub auth: &'a Authorization,
    state: &'a AppState,
    tx: &'a mut Transaction,
    key: CommitKey,
}

impl<'a> ApiContext<'a> {
    pub fn new(
        state: &'a AppState,
        request: &'a RequestInfo,
        auth: &'a Authorization,
        tx: &'a mut Transaction,
        key: CommitKey,
    ) -> Self {
        Self {
            request,
            auth,
            state,
            tx,
            key,
        }
    }

    pub fn state(&self) -> &AppState {
        self.state
    }

    /// The request's transaction
    ///
    /// Statements run through it directly. Settling it goes through
    /// [`commit`](Self::commit) and [`rollback`](Self::rollback), which use
    /// this context's key.
    pub fn tx(&mut self) -> &mut Transaction {
        &mut *self.tx
    }

    /// Commit with this context's key; a participant only clears the error flag
    pub async fn commit(&mut self) -> std::result::Result<(), TransactionError> {
        self.tx.commit(self.key).await
    }

    /// Roll back with this context's key; a participant leaves the owner's
    /// transaction untouched
    pub async fn rollback(&mut self) -> std::result::Result<(), TransactionError> {
        self.tx.rollback_as(self.key).await
    }

    /// Key this context holds on the transaction
    pub fn key(&self) -> CommitKey {
        self.key
    }

    /// True when this context started the transaction
    pub fn is_owner(&self) -> bool {
        self.key.is_owner()
    }

    /// Reborrow this context for a nested query function
    ///
    /// The nested call shares the transaction and request but holds the
    /// participant key.
    pub fn participant(&mut self) -> ApiContext<'_> {
        ApiContext {
            request: self.request,
            auth: self.auth,
            state: self.state,
            tx: &mut *self.tx,
            key: CommitKey::PARTICIPANT,
        }
    }
}

/// Output of a query function: a payload, or every error it found
pub type QueryResult = std::result::Result<serde_json::Value, Vec<ApiError>>;

/// Business logic of one endpoint
#[async_trait]
pub trait QueryFunction: Send + Sync + 'static {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult;
}

/// A routable API: input model, required role and query function
#[derive(Clone)]
pub struct Endpoint {
    model: InputModel,
    role: AccessRole,
    query: Arc<dyn QueryFunction>,
}

impl Endpoint {
    pub fn new(model: InputModel, role: AccessRole, query: impl QueryFunction) -> Self {
        Self {
            model,
            role,
            query: Arc::new(query),
        }
    }

    pub fn model(&self) -> &InputModel {
        &self.model
    }

    pub fn role(&self) -> AccessRole {
        self.role
    }

    /// Run the endpoint in a transaction of its own
    pub async fn run(&self, state: &AppState, request: RequestInfo) -> Reply {
        let mut tx = Transaction::new();
        self.run_in(state, &request, &mut tx).await
    }

    /// Run the endpoint within `tx`
    ///
    /// When `tx` is already active the endpoint joins it as a participant and
    /// leaves commit and rollback to the owner.
    pub async fn run_in(&self, state: &AppState, request: &RequestInfo, tx: &mut Transaction) -> Reply {
        let started = Instant::now();
        let span = tracing::info_span!(
            "request",
            action = %request.action,
            query = %request.query,
            client_ip = field::Empty,
            auth_role = %self.role,
            auth_level = field::Empty,
            subject = field::Empty,
            unitname = field::Empty,
            request_id = field::Empty,
            duration_ms = field::Empty,
        );
        if let Some(ip) = request.client_ip {
            span.record("client_ip", field::display(ip));
        }
        if let Some(id) = &request.request_id {
            span.record("request_id", id.as_str());
        }

        let reply = self.execute(state, request, tx).instrument(span.clone()).await;

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        span.in_scope(|| {
            tracing::debug!(status = reply.status.as_u16(), "request finished");
        });
        reply
    }

    /// Authorize, acquire the transaction, and release it on every path
    async fn execute(&self, state: &AppState, request: &RequestInfo, tx: &mut Transaction) -> Reply {
        let auth = state.authorizer().authorize(request, self.role).await;
        let span = Span::current();
        span.record("auth_level", auth.level.as_str());
        if let Some(subject) = &auth.subject {
            span.record("subject", subject.as_str());
        }

        if !auth.allowed() {
            tracing::info!("{}", auth.message);
            return Reply::unauthorized(auth.message.clone());
        }
        tracing::debug!("{}", auth.message);

        let key = match tx.start(state.connector()).await {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(error = %e, "error starting database transaction");
                return Reply::failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ["error starting database transaction"],
                );
            }
        };

        let reply = self.transact(state, request, &auth, tx, key).await;

        if key.is_owner() && tx.is_active() {
            if let Err(e) = tx.rollback_as(key).await {
                tracing::error!(error = %e, "error rolling back transaction");
            }
        }
        reply
    }

    /// Bind, invoke the query function and settle the transaction
    async fn transact(
        &self,
        state: &AppState,
        request: &RequestInfo,
        auth: &Authorization,
        tx: &mut Transaction,
        key: CommitKey,
    ) -> Reply {
        let (input, errors) = Input::parse(&request.params, &self.model);
        if let Some(unit) = input[Attribute::UnitName].as_str() {
            Span::current().record("unitname", unit);
        }

        if input[Attribute::Help].is_valid() {
            return Reply::success(self.model.help());
        }

        if !errors.is_empty() {
            for error in &errors {
                tracing::error!("{}", error);
            }
            if !key.is_owner() {
                tx.report(errors[0].to_string());
            }
            return Reply::failure(StatusCode::OK, errors.iter().map(ToString::to_string));
        }

        let mut ctx = ApiContext::new(state, request, auth, tx, key);
        let result = self.query.call(&mut ctx, &input).await;

        match result {
            Ok(payload) => match tx.commit(key).await {
                Ok(()) => {
                    tracing::info!("success");
                    Reply::success(payload)
                }
                Err(e) => {
                    tracing::error!(error = %e, "error committing transaction");
                    let error = ApiError::db_query();
                    Reply::failure(error.kind.http_status(), [error.message])
                }
            },
            Err(mut errors) => {
                if errors.is_empty() {
                    errors.push(ApiError::fatal("api failed without reporting an error"));
                }
                for error in &errors {
                    tracing::error!(kind = %error.kind, "{}", error.message);
                }
                // The owner decides on commit; it must see this step failed
                if !key.is_owner() {
                    tx.report(errors[0].message.clone());
                }
                let status = ErrorType::worst(&errors).http_status();
                Reply::failure(status, errors.into_iter().map(|e| e.message))
            }
        }
    }

    /// Run the endpoint for an HTTP request
    pub async fn handle(&self, state: &AppState, action: String, request: Request) -> Response {
        let (parts, _body) = request.into_parts();
        let header = state.config().middleware.request_id_header.as_str();
        match RequestInfo::from_parts(action, &parts, header) {
            Ok(info) => self.run(state, info).await.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// Named set of endpoints served by one server
#[derive(Clone, Default)]
pub struct ApiCollection {
    endpoints: BTreeMap<String, Arc<Endpoint>>,
}

impl ApiCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `endpoint` under `name`, replacing any previous one
    pub fn add(&mut self, name: impl Into<String>, endpoint: Endpoint) -> &mut Self {
        self.endpoints.insert(name.into(), Arc::new(endpoint));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Route every endpoint at `/{name}` for GET and POST
    pub fn into_router(self, state: AppState) -> Router {
        let count = self.endpoints.len();
        let mut router = Router::new();

        for (name, endpoint) in self.endpoints {
            let path = format!("/{name}");
            let handler = move |State(state): State<AppState>, request: Request| {
                let endpoint = endpoint.clone();
                let name = name.clone();
                async move { endpoint.handle(&state, name, request).await }
            };
            router = router.route(&path, get(handler.clone()).post(handler));
        }

        tracing::info!(endpoints = count, "api routes registered");
        router.fallback(unknown_api).with_state(state)
    }
}

async fn unknown_api(uri: Uri) -> Reply {
    let name = uri.path().trim_start_matches('/');
    Reply::failure(StatusCode::NOT_FOUND, [format!("{name} is not a valid api")])
}
