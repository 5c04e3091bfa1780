//! # ferry-api
//!
//! Request execution core of the FERRY identity and affiliation
//! administration API.
//!
//! Every endpoint is an [`Endpoint`](pipeline::Endpoint): an input model
//! over the closed [`Attribute`](attribute::Attribute) catalog, the
//! [`AccessRole`](auth::AccessRole) a client needs, and a
//! [`QueryFunction`](pipeline::QueryFunction) holding its business logic.
//! The pipeline authorizes the client, runs the query function inside a
//! database [`Transaction`](transaction::Transaction), and answers with the
//! FERRY JSON envelope.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ferry_api::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load_from("/etc/ferry/default.toml")?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::builder().config(config.clone()).build().await?;
//!
//!     let mut apis = ApiCollection::new();
//!     endpoints::register(&mut apis);
//!
//!     Server::new(config).serve(apis.into_router(state)).await
//! }
//! ```

pub mod api_error;
pub mod attribute;
pub mod auth;
pub mod config;
pub mod database;
pub mod endpoints;
pub mod error;
pub mod ids;
pub mod input;
pub mod middleware;
pub mod observability;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod transaction;
pub mod value;

pub mod prelude {
    pub use crate::api_error::{ApiError, ErrorType};
    pub use crate::attribute::{Attribute, AttributeType};
    pub use crate::auth::{AccessLevel, AccessList, AccessRole, Authorization, Authorizer};
    pub use crate::config::Config;
    pub use crate::database::{Connector, Row, Statement, TransactionHandle};
    pub use crate::endpoints;
    pub use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation, Error, Result};
    pub use crate::ids::{MakeTypedRequestId, RequestId};
    pub use crate::input::{BindingError, Input, InputModel};
    pub use crate::observability::init_tracing;
    pub use crate::output::{Output, Reply};
    pub use crate::pipeline::{
        ApiCollection, ApiContext, Endpoint, QueryFunction, QueryResult, RequestInfo,
    };
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::transaction::{CommitKey, Transaction, TransactionError};
    pub use crate::value::{NullableValue, Param, Value};

    #[cfg(feature = "database")]
    pub use crate::database::PgConnector;

    pub use async_trait::async_trait;
    pub use axum::Router;
}
