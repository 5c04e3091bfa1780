//! Database collaborator
//!
//! The request core talks to storage only through the [`Connector`] and
//! [`TransactionHandle`] traits. A connector hands out transaction handles;
//! a handle runs parameterized statements inside one database transaction
//! until it is committed or rolled back.
//!
//! SQL text always comes from a [`Statement`], whose text is a `&'static str`.
//! Values reach the database only as bound parameters.

mod row;
mod statement;

#[cfg(feature = "database")]
pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::DatabaseError;

pub use row::Row;
pub use statement::{PreparedStatement, SavepointName, Statement};

#[cfg(feature = "database")]
pub use postgres::PgConnector;

/// Result of a database collaborator call
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Source of database transactions
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new transaction
    async fn begin(&self) -> DbResult<Box<dyn TransactionHandle>>;
}

/// One open database transaction
#[async_trait]
pub trait TransactionHandle: Send {
    /// Run a statement and return its rows
    async fn query(&mut self, statement: &Statement) -> DbResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows
    async fn execute(&mut self, statement: &Statement) -> DbResult<u64>;

    /// Prepare `sql` on the transaction's connection
    async fn prepare(&mut self, sql: &'static str) -> DbResult<PreparedStatement>;

    async fn savepoint(&mut self, name: &SavepointName) -> DbResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
