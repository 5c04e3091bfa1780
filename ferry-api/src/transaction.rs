//! Transaction coordinator
//!
//! A [`Transaction`] wraps at most one open database transaction and enforces
//! an ownership discipline on it. Whoever starts the transaction receives a
//! nonzero [`CommitKey`]; only that key can commit it. Code that joins an
//! already active transaction receives [`CommitKey::PARTICIPANT`], which can
//! run statements but whose commit is a no-op.
//!
//! The coordinator also keeps the outcome of the last operation so composed
//! flows can ask [`Transaction::complete`] after each step.
//!
//! ```rust,ignore
//! let mut tx = Transaction::new();
//! let key = tx.start(connector).await?;
//! tx.exec(&Statement::new("UPDATE users SET shell = $1 WHERE uid = $2").bind(shell).bind(uid)).await?;
//! tx.commit(key).await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::database::{
    Connector, DbResult, PreparedStatement, Row, SavepointName, Statement, TransactionHandle,
};
use crate::error::{DatabaseError, DatabaseOperation};
use crate::value::Param;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Capability to commit a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitKey(u64);

impl CommitKey {
    /// Key held by code that joined a transaction it did not start
    pub const PARTICIPANT: CommitKey = CommitKey(0);

    fn mint() -> Self {
        CommitKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn is_owner(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for CommitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction has not been started")]
    NotStarted,

    #[error("invalid key")]
    InvalidKey,

    #[error("transaction did not complete properly")]
    Incomplete,

    #[error("invalid savepoint name '{0}'")]
    InvalidSavepoint(String),

    /// Failure injected by a composed flow
    #[error("{0}")]
    Reported(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Per-request transaction coordinator
#[derive(Default)]
pub struct Transaction {
    handle: Option<Box<dyn TransactionHandle>>,
    key: Option<CommitKey>,
    error: Option<TransactionError>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction, or join the active one
    ///
    /// Marks the coordinator incomplete before anything else. When no
    /// transaction is active a new one is opened and a fresh owner key is
    /// returned. When one is already active nothing is opened and
    /// [`CommitKey::PARTICIPANT`] is returned.
    pub async fn start(&mut self, connector: &dyn Connector) -> Result<CommitKey, TransactionError> {
        self.error = Some(TransactionError::Incomplete);

        if self.handle.is_some() {
            tracing::debug!("joining active transaction as participant");
            return Ok(CommitKey::PARTICIPANT);
        }

        match connector.begin().await {
            Ok(handle) => {
                let key = CommitKey::mint();
                self.handle = Some(handle);
                self.key = Some(key);
                tracing::debug!(key = %key, "transaction started");
                Ok(key)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Commit with the owner's key
    ///
    /// A participant key clears the error flag and leaves the transaction
    /// open for its owner. Any other key that is not the owner's fails with
    /// [`TransactionError::InvalidKey`] and the transaction stays active.
    pub async fn commit(&mut self, key: CommitKey) -> Result<(), TransactionError> {
        if self.handle.is_none() {
            return self.fail(TransactionError::NotStarted);
        }
        if key == CommitKey::PARTICIPANT {
            self.error = None;
            return Ok(());
        }
        if Some(key) != self.key {
            return self.fail(TransactionError::InvalidKey);
        }

        let Some(handle) = self.release() else {
            return self.fail(TransactionError::NotStarted);
        };
        let result = handle.commit().await;
        self.record(result)
    }

    /// Abort the active transaction, whoever asks
    ///
    /// The error flag is left as it was, so a flow that rolled back still
    /// reports itself incomplete. Callers outside this module go through
    /// [`rollback_as`](Self::rollback_as) so a participant cannot abort its
    /// owner's work.
    async fn rollback(&mut self) -> Result<(), TransactionError> {
        let Some(handle) = self.release() else {
            return self.fail(TransactionError::NotStarted);
        };
        handle.rollback().await.map_err(|e| {
            let error = TransactionError::from(e);
            self.error = Some(error.clone());
            error
        })
    }

    /// Abort the active transaction if `key` owns it
    ///
    /// A participant key is a no-op, so a nested call can never abort a
    /// transaction it joined.
    pub async fn rollback_as(&mut self, key: CommitKey) -> Result<(), TransactionError> {
        if key == CommitKey::PARTICIPANT {
            return Ok(());
        }
        if self.handle.is_none() {
            return self.fail(TransactionError::NotStarted);
        }
        if Some(key) != self.key {
            return self.fail(TransactionError::InvalidKey);
        }
        self.rollback().await
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<(), TransactionError> {
        let name = self.savepoint_name(name)?;
        let result = self.handle()?.savepoint(&name).await;
        self.record(result)
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), TransactionError> {
        let name = self.savepoint_name(name)?;
        let result = self.handle()?.rollback_to_savepoint(&name).await;
        self.record(result)
    }

    /// Run a statement and return all rows
    pub async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransactionError> {
        let result = self.handle()?.query(statement).await;
        self.record(result)
    }

    /// Run a statement that must return at least one row; the first is returned
    pub async fn query_one(&mut self, statement: &Statement) -> Result<Row, TransactionError> {
        let rows = self.query(statement).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(row),
            None => self.fail(
                DatabaseError::not_found(DatabaseOperation::Query, "no rows returned")
                    .with_statement(statement.sql())
                    .into(),
            ),
        }
    }

    /// Run a statement and return its first row, if any
    pub async fn query_optional(
        &mut self,
        statement: &Statement,
    ) -> Result<Option<Row>, TransactionError> {
        Ok(self.query(statement).await?.into_iter().next())
    }

    /// Run a statement for its effect and return the number of affected rows
    pub async fn exec(&mut self, statement: &Statement) -> Result<u64, TransactionError> {
        let result = self.handle()?.execute(statement).await;
        self.record(result)
    }

    pub async fn prepare(&mut self, sql: &'static str) -> Result<PreparedStatement, TransactionError> {
        let result = self.handle()?.prepare(sql).await;
        self.record(result)
    }

    pub async fn query_prepared(
        &mut self,
        prepared: &PreparedStatement,
        params: Vec<Param>,
    ) -> Result<Vec<Row>, TransactionError> {
        let statement = self.prepared_statement(prepared, params)?;
        self.query(&statement).await
    }

    pub async fn exec_prepared(
        &mut self,
        prepared: &PreparedStatement,
        params: Vec<Param>,
    ) -> Result<u64, TransactionError> {
        let statement = self.prepared_statement(prepared, params)?;
        self.exec(&statement).await
    }

    /// True when the last recorded operation succeeded
    pub fn complete(&self) -> bool {
        self.error.is_none()
    }

    /// Mark the flow as not complete without any operation failing
    pub fn continue_flow(&mut self) {
        self.error = Some(TransactionError::Incomplete);
    }

    /// Record an explicit failure
    pub fn report(&mut self, message: impl Into<String>) {
        self.error = Some(TransactionError::Reported(message.into()));
    }

    pub fn last_error(&self) -> Option<&TransactionError> {
        self.error.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    fn release(&mut self) -> Option<Box<dyn TransactionHandle>> {
        self.key = None;
        self.handle.take()
    }

    fn handle(&mut self) -> Result<&mut Box<dyn TransactionHandle>, TransactionError> {
        if self.handle.is_none() {
            return self.fail(TransactionError::NotStarted);
        }
        self.handle.as_mut().ok_or(TransactionError::NotStarted)
    }

    fn savepoint_name(&mut self, name: &str) -> Result<SavepointName, TransactionError> {
        match SavepointName::parse(name) {
            Some(name) => Ok(name),
            None => self.fail(TransactionError::InvalidSavepoint(name.to_string())),
        }
    }

    fn prepared_statement(
        &mut self,
        prepared: &PreparedStatement,
        params: Vec<Param>,
    ) -> Result<Statement, TransactionError> {
        let supplied = params.len();
        match prepared.statement(params) {
            Some(statement) => Ok(statement),
            None => self.fail(
                DatabaseError::query_failed(
                    DatabaseOperation::Prepare,
                    format!(
                        "expected {} parameters, got {}",
                        prepared.parameter_count, supplied
                    ),
                )
                .with_statement(prepared.sql)
                .into(),
            ),
        }
    }

    fn fail<T>(&mut self, error: TransactionError) -> Result<T, TransactionError> {
        self.error = Some(error.clone());
        Err(error)
    }

    fn record<T>(&mut self, result: DbResult<T>) -> Result<T, TransactionError> {
        match result {
            Ok(value) => {
                self.error = None;
                Ok(value)
            }
            Err(e) => self.fail(e.into()),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.is_active())
            .field("error", &self.error)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("transaction dropped while active, rolling back");
        }
    }
}
