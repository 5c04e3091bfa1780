//! PostgreSQL backend over an sqlx connection pool

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query,
    Column, Either, Executor, PgPool, Postgres, Row as _, Statement as _, TypeInfo,
};

use super::{
    Connector, DbResult, PreparedStatement, Row, SavepointName, Statement, TransactionHandle,
};
use crate::attribute::AttributeType;
use crate::config::DatabaseConfig;
use crate::error::{sanitize_url, DatabaseError, DatabaseOperation, Result};
use crate::value::{Param, Value};

/// Longest wait between two connection attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// [`Connector`] backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the pool, retrying with exponential backoff
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        create_pool_with_retries(config, config.max_retries)
            .await
            .map(Self::from_pool)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn begin(&self) -> DbResult<Box<dyn TransactionHandle>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(with_operation(DatabaseOperation::Transaction, "BEGIN"))?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// An open transaction on a pooled connection
///
/// Dropping it without commit returns the connection with the transaction
/// rolled back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn query(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        let rows = bind_params(sqlx::query(statement.sql()), statement.params())?
            .fetch_all(&mut *self.tx)
            .await
            .map_err(with_operation(DatabaseOperation::Query, statement.sql()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        let result = bind_params(sqlx::query(statement.sql()), statement.params())?
            .execute(&mut *self.tx)
            .await
            .map_err(with_operation(DatabaseOperation::Execute, statement.sql()))?;
        Ok(result.rows_affected())
    }

    async fn prepare(&mut self, sql: &'static str) -> DbResult<PreparedStatement> {
        let prepared = (&mut *self.tx)
            .prepare(sql)
            .await
            .map_err(with_operation(DatabaseOperation::Prepare, sql))?;
        let parameter_count = match prepared.parameters() {
            Some(Either::Left(types)) => types.len(),
            Some(Either::Right(count)) => count,
            None => 0,
        };
        Ok(PreparedStatement {
            sql,
            parameter_count,
        })
    }

    async fn savepoint(&mut self, name: &SavepointName) -> DbResult<()> {
        self.run_savepoint(savepoint_sql(name)).await
    }

    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> DbResult<()> {
        self.run_savepoint(rollback_to_savepoint_sql(name)).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let PgTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(with_operation(DatabaseOperation::Transaction, "COMMIT"))
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let PgTransaction { tx } = *self;
        tx.rollback()
            .await
            .map_err(with_operation(DatabaseOperation::Transaction, "ROLLBACK"))
    }
}

impl PgTransaction {
    /// Savepoint names are validated identifiers, so the text is not bound
    async fn run_savepoint(&mut self, sql: String) -> DbResult<()> {
        (&mut *self.tx)
            .execute(sql.as_str())
            .await
            .map_err(with_operation(DatabaseOperation::Savepoint, &sql))?;
        Ok(())
    }
}

fn savepoint_sql(name: &SavepointName) -> String {
    format!("SAVEPOINT {name}")
}

fn rollback_to_savepoint_sql(name: &SavepointName) -> String {
    format!("ROLLBACK TO SAVEPOINT {name}")
}

fn with_operation(operation: DatabaseOperation, sql: &str) -> impl FnOnce(sqlx::Error) -> DatabaseError + '_ {
    move |err| DatabaseError::from(err).during(operation).with_statement(sql)
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Param],
) -> DbResult<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = match param {
            Param::Value(Value::Int(v)) => query.bind(*v),
            Param::Value(Value::Uint(v)) => {
                let v = i64::try_from(*v).map_err(|_| {
                    DatabaseError::type_conversion(
                        DatabaseOperation::Query,
                        format!("unsigned value {v} does not fit a bigint"),
                    )
                })?;
                query.bind(v)
            }
            Param::Value(Value::Float(v)) => query.bind(*v),
            Param::Value(Value::Bool(v)) => query.bind(*v),
            Param::Value(Value::Text(v)) => query.bind(v.clone()),
            Param::Value(Value::Date(v)) => query.bind(*v),
            Param::Value(Value::Flag) => query.bind(true),
            Param::Null(AttributeType::Int | AttributeType::Uint) => query.bind(None::<i64>),
            Param::Null(AttributeType::Float) => query.bind(None::<f64>),
            Param::Null(AttributeType::Bool | AttributeType::Flag) => query.bind(None::<bool>),
            Param::Null(AttributeType::String) => query.bind(None::<String>),
            Param::Null(AttributeType::Date) => query.bind(None::<NaiveDate>),
        };
    }
    Ok(query)
}

fn decode_row(row: &PgRow) -> DbResult<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(index)?.map(|v| Value::Int(v.into())),
            "INT4" => row.try_get::<Option<i32>, _>(index)?.map(|v| Value::Int(v.into())),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
            "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|v| Value::Float(v.into())),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(index)?.map(Value::Text)
            }
            "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|v| Value::Date(v.date())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|v| Value::Date(v.date_naive())),
            other => {
                return Err(DatabaseError::type_conversion(
                    DatabaseOperation::Query,
                    format!("column {} has unsupported type {}", column.name(), other),
                ))
            }
        };
        columns.push(column.name().to_string());
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

/// Create the pool, retrying transient failures with exponential backoff
async fn create_pool_with_retries(config: &DatabaseConfig, max_retries: u32) -> Result<PgPool> {
    let base_delay = Duration::from_secs(config.retry_delay_secs);
    let mut attempt = 0;

    loop {
        let error = match try_create_pool(config).await {
            Ok(pool) => {
                tracing::info!(
                    attempts = attempt + 1,
                    max_connections = config.max_connections,
                    min_connections = config.min_connections,
                    "database pool ready"
                );
                return Ok(pool);
            }
            Err(error) => error,
        };

        attempt += 1;
        if attempt > max_retries || !error.is_retriable() {
            tracing::error!(attempts = attempt, error = %error, "giving up on database");
            return Err(error.into());
        }

        let delay = retry_delay(base_delay, attempt);
        tracing::warn!(attempt, error = %error, ?delay, "database connection failed, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Backoff before retry `attempt` (1-based): doubles each time, capped
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

async fn try_create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| {
            DatabaseError::from(e)
                .during(DatabaseOperation::Connect)
                .with_statement(sanitize_url(&config.url))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(4));
        assert_eq!(retry_delay(base, 4), Duration::from_secs(16));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::from_secs(2);
        assert_eq!(retry_delay(base, 12), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(Duration::MAX, u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_savepoint_statements() {
        let name = SavepointName::parse("create-user").unwrap();
        assert_eq!(savepoint_sql(&name), "SAVEPOINT create_user");
        assert_eq!(rollback_to_savepoint_sql(&name), "ROLLBACK TO SAVEPOINT create_user");
    }
}
