//! In-memory recording backend for tests
//!
//! Every call made through a [`MemoryConnector`] is appended to a shared
//! journal. Responses and failures are scripted per SQL text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    Connector, DbResult, PreparedStatement, Row, SavepointName, Statement, TransactionHandle,
};
use crate::error::{DatabaseError, DatabaseOperation};
use crate::value::Param;

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Begin,
    Query(&'static str, Vec<Param>),
    Execute(&'static str, Vec<Param>),
    Prepare(&'static str),
    Savepoint(String),
    RollbackToSavepoint(String),
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct Journal {
    events: Vec<Event>,
    responses: HashMap<&'static str, Vec<Row>>,
    failures: HashMap<&'static str, DatabaseError>,
    fail_begin: bool,
    fail_commit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    journal: Arc<Mutex<Journal>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` whenever `sql` is queried
    pub fn respond(&self, sql: &'static str, rows: Vec<Row>) -> &Self {
        self.journal.lock().unwrap().responses.insert(sql, rows);
        self
    }

    /// Fail every query or execute of `sql`
    pub fn fail_on(&self, sql: &'static str) -> &Self {
        self.fail_with(
            sql,
            DatabaseError::query_failed(DatabaseOperation::Query, "scripted failure"),
        )
    }

    /// Fail every query or execute of `sql` with `error`
    pub fn fail_with(&self, sql: &'static str, error: DatabaseError) -> &Self {
        self.journal.lock().unwrap().failures.insert(sql, error);
        self
    }

    pub fn fail_begin(&self) -> &Self {
        self.journal.lock().unwrap().fail_begin = true;
        self
    }

    pub fn fail_commit(&self) -> &Self {
        self.journal.lock().unwrap().fail_commit = true;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.journal.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Statements executed for their effect, in order
    pub fn executed(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql, _) => Some(sql),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.journal.lock().unwrap().events.push(event);
    }

    fn check(&self, sql: &'static str, operation: DatabaseOperation) -> DbResult<()> {
        match self.journal.lock().unwrap().failures.get(sql) {
            Some(error) => Err(error.clone().during(operation).with_statement(sql)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn begin(&self) -> DbResult<Box<dyn TransactionHandle>> {
        if self.journal.lock().unwrap().fail_begin {
            return Err(DatabaseError::connection_failed("scripted begin failure"));
        }
        self.record(Event::Begin);
        Ok(Box::new(MemoryTransaction {
            connector: self.clone(),
        }))
    }
}

struct MemoryTransaction {
    connector: MemoryConnector,
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn query(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        let sql = statement.sql();
        self.connector
            .record(Event::Query(sql, statement.params().to_vec()));
        self.connector.check(sql, DatabaseOperation::Query)?;
        let journal = self.connector.journal.lock().unwrap();
        Ok(journal.responses.get(sql).cloned().unwrap_or_default())
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        let sql = statement.sql();
        self.connector
            .record(Event::Execute(sql, statement.params().to_vec()));
        self.connector.check(sql, DatabaseOperation::Execute)?;
        Ok(1)
    }

    async fn prepare(&mut self, sql: &'static str) -> DbResult<PreparedStatement> {
        self.connector.record(Event::Prepare(sql));
        self.connector.check(sql, DatabaseOperation::Prepare)?;
        let parameter_count = (1..=sql.matches('$').count())
            .take_while(|n| sql.contains(&format!("${n}")))
            .count();
        Ok(PreparedStatement {
            sql,
            parameter_count,
        })
    }

    async fn savepoint(&mut self, name: &SavepointName) -> DbResult<()> {
        self.connector.record(Event::Savepoint(name.to_string()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> DbResult<()> {
        self.connector
            .record(Event::RollbackToSavepoint(name.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        if self.connector.journal.lock().unwrap().fail_commit {
            return Err(DatabaseError::transaction_failed("scripted commit failure"));
        }
        self.connector.record(Event::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.connector.record(Event::Rollback);
        Ok(())
    }
}
