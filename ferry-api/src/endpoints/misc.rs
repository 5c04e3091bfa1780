use async_trait::async_trait;
use serde_json::json;

use super::query_failed;
use crate::{
    auth::AccessRole,
    database::Statement,
    input::{Input, InputModel},
    pipeline::{ApiCollection, ApiContext, Endpoint, QueryFunction, QueryResult},
};

const CHECK_DATABASE: &str = "select now() as now";

pub(super) fn register(apis: &mut ApiCollection) {
    apis.add("ping", Endpoint::new(InputModel::new(), AccessRole::Public, Ping));
}

/// Liveness check that also proves the database answers
pub struct Ping;

#[async_trait]
impl QueryFunction for Ping {
    async fn call(&self, ctx: &mut ApiContext<'_>, _input: &Input) -> QueryResult {
        ctx.tx()
            .query(&Statement::new(CHECK_DATABASE))
            .await
            .map_err(query_failed)?;

        Ok(json!({
            "releaseversion": env!("CARGO_PKG_VERSION"),
            "server": ctx.state().config().service.name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{Event, MemoryConnector};
    use crate::endpoints::testing::call;

    #[tokio::test]
    async fn test_ping() {
        let db = MemoryConnector::new();

        let reply = call(&db, "ping", &[]).await;

        assert!(reply.output.status);
        assert_eq!(
            reply.output.payload,
            Some(json!({"releaseversion": env!("CARGO_PKG_VERSION"), "server": "ferry"}))
        );
        assert_eq!(db.count(&Event::Commit), 1);
    }

    #[tokio::test]
    async fn test_ping_database_down() {
        let db = MemoryConnector::new();
        db.fail_on(CHECK_DATABASE);

        let reply = call(&db, "ping", &[]).await;

        assert_eq!(reply.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.output.errors, vec!["error while querying the database"]);
    }

    #[tokio::test]
    async fn test_ping_rejects_parameters() {
        let db = MemoryConnector::new();
        let reply = call(&db, "ping", &[("username", "alice")]).await;
        assert_eq!(
            reply.output.errors,
            vec!["username is not a valid parameter for this api"]
        );
    }
}
