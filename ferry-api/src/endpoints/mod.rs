//! FERRY endpoints
//!
//! Each submodule declares its endpoints and registers them with an
//! [`ApiCollection`]. Query functions are unit structs so a flow can call
//! another one directly with a participant context.

mod group;
mod misc;
mod user;

pub use group::{GetAllGroups, GetGroupMembers};
pub use misc::Ping;
pub use user::{AddUserToGroup, CreateUser, GetUserInfo, SetUserInfo};

use crate::{
    api_error::ApiError,
    database::Statement,
    pipeline::ApiCollection,
    transaction::{Transaction, TransactionError},
    value::{Param, Value},
};

/// Register every endpoint
pub fn register(apis: &mut ApiCollection) {
    misc::register(apis);
    user::register(apis);
    group::register(apis);
}

/// Whether `group_type` names a value of the `groups_group_type` enum
const VALID_GROUP_TYPE: &str =
    "select $1 = any (enum_range(null::groups_group_type)::text[]) as valid";

/// Log a failed statement and turn it into the generic database error
pub(crate) fn query_failed(error: TransactionError) -> Vec<ApiError> {
    tracing::error!(error = %error, "query failed");
    vec![ApiError::db_query()]
}

pub(crate) async fn is_valid_group_type(
    tx: &mut Transaction,
    group_type: impl Into<Param>,
) -> Result<bool, Vec<ApiError>> {
    let row = tx
        .query_one(&Statement::new(VALID_GROUP_TYPE).bind(group_type))
        .await
        .map_err(query_failed)?;
    Ok(matches!(row.get("valid"), Some(Value::Bool(true))))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        auth::{AccessLevel, AccessRole, Authorization, Authorizer},
        config::Config,
        database::{memory::MemoryConnector, Row},
        output::Reply,
        pipeline::RequestInfo,
        state::AppState,
    };

    struct Trusted;

    #[async_trait]
    impl Authorizer for Trusted {
        async fn authorize(&self, _request: &RequestInfo, _role: AccessRole) -> Authorization {
            Authorization::new(AccessLevel::DnWhitelist, "trusted")
        }
    }

    fn group_types(db: &MemoryConnector, valid: bool) {
        db.respond(
            VALID_GROUP_TYPE,
            vec![Row::from_pairs([("valid", Some(Value::Bool(valid)))])],
        );
    }

    /// Script the group type check to accept every type
    pub fn accept_group_types(db: &MemoryConnector) {
        group_types(db, true);
    }

    /// Script the group type check to reject every type
    pub fn reject_group_types(db: &MemoryConnector) {
        group_types(db, false);
    }

    /// Call `name` with `params` against `db`
    pub async fn call(db: &MemoryConnector, name: &str, params: &[(&str, &str)]) -> Reply {
        let state = AppState::new(Config::default(), Arc::new(db.clone()), Arc::new(Trusted));
        let mut apis = ApiCollection::new();
        register(&mut apis);

        let request = RequestInfo {
            action: name.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        apis.get(name)
            .unwrap_or_else(|| panic!("{name} is not registered"))
            .run(&state, request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let mut apis = ApiCollection::new();
        register(&mut apis);

        assert_eq!(
            apis.names().collect::<Vec<_>>(),
            vec![
                "addUserToGroup",
                "createUser",
                "getAllGroups",
                "getGroupMembers",
                "getUserInfo",
                "ping",
                "setUserInfo",
            ]
        );
    }
}
