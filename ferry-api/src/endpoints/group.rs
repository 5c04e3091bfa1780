use async_trait::async_trait;
use serde_json::{json, Map};

use super::{is_valid_group_type, query_failed};
use crate::{
    api_error::ApiError,
    attribute::Attribute,
    auth::AccessRole,
    database::Statement,
    input::{Input, InputModel},
    pipeline::{ApiCollection, ApiContext, Endpoint, QueryFunction, QueryResult},
};

const SELECT_GROUPS: &str =
    "select name, type, gid from groups where (last_updated >= $1 or $1 is null)";

const SELECT_GROUPS_OF_TYPE: &str = "select name, type, gid from groups \
     where (last_updated >= $1 or $1 is null) and type = $2";

const SELECT_GROUP_ID: &str = "select groupid from groups where name = $1 and type = $2";

const SELECT_GROUP_MEMBERS: &str = "select users.uname, users.uid, user_group.is_leader \
     from user_group join users using(uid) \
     where groupid = $1 and (user_group.last_updated >= $2 or $2 is null)";

/// Group type that lists groups of every type
const ANY_TYPE: &str = "*";

const UNIX_GROUP: &str = "UnixGroup";

pub(super) fn register(apis: &mut ApiCollection) {
    apis.add(
        "getAllGroups",
        Endpoint::new(
            InputModel::new()
                .optional(Attribute::GroupType)
                .optional(Attribute::LastUpdated),
            AccessRole::Read,
            GetAllGroups,
        ),
    );

    apis.add(
        "getGroupMembers",
        Endpoint::new(
            InputModel::new()
                .required(Attribute::GroupName)
                .optional(Attribute::GroupType)
                .optional(Attribute::Leader)
                .optional(Attribute::LastUpdated),
            AccessRole::Read,
            GetGroupMembers,
        ),
    );
}

/// List groups, optionally of one type or changed since a date
pub struct GetAllGroups;

#[async_trait]
impl QueryFunction for GetAllGroups {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        let mut group_type = input[Attribute::GroupType].clone();
        group_type.default_to(ANY_TYPE);

        let typed = is_valid_group_type(ctx.tx(), &group_type).await?;
        if !typed && group_type.as_str() != Some(ANY_TYPE) {
            return Err(vec![ApiError::invalid(Attribute::GroupType)]);
        }

        let statement = if typed {
            Statement::new(SELECT_GROUPS_OF_TYPE)
                .bind(&input[Attribute::LastUpdated])
                .bind(&group_type)
        } else {
            Statement::new(SELECT_GROUPS).bind(&input[Attribute::LastUpdated])
        };
        let rows = ctx.tx().query(&statement).await.map_err(query_failed)?;

        let groups = rows
            .iter()
            .map(|row| {
                json!({
                    "groupname": row.get("name"),
                    "grouptype": row.get("type"),
                    "gid": row.get("gid"),
                })
            })
            .collect();
        Ok(serde_json::Value::Array(groups))
    }
}

/// List the members of a group, with their leader flag on request
pub struct GetGroupMembers;

#[async_trait]
impl QueryFunction for GetGroupMembers {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        let mut group_type = input[Attribute::GroupType].clone();
        group_type.default_to(UNIX_GROUP);
        let with_leaders = input[Attribute::Leader].as_bool().unwrap_or(false);

        if !is_valid_group_type(ctx.tx(), &group_type).await? {
            return Err(vec![ApiError::invalid(Attribute::GroupType)]);
        }

        let group = ctx
            .tx()
            .query_optional(
                &Statement::new(SELECT_GROUP_ID)
                    .bind(&input[Attribute::GroupName])
                    .bind(&group_type),
            )
            .await
            .map_err(query_failed)?;
        let Some(group) = group else {
            return Err(vec![ApiError::not_found(Attribute::GroupName)]);
        };

        let members = ctx
            .tx()
            .query(
                &Statement::new(SELECT_GROUP_MEMBERS)
                    .bind(&group.attribute(Attribute::GroupId))
                    .bind(&input[Attribute::LastUpdated]),
            )
            .await
            .map_err(query_failed)?;

        let members = members
            .iter()
            .filter(|row| row.get("uid").is_some())
            .map(|row| {
                let mut entry = Map::new();
                entry.insert("username".to_string(), json!(row.get("uname")));
                entry.insert("uid".to_string(), json!(row.get("uid")));
                if with_leaders {
                    entry.insert("leader".to_string(), json!(row.get("is_leader")));
                }
                serde_json::Value::Object(entry)
            })
            .collect();
        Ok(serde_json::Value::Array(members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{Event, MemoryConnector};
    use crate::database::Row;
    use crate::endpoints::testing::{accept_group_types, call, reject_group_types};
    use crate::value::{Param, Value};
    use chrono::NaiveDate;

    fn group(name: &str, kind: &str, gid: i64) -> Row {
        Row::from_pairs([
            ("name", Some(Value::from(name))),
            ("type", Some(Value::from(kind))),
            ("gid", Some(Value::Int(gid))),
        ])
    }

    fn member(uname: &str, uid: Option<i64>, leader: bool) -> Row {
        Row::from_pairs([
            ("uname", Some(Value::from(uname))),
            ("uid", uid.map(Value::Int)),
            ("is_leader", Some(Value::Bool(leader))),
        ])
    }

    #[tokio::test]
    async fn test_all_groups_of_any_type() {
        let db = MemoryConnector::new();
        reject_group_types(&db);
        db.respond(
            SELECT_GROUPS,
            vec![group("ferry", "UnixGroup", 9001), group("ferry_batch", "BatchSuperusers", 0)],
        );

        let reply = call(&db, "getAllGroups", &[]).await;

        assert_eq!(
            reply.output.payload,
            Some(json!([
                {"groupname": "ferry", "grouptype": "UnixGroup", "gid": 9001},
                {"groupname": "ferry_batch", "grouptype": "BatchSuperusers", "gid": 0},
            ]))
        );
        assert!(db.events().contains(&Event::Query(
            SELECT_GROUPS,
            vec![Param::Null(crate::attribute::AttributeType::Date)],
        )));
    }

    #[tokio::test]
    async fn test_all_groups_of_one_type_since_date() {
        let db = MemoryConnector::new();
        accept_group_types(&db);

        let reply = call(
            &db,
            "getAllGroups",
            &[("grouptype", "UnixGroup"), ("lastupdated", "2024-01-31")],
        )
        .await;

        assert_eq!(reply.output.payload, Some(json!([])));
        assert!(db.events().contains(&Event::Query(
            SELECT_GROUPS_OF_TYPE,
            vec![
                Param::from(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
                Param::from("UnixGroup"),
            ],
        )));
    }

    #[tokio::test]
    async fn test_all_groups_unknown_type() {
        let db = MemoryConnector::new();
        reject_group_types(&db);

        let reply = call(&db, "getAllGroups", &[("grouptype", "Bogus")]).await;

        assert_eq!(reply.output.errors, vec!["grouptype is invalid"]);
    }

    #[tokio::test]
    async fn test_all_groups_bad_date() {
        let db = MemoryConnector::new();

        let reply = call(&db, "getAllGroups", &[("lastupdated", "31/01/2024")]).await;

        assert_eq!(
            reply.output.errors,
            vec!["parameter lastupdated requires a date value"]
        );
    }

    #[tokio::test]
    async fn test_group_members() {
        let db = MemoryConnector::new();
        accept_group_types(&db);
        db.respond(
            SELECT_GROUP_ID,
            vec![Row::from_pairs([("groupid", Some(Value::Int(12)))])],
        );
        db.respond(
            SELECT_GROUP_MEMBERS,
            vec![
                member("alice", Some(5001), true),
                member("orphan", None, false),
                member("bob", Some(5002), false),
            ],
        );

        let reply = call(&db, "getGroupMembers", &[("groupname", "ferry")]).await;
        assert_eq!(
            reply.output.payload,
            Some(json!([
                {"username": "alice", "uid": 5001},
                {"username": "bob", "uid": 5002},
            ]))
        );

        let reply = call(
            &db,
            "getGroupMembers",
            &[("groupname", "ferry"), ("leader", "true")],
        )
        .await;
        assert_eq!(
            reply.output.payload,
            Some(json!([
                {"username": "alice", "uid": 5001, "leader": true},
                {"username": "bob", "uid": 5002, "leader": false},
            ]))
        );

        assert!(db.events().contains(&Event::Query(
            SELECT_GROUP_ID,
            vec![Param::from("ferry"), Param::from(UNIX_GROUP)],
        )));
    }

    #[tokio::test]
    async fn test_group_members_unknown_group() {
        let db = MemoryConnector::new();
        accept_group_types(&db);

        let reply = call(&db, "getGroupMembers", &[("groupname", "nowhere")]).await;

        assert_eq!(reply.output.errors, vec!["groupname not found"]);
        assert!(!db
            .events()
            .iter()
            .any(|e| matches!(e, Event::Query(sql, _) if *sql == SELECT_GROUP_MEMBERS)));
    }
}
