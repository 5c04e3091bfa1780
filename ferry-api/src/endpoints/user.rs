use async_trait::async_trait;

use super::{is_valid_group_type, query_failed};
use crate::{
    api_error::{ApiError, ErrorType},
    attribute::Attribute,
    auth::AccessRole,
    database::Statement,
    input::{Input, InputModel},
    pipeline::{ApiCollection, ApiContext, Endpoint, QueryFunction, QueryResult},
    transaction::TransactionError,
    value::Param,
};

const SELECT_USER_INFO: &str = "select full_name, uid, status, is_groupaccount, expiration_date, \
     vopersonid, is_banned from users where uname = $1";

const SELECT_USER_STATE: &str =
    "select uid, expiration_date, is_banned from users where uname = $1";

const UPDATE_USER_INFO: &str = "update users set full_name = coalesce($2, full_name), \
     status = coalesce($3, status), is_groupaccount = coalesce($4, is_groupaccount), \
     expiration_date = $5, last_updated = NOW() where uid = $1";

const SELECT_UNIX_GROUP: &str =
    "select groupid from groups where name = $1 and type = 'UnixGroup'";

const INSERT_USER: &str = "insert into users (uname, uid, full_name, status, expiration_date, \
     vopersonid, last_updated) values ($1, $2, $3, $4, $5, gen_random_uuid()::text, NOW())";

const SELECT_MEMBERSHIP_IDS: &str = "select (select uid from users where uname = $1) as uid, \
     (select groupid from groups where name = $2 and type = $3) as groupid";

const UPSERT_MEMBERSHIP: &str = "insert into user_group (uid, groupid, is_leader, last_updated) \
     values ($1, $2, $3, NOW()) on conflict (uid, groupid) do update \
     set is_leader = $3, last_updated = NOW() where $4";

/// Accounts created without an expiration date expire on this day
const DEFAULT_EXPIRATION: &str = "2038-01-01";

pub(super) fn register(apis: &mut ApiCollection) {
    apis.add(
        "getUserInfo",
        Endpoint::new(
            InputModel::new().required(Attribute::UserName),
            AccessRole::Read,
            GetUserInfo,
        ),
    );

    apis.add(
        "setUserInfo",
        Endpoint::new(
            InputModel::new()
                .required(Attribute::UserName)
                .optional(Attribute::FullName)
                .optional(Attribute::Status)
                .optional(Attribute::GroupAccount)
                .optional(Attribute::ExpirationDate),
            AccessRole::Write,
            SetUserInfo,
        ),
    );

    apis.add(
        "createUser",
        Endpoint::new(
            InputModel::new()
                .required(Attribute::Uid)
                .required(Attribute::UserName)
                .required(Attribute::FullName)
                .required(Attribute::Status)
                .required(Attribute::GroupName)
                .optional(Attribute::ExpirationDate),
            AccessRole::Write,
            CreateUser,
        ),
    );

    apis.add(
        "addUserToGroup",
        Endpoint::new(
            InputModel::new()
                .required(Attribute::UserName)
                .required(Attribute::GroupName)
                .required(Attribute::GroupType)
                .optional(Attribute::Leader),
            AccessRole::Write,
            AddUserToGroup,
        ),
    );
}

pub struct GetUserInfo;

#[async_trait]
impl QueryFunction for GetUserInfo {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        let user = ctx
            .tx()
            .query_optional(&Statement::new(SELECT_USER_INFO).bind(&input[Attribute::UserName]))
            .await
            .map_err(query_failed)?;

        user.map(|row| row.to_json())
            .ok_or_else(|| vec![ApiError::not_found(Attribute::UserName)])
    }
}

/// Update the mutable fields of an account
///
/// Fields not supplied keep their value. An expiration date of `null`
/// clears it. A banned user can never be reactivated.
pub struct SetUserInfo;

#[async_trait]
impl QueryFunction for SetUserInfo {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        let expiration = &input[Attribute::ExpirationDate];
        if !input[Attribute::FullName].is_valid()
            && !input[Attribute::Status].is_valid()
            && !input[Attribute::GroupAccount].is_valid()
            && !expiration.is_valid()
            && !expiration.is_absolute_null()
        {
            return Err(vec![ApiError::requirement("not enough arguments")]);
        }

        let user = ctx
            .tx()
            .query_optional(&Statement::new(SELECT_USER_STATE).bind(&input[Attribute::UserName]))
            .await
            .map_err(query_failed)?;
        let Some(user) = user else {
            return Err(vec![ApiError::not_found(Attribute::UserName)]);
        };

        let banned = user.nullable("is_banned", Attribute::Banned).as_bool() == Some(true);
        if banned && input[Attribute::Status].as_bool() == Some(true) {
            return Err(vec![ApiError::new(ErrorType::InvalidData, "user is banned")]);
        }

        let mut expiration = expiration.clone();
        expiration.default_to(user.get("expiration_date"));

        let update = Statement::new(UPDATE_USER_INFO)
            .bind(&user.attribute(Attribute::Uid))
            .bind(&input[Attribute::FullName])
            .bind(&input[Attribute::Status])
            .bind(&input[Attribute::GroupAccount])
            .bind(&expiration);
        ctx.tx().exec(&update).await.map_err(query_failed)?;

        Ok(serde_json::Value::Null)
    }
}

/// Create an account and make it a member of its primary Unix group
///
/// The membership is added by [`AddUserToGroup`], run as a participant in
/// this request's transaction.
pub struct CreateUser;

impl CreateUser {
    const SAVEPOINT: &'static str = "create-user";
}

#[async_trait]
impl QueryFunction for CreateUser {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        let username = input[Attribute::UserName].as_str().unwrap_or_default();
        if username.contains(' ') {
            return Err(vec![ApiError::new(
                ErrorType::InvalidData,
                "spaces are not allowed in username",
            )]);
        }

        let group = ctx
            .tx()
            .query_optional(&Statement::new(SELECT_UNIX_GROUP).bind(&input[Attribute::GroupName]))
            .await
            .map_err(query_failed)?;
        if group.is_none() {
            return Err(vec![ApiError::not_found(Attribute::GroupName)]);
        }

        let mut expiration = input[Attribute::ExpirationDate].clone();
        expiration.default_to(DEFAULT_EXPIRATION);

        ctx.tx().savepoint(Self::SAVEPOINT).await.map_err(query_failed)?;
        let insert = Statement::new(INSERT_USER)
            .bind(&input[Attribute::UserName])
            .bind(&input[Attribute::Uid])
            .bind(&input[Attribute::FullName])
            .bind(&input[Attribute::Status])
            .bind(&expiration);
        if let Err(error) = ctx.tx().exec(&insert).await {
            let errors = match duplicate_user(&error) {
                Some(duplicate) => vec![duplicate],
                None => query_failed(error),
            };
            if let Err(e) = ctx.tx().rollback_to_savepoint(Self::SAVEPOINT).await {
                tracing::error!(error = %e, "error rolling back to savepoint");
            }
            return Err(errors);
        }

        let membership = Input::new()
            .with_value(Attribute::UserName, input[Attribute::UserName].data())
            .with_value(Attribute::GroupName, input[Attribute::GroupName].data())
            .with_value(Attribute::GroupType, "UnixGroup");
        AddUserToGroup
            .call(&mut ctx.participant(), &membership)
            .await?;

        Ok(serde_json::Value::Null)
    }
}

/// Map a unique violation on the users table to the offending attribute
fn duplicate_user(error: &TransactionError) -> Option<ApiError> {
    let TransactionError::Database(error) = error else {
        return None;
    };
    if error.violates("pk_users") {
        Some(ApiError::duplicate(Attribute::Uid))
    } else if error.violates("unq_users_uname") {
        Some(ApiError::duplicate(Attribute::UserName))
    } else {
        None
    }
}

/// Add a user to a group, or update the leader flag of an existing membership
pub struct AddUserToGroup;

#[async_trait]
impl QueryFunction for AddUserToGroup {
    async fn call(&self, ctx: &mut ApiContext<'_>, input: &Input) -> QueryResult {
        if !is_valid_group_type(ctx.tx(), &input[Attribute::GroupType]).await? {
            return Err(vec![ApiError::invalid(Attribute::GroupType)]);
        }

        let ids = ctx
            .tx()
            .query_one(
                &Statement::new(SELECT_MEMBERSHIP_IDS)
                    .bind(&input[Attribute::UserName])
                    .bind(&input[Attribute::GroupName])
                    .bind(&input[Attribute::GroupType]),
            )
            .await
            .map_err(query_failed)?;

        let uid = ids.attribute(Attribute::Uid);
        let groupid = ids.attribute(Attribute::GroupId);
        let mut errors = Vec::new();
        if !uid.is_valid() {
            errors.push(ApiError::not_found(Attribute::UserName));
        }
        if !groupid.is_valid() {
            errors.push(ApiError::not_found(Attribute::GroupName));
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let leader = &input[Attribute::Leader];
        let is_leader = leader
            .coalesce(false)
            .map_or_else(|| leader.to_param(), Param::from);
        let upsert = Statement::new(UPSERT_MEMBERSHIP)
            .bind(&uid)
            .bind(&groupid)
            .bind(is_leader)
            .bind(leader.is_valid());
        ctx.tx().exec(&upsert).await.map_err(query_failed)?;

        Ok(serde_json::Value::Null)
    }
}
