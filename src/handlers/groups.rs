use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    choices::group_choices,
    error::AppError,
    handlers::tasks::tasks_of_group,
    membership::{self, current_members, effective_members},
    middleware::CurrentUser,
    models::{
        Flash, Group, GroupDetail, GroupEnvelope, GroupForm, MemberForm, MemberSelection,
        MembershipChange, Messages, UserSummary,
    },
    policy::{Action, Authorize, GroupContext},
};

const MAX_NAME_LEN: usize = 255;

async fn clean_name(pool: &SqlitePool, name: &str, except: Option<i64>) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::ValidationError(format!(
            "Group name must be between 1 and {MAX_NAME_LEN} characters"
        )));
    }

    let clash = sqlx::query("SELECT 1 FROM task_groups WHERE name = ? AND id != ?")
        .bind(name)
        .bind(except.unwrap_or(-1))
        .fetch_optional(pool)
        .await?;
    if clash.is_some() {
        return Err(name_taken());
    }

    Ok(name.to_string())
}

fn name_taken() -> AppError {
    AppError::ValidationError("Group with this name already exists.".to_string())
}

/// A write that loses a race on the unique name still reads as a name clash.
pub(crate) fn name_write_error(e: sqlx::Error) -> AppError {
    if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
        name_taken()
    } else {
        AppError::SqlxError(e)
    }
}

/// Loads a group for an admin-only action. Unknown ids are a 404.
async fn managed_group(pool: &SqlitePool, id: i64, user_id: i64) -> Result<Group, AppError> {
    let ctx = GroupContext::load(pool, id, user_id)
        .await?
        .ok_or(AppError::NotFound("Group not found".to_string()))?;
    ctx.authorize(user_id, Action::Manage)?;
    Ok(ctx.group)
}

#[utoipa::path(
    get,
    path = "/groups",
    responses(
        (status = 200, description = "Groups the requester administers or belongs to", body = Vec<Group>),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn get_groups(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
) -> Result<Json<Vec<Group>>, AppError> {
    Ok(Json(group_choices(&pool, user.id).await?))
}

#[utoipa::path(
    post,
    path = "/groups",
    request_body = GroupForm,
    responses(
        (status = 201, description = "Group created, requester is its admin", body = GroupEnvelope),
        (status = 400, description = "Invalid or duplicate name")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn create_group(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Json(payload): Json<GroupForm>,
) -> Result<(StatusCode, Json<GroupEnvelope>), AppError> {
    let name = clean_name(&pool, &payload.name, None).await?;

    // The creator becomes admin; admins never get a membership row.
    let id = sqlx::query("INSERT INTO task_groups (name, admin_id, created_at) VALUES (?, ?, ?)")
        .bind(&name)
        .bind(user.id)
        .bind(Utc::now().naive_utc())
        .execute(&pool)
        .await
        .map_err(name_write_error)?
        .last_insert_rowid();

    let group = sqlx::query_as::<_, Group>("SELECT * FROM task_groups WHERE id = ?")
        .bind(id)
        .fetch_one(&pool)
        .await?;

    tracing::info!(group_id = group.id, admin_id = user.id, "group created");
    let messages = vec![Flash::success(format!("Group \"{}\" created successfully!", group.name))];
    Ok((StatusCode::CREATED, Json(GroupEnvelope { group, messages })))
}

#[utoipa::path(
    get,
    path = "/groups/{id}",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    responses(
        (status = 200, description = "Group with members and tasks", body = GroupDetail),
        (status = 404, description = "Group not found or not visible")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn get_group(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<GroupDetail>, AppError> {
    let ctx = GroupContext::load(&pool, id, user.id)
        .await?
        .filter(|ctx| ctx.permits(user.id, Action::View))
        .ok_or(AppError::NotFound("Group not found".to_string()))?;

    let members = effective_members(&pool, &ctx.group).await?;
    let tasks = tasks_of_group(&pool, ctx.group.id).await?;

    Ok(Json(GroupDetail {
        is_admin: ctx.is_admin(user.id),
        group: ctx.group,
        members,
        tasks,
    }))
}

#[utoipa::path(
    put,
    path = "/groups/{id}",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    request_body = GroupForm,
    responses(
        (status = 200, description = "Group renamed", body = GroupEnvelope),
        (status = 400, description = "Invalid or duplicate name"),
        (status = 403, description = "Not the group admin"),
        (status = 404, description = "Group not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn update_group(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<GroupForm>,
) -> Result<Json<GroupEnvelope>, AppError> {
    let mut group = managed_group(&pool, id, user.id).await?;
    let name = clean_name(&pool, &payload.name, Some(group.id)).await?;

    sqlx::query("UPDATE task_groups SET name = ? WHERE id = ?")
        .bind(&name)
        .bind(group.id)
        .execute(&pool)
        .await
        .map_err(name_write_error)?;
    group.name = name;

    tracing::info!(group_id = group.id, "group renamed");
    let messages = vec![Flash::success(format!("Group \"{}\" updated successfully.", group.name))];
    Ok(Json(GroupEnvelope { group, messages }))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    responses(
        (status = 200, description = "Group and its tasks deleted", body = Messages),
        (status = 403, description = "Not the group admin"),
        (status = 404, description = "Group not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn delete_group(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Messages>, AppError> {
    let group = managed_group(&pool, id, user.id).await?;

    // Tasks and memberships go with it (ON DELETE CASCADE).
    sqlx::query("DELETE FROM task_groups WHERE id = ?")
        .bind(group.id)
        .execute(&pool)
        .await?;

    tracing::info!(group_id = group.id, "group deleted");
    Ok(Json(Messages {
        messages: vec![Flash::success(format!("Group \"{}\" deleted successfully.", group.name))],
    }))
}

#[utoipa::path(
    get,
    path = "/groups/{id}/members",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    responses(
        (status = 200, description = "Selectable users and current selection", body = MemberForm),
        (status = 403, description = "Not the group admin"),
        (status = 404, description = "Group not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn get_members(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<MemberForm>, AppError> {
    let group = managed_group(&pool, id, user.id).await?;

    let choices = sqlx::query_as::<_, UserSummary>(
        "SELECT id, username FROM users WHERE id != ? ORDER BY username",
    )
    .bind(group.admin_id)
    .fetch_all(&pool)
    .await?;
    let selected = current_members(&pool, &group).await?;

    Ok(Json(MemberForm {
        group,
        choices,
        selected,
    }))
}

#[utoipa::path(
    put,
    path = "/groups/{id}/members",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    request_body = MemberSelection,
    responses(
        (status = 200, description = "Membership reconciled", body = MembershipChange),
        (status = 400, description = "Unknown user in the selection"),
        (status = 403, description = "Not the group admin"),
        (status = 404, description = "Group not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "groups"
)]
pub async fn manage_members(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<MemberSelection>,
) -> Result<Json<MembershipChange>, AppError> {
    let group = managed_group(&pool, id, user.id).await?;
    let plan = membership::reconcile(&pool, &group, &payload.members).await?;

    Ok(Json(MembershipChange {
        added: plan.to_add.into_iter().collect(),
        removed: plan.to_remove.into_iter().collect(),
        messages: vec![Flash::success(format!(
            "Members for group \"{}\" updated successfully.",
            group.name
        ))],
    }))
}
