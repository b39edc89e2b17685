//! Restricted choice lists for the task form, and validation of submitted
//! values against them.

use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{Group, UserSummary},
    policy::GroupContext,
};

/// Who a task may be assigned to: the group's admin and members when the
/// task belongs to a group, otherwise any active user.
pub async fn assignee_choices(
    pool: &SqlitePool,
    group: Option<&Group>,
) -> Result<Vec<UserSummary>, sqlx::Error> {
    match group {
        Some(group) => {
            sqlx::query_as::<_, UserSummary>(
                "SELECT id, username FROM users
                 WHERE id = ? OR id IN (SELECT user_id FROM memberships WHERE group_id = ?)
                 ORDER BY username",
            )
            .bind(group.admin_id)
            .bind(group.id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, UserSummary>(
                "SELECT id, username FROM users WHERE is_active = 1 ORDER BY username",
            )
            .fetch_all(pool)
            .await
        }
    }
}

/// Groups the user administers or belongs to, by name.
pub async fn group_choices(pool: &SqlitePool, user_id: i64) -> Result<Vec<Group>, sqlx::Error> {
    sqlx::query_as::<_, Group>(
        "SELECT * FROM task_groups
         WHERE admin_id = ? OR id IN (SELECT group_id FROM memberships WHERE user_id = ?)
         ORDER BY name",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn check_assignee(
    pool: &SqlitePool,
    assignee_id: i64,
    group: Option<&Group>,
) -> Result<(), AppError> {
    let allowed = assignee_choices(pool, group).await?;
    if allowed.iter().any(|u| u.id == assignee_id) {
        Ok(())
    } else {
        Err(AppError::ValidationError(format!(
            "Select a valid assignee. {assignee_id} is not one of the available choices."
        )))
    }
}

/// Resolves a submitted group id for an edited task. The group must exist
/// and be one of the requester's choices.
pub async fn resolve_group_choice(
    pool: &SqlitePool,
    group_id: i64,
    user_id: i64,
) -> Result<GroupContext, AppError> {
    let ctx = GroupContext::load(pool, group_id, user_id)
        .await?
        .ok_or_else(|| AppError::dangling("Invalid group specified.", "/tasks"))?;

    if !ctx.participates(user_id) {
        return Err(AppError::ValidationError(format!(
            "Select a valid group. {group_id} is not one of the available choices."
        )));
    }
    Ok(ctx)
}
