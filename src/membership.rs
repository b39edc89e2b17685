//! Group membership: the effective member list and reconciliation of a
//! submitted member set against the stored rows.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use sqlx::{FromRow, SqlitePool};

use crate::{
    error::AppError,
    models::{Group, MemberRole, MemberView, UserSummary},
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipPlan {
    pub to_add: BTreeSet<i64>,
    pub to_remove: BTreeSet<i64>,
}

impl MembershipPlan {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diffs the desired member set against the current one. The admin is
/// always part of the desired set and is never added or removed.
pub fn plan(
    admin_id: i64,
    current: impl IntoIterator<Item = i64>,
    desired: impl IntoIterator<Item = i64>,
) -> MembershipPlan {
    let current: BTreeSet<i64> = current.into_iter().filter(|&id| id != admin_id).collect();
    let mut desired: BTreeSet<i64> = desired.into_iter().collect();
    desired.insert(admin_id);

    MembershipPlan {
        to_add: desired
            .difference(&current)
            .copied()
            .filter(|&id| id != admin_id)
            .collect(),
        to_remove: current.difference(&desired).copied().collect(),
    }
}

/// User ids with a membership row in the group, admin excluded.
pub async fn current_members(pool: &SqlitePool, group: &Group) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM memberships WHERE group_id = ? AND user_id != ? ORDER BY date_joined, id",
    )
    .bind(group.id)
    .bind(group.admin_id)
    .fetch_all(pool)
    .await
}

/// Applies the admin's submitted member set in one transaction.
pub async fn reconcile(
    pool: &SqlitePool,
    group: &Group,
    desired: &[i64],
) -> Result<MembershipPlan, AppError> {
    let wanted: BTreeSet<i64> = desired.iter().copied().collect();
    let mut tx = pool.begin().await?;

    for &user_id in &wanted {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::ValidationError(format!(
                "Select a valid choice. {user_id} is not one of the available choices."
            )));
        }
    }

    let current = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM memberships WHERE group_id = ? AND user_id != ?",
    )
    .bind(group.id)
    .bind(group.admin_id)
    .fetch_all(&mut *tx)
    .await?;

    let plan = plan(group.admin_id, current, wanted);
    let now = chrono::Utc::now().naive_utc();

    for &user_id in &plan.to_add {
        sqlx::query("INSERT OR IGNORE INTO memberships (user_id, group_id, date_joined) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(group.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    for &user_id in &plan.to_remove {
        sqlx::query("DELETE FROM memberships WHERE group_id = ? AND user_id = ?")
            .bind(group.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    if plan.is_noop() {
        tracing::debug!(group_id = group.id, "group membership unchanged");
        return Ok(plan);
    }
    tracing::info!(
        group_id = group.id,
        added = ?plan.to_add,
        removed = ?plan.to_remove,
        "group membership reconciled"
    );
    Ok(plan)
}

#[derive(FromRow)]
struct MemberRow {
    id: i64,
    username: String,
    date_joined: NaiveDateTime,
}

/// Admin plus members, ordered by username.
pub async fn effective_members(pool: &SqlitePool, group: &Group) -> Result<Vec<MemberView>, sqlx::Error> {
    let admin = sqlx::query_as::<_, UserSummary>("SELECT id, username FROM users WHERE id = ?")
        .bind(group.admin_id)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query_as::<_, MemberRow>(
        "SELECT u.id, u.username, m.date_joined FROM memberships m
         JOIN users u ON u.id = m.user_id
         WHERE m.group_id = ? AND m.user_id != ?",
    )
    .bind(group.id)
    .bind(group.admin_id)
    .fetch_all(pool)
    .await?;

    let mut members: Vec<MemberView> = rows
        .into_iter()
        .map(|row| MemberView {
            id: row.id,
            username: row.username,
            role: MemberRole::Member,
            date_joined: Some(row.date_joined),
        })
        .collect();
    members.push(MemberView {
        id: admin.id,
        username: admin.username,
        role: MemberRole::Admin,
        date_joined: None,
    });
    members.sort_by(|a, b| a.username.cmp(&b.username));

    Ok(members)
}
