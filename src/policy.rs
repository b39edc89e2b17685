//! Who may do what to a task or a group.
//!
//! Every check goes through [`Authorize`], implemented for a task and for a
//! group as seen by one requester. The contexts are loaded once per request
//! and hold everything the predicates need, so the predicates stay pure.
//!
//! A group admin never has a membership row. "Member" below always means a
//! user with a row; the admin is handled explicitly wherever it counts.

use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{Group, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Modify,
    Delete,
    Complete,
    /// Edit, delete or change the members of a group.
    Manage,
    /// Create a task inside a group.
    AddTask,
}

pub trait Authorize {
    fn permits(&self, user_id: i64, action: Action) -> bool;

    /// The denial the user sees, and where they are sent back to.
    fn denial(&self, action: Action) -> AppError;

    fn authorize(&self, user_id: i64, action: Action) -> Result<(), AppError> {
        if self.permits(user_id, action) {
            Ok(())
        } else {
            Err(self.denial(action))
        }
    }
}

/// A group together with the requester's standing in it.
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub group: Group,
    /// The requester has a membership row.
    pub is_member: bool,
}

impl GroupContext {
    pub async fn load(pool: &SqlitePool, group_id: i64, user_id: i64) -> Result<Option<Self>, AppError> {
        let Some(group) = sqlx::query_as::<_, Group>("SELECT * FROM task_groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(pool)
            .await?
        else {
            return Ok(None);
        };

        let is_member = is_member(pool, group.id, user_id).await?;
        Ok(Some(Self { group, is_member }))
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.group.admin_id == user_id
    }

    /// Admin or member.
    pub fn participates(&self, user_id: i64) -> bool {
        self.is_admin(user_id) || self.is_member
    }
}

impl Authorize for GroupContext {
    fn permits(&self, user_id: i64, action: Action) -> bool {
        match action {
            Action::View | Action::AddTask => self.participates(user_id),
            Action::Modify | Action::Delete | Action::Manage => self.is_admin(user_id),
            Action::Complete => false,
        }
    }

    fn denial(&self, action: Action) -> AppError {
        match action {
            Action::AddTask => AppError::denied(
                "You do not have permission to add tasks to this group.",
                "/groups",
            ),
            _ => AppError::denied("You must be the group admin to perform this action.", "/groups"),
        }
    }
}

/// A task, its group if any, and the requester's standing in that group.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: Task,
    pub group: Option<GroupContext>,
}

impl TaskContext {
    pub async fn load(pool: &SqlitePool, task_id: i64, user_id: i64) -> Result<Self, AppError> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("Task not found".to_string()))?;

        let group = match task.group_id {
            Some(group_id) => GroupContext::load(pool, group_id, user_id).await?,
            None => None,
        };

        Ok(Self { task, group })
    }

    fn is_owner(&self, user_id: i64) -> bool {
        self.task.owner_id == user_id
    }

    fn is_assignee(&self, user_id: i64) -> bool {
        self.task.assignee_id == Some(user_id)
    }

    fn is_group_admin(&self, user_id: i64) -> bool {
        self.group.as_ref().is_some_and(|g| g.is_admin(user_id))
    }

    fn is_group_member(&self) -> bool {
        self.group.as_ref().is_some_and(|g| g.is_member)
    }
}

impl Authorize for TaskContext {
    fn permits(&self, user_id: i64, action: Action) -> bool {
        match action {
            Action::Modify | Action::Delete => self.is_owner(user_id) || self.is_group_admin(user_id),
            Action::View | Action::Complete => {
                self.is_owner(user_id)
                    || self.is_assignee(user_id)
                    || self.is_group_admin(user_id)
                    || self.is_group_member()
            }
            Action::Manage | Action::AddTask => false,
        }
    }

    fn denial(&self, action: Action) -> AppError {
        let message = match action {
            Action::Complete => "You do not have permission to complete this task.",
            Action::View => "You do not have permission to view this task.",
            _ => "You do not have permission to perform this action on this task.",
        };
        AppError::denied(message, "/tasks")
    }
}

pub async fn is_member(pool: &SqlitePool, group_id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM memberships WHERE group_id = ? AND user_id = ?")
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Outcome of picking an assignee for a new task when none was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Assign(i64),
    /// Left unassigned; the message explains why.
    Unassigned(&'static str),
}

pub fn default_assignee(requester: i64, group: Option<&GroupContext>) -> Assignment {
    match group {
        None => Assignment::Assign(requester),
        Some(g) if g.participates(requester) => Assignment::Assign(requester),
        Some(_) => Assignment::Unassigned(
            "Task created for group but no assignee selected, and you are not a member to self-assign. It is unassigned.",
        ),
    }
}
