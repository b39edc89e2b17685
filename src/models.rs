use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

// --- Domain Models (Mapped to DB) ---

#[derive(Debug, Serialize, FromRow, Clone, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)] // No serializar el hash en la respuesta JSON
    pub hashed_password: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// The public face of a user, as offered in choice lists and member views.
#[derive(Debug, Serialize, FromRow, Clone, PartialEq, Eq, ToSchema)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Ongoing,
    Completed,
    Overdue,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: i64,
    pub assignee_id: Option<i64>,
    pub group_id: Option<i64>,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub admin_id: i64,
    pub created_at: NaiveDateTime,
}

// --- Request DTOs ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub assignee_id: Option<i64>,
    /// Ignored when the task is created through `/groups/{id}/tasks`.
    pub group_id: Option<i64>,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Full replacement of the editable task fields. `status` is kept when omitted.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub assignee_id: Option<i64>,
    pub group_id: Option<i64>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupForm {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberSelection {
    #[serde(default)]
    pub members: Vec<i64>,
}

// --- Response DTOs ---

#[derive(Debug, Serialize, ToSchema)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
}

/// A one-shot message for the user, shown after the action that produced it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Flash {
    pub level: FlashLevel,
    pub text: String,
}

impl Flash {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: FlashLevel::Success, text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self { level: FlashLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: FlashLevel::Warning, text: text.into() }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskEnvelope {
    pub task: Task,
    pub messages: Vec<Flash>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupEnvelope {
    pub group: Group,
    pub messages: Vec<Flash>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Messages {
    pub messages: Vec<Flash>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskPage {
    /// The filter that was actually applied.
    pub status: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskChoices {
    pub assignees: Vec<UserSummary>,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberView {
    pub id: i64,
    pub username: String,
    pub role: MemberRole,
    /// `None` for the admin, who has no membership row.
    pub date_joined: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupDetail {
    pub group: Group,
    pub is_admin: bool,
    pub members: Vec<MemberView>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberForm {
    pub group: Group,
    pub choices: Vec<UserSummary>,
    pub selected: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipChange {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    pub messages: Vec<Flash>,
}

// Claims para JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Username
    pub exp: usize,
    pub jti: String,
}
