use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use utoipa::IntoParams;

use crate::{
    choices::{assignee_choices, check_assignee, group_choices, resolve_group_choice},
    error::AppError,
    middleware::CurrentUser,
    models::{
        CreateTask, Flash, Group, Messages, Task, TaskChoices, TaskEnvelope, TaskPage, TaskStatus,
        UpdateTask, User,
    },
    policy::{default_assignee, Action, Assignment, Authorize, GroupContext, TaskContext},
    status::{self, StatusFilter, LIST_ORDER},
};

const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskListParams {
    /// `ongoing` (default), `completed`, `overdue` or `all`.
    pub status: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChoiceParams {
    pub group_id: Option<i64>,
}

fn clean_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::ValidationError("Title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::ValidationError(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

/// Dates are stored as text and compared as text, which only orders
/// correctly for four-digit years.
fn check_due_date(due: Option<NaiveDate>) -> Result<(), AppError> {
    match due {
        Some(date) if !(1..=9999).contains(&date.year()) => Err(AppError::ValidationError(
            "Due date must fall between the years 1 and 9999".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Writes every editable field back, settling the status against today's date first.
async fn save_task(pool: &SqlitePool, mut task: Task) -> Result<Task, AppError> {
    task.status = task.status.settle(task.due_date, status::today());
    task.updated_at = Utc::now().naive_utc();

    sqlx::query(
        "UPDATE tasks SET
            title = ?, description = ?, assignee_id = ?, group_id = ?,
            status = ?, due_date = ?, updated_at = ?
        WHERE id = ?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.assignee_id)
    .bind(task.group_id)
    .bind(task.status)
    .bind(task.due_date)
    .bind(task.updated_at)
    .bind(task.id)
    .execute(pool)
    .await?;

    Ok(task)
}

async fn create_in(
    pool: &SqlitePool,
    user: &User,
    payload: CreateTask,
    group_id: Option<i64>,
) -> Result<(StatusCode, Json<TaskEnvelope>), AppError> {
    let title = clean_title(&payload.title)?;
    check_due_date(payload.due_date)?;

    let group = match group_id {
        Some(id) => {
            let ctx = GroupContext::load(pool, id, user.id)
                .await?
                .ok_or_else(|| AppError::dangling("Invalid group specified.", "/tasks"))?;
            ctx.authorize(user.id, Action::AddTask)?;
            Some(ctx)
        }
        None => None,
    };

    let mut messages = Vec::new();
    let assignee_id = match payload.assignee_id {
        Some(id) => {
            check_assignee(pool, id, group.as_ref().map(|g| &g.group)).await?;
            Some(id)
        }
        None => match default_assignee(user.id, group.as_ref()) {
            Assignment::Assign(id) => Some(id),
            Assignment::Unassigned(warning) => {
                messages.push(Flash::warning(warning));
                None
            }
        },
    };

    let now = Utc::now().naive_utc();
    let initial_status = payload.status.settle(payload.due_date, status::today());

    let id = sqlx::query(
        "INSERT INTO tasks
            (title, description, owner_id, assignee_id, group_id, status, due_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&title)
    .bind(&payload.description)
    .bind(user.id)
    .bind(assignee_id)
    .bind(group.as_ref().map(|g| g.group.id))
    .bind(initial_status)
    .bind(payload.due_date)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    tracing::info!(task_id = task.id, owner_id = user.id, group_id = ?task.group_id, "task created");
    messages.push(Flash::success("Task created successfully!"));
    Ok((StatusCode::CREATED, Json(TaskEnvelope { task, messages })))
}

/// Tasks in a group, in list order.
pub async fn tasks_of_group(pool: &SqlitePool, group_id: i64) -> Result<Vec<Task>, sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT t.* FROM tasks t WHERE t.group_id = ");
    qb.push_bind(group_id).push(LIST_ORDER);
    qb.build_query_as::<Task>().fetch_all(pool).await
}

#[utoipa::path(
    get,
    path = "/tasks",
    params(TaskListParams),
    responses(
        (status = 200, description = "Tasks visible to the requester", body = TaskPage),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn get_tasks(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Query(params): Query<TaskListParams>,
) -> Result<Json<TaskPage>, AppError> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(100).clamp(1, 100);
    let filter = StatusFilter::from_param(params.status.as_deref());
    let today = status::today();

    status::sweep_overdue(&pool, today).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT t.* FROM tasks t LEFT JOIN task_groups g ON g.id = t.group_id WHERE (t.owner_id = ",
    );
    qb.push_bind(user.id)
        .push(" OR t.assignee_id = ")
        .push_bind(user.id)
        .push(" OR g.admin_id = ")
        .push_bind(user.id)
        .push(" OR EXISTS (SELECT 1 FROM memberships m WHERE m.group_id = t.group_id AND m.user_id = ")
        .push_bind(user.id)
        .push("))");
    filter.push_clause(&mut qb, today);
    qb.push(LIST_ORDER)
        .push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(skip);

    let tasks = qb.build_query_as::<Task>().fetch_all(&pool).await?;
    debug_assert!(tasks.iter().all(|t| filter.matches(t, today)));

    Ok(Json(TaskPage {
        status: filter.as_str().to_string(),
        tasks,
    }))
}

#[utoipa::path(
    get,
    path = "/tasks/choices",
    params(ChoiceParams),
    responses(
        (status = 200, description = "Assignee and group choices for the task form", body = TaskChoices),
        (status = 403, description = "Not a participant of the group"),
        (status = 422, description = "Group does not exist")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn get_task_choices(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Query(params): Query<ChoiceParams>,
) -> Result<Json<TaskChoices>, AppError> {
    let group: Option<Group> = match params.group_id {
        Some(id) => {
            let ctx = GroupContext::load(&pool, id, user.id)
                .await?
                .ok_or_else(|| AppError::dangling("Invalid group specified.", "/tasks"))?;
            ctx.authorize(user.id, Action::AddTask)?;
            Some(ctx.group)
        }
        None => None,
    };

    Ok(Json(TaskChoices {
        assignees: assignee_choices(&pool, group.as_ref()).await?,
        groups: group_choices(&pool, user.id).await?,
    }))
}

#[utoipa::path(
    post,
    path = "/tasks",
    request_body = CreateTask,
    responses(
        (status = 201, description = "Task created successfully", body = TaskEnvelope),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not allowed to add tasks to the group"),
        (status = 422, description = "Group does not exist")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn create_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Json(payload): Json<CreateTask>,
) -> Result<(StatusCode, Json<TaskEnvelope>), AppError> {
    let group_id = payload.group_id;
    create_in(&pool, &user, payload, group_id).await
}

#[utoipa::path(
    post,
    path = "/groups/{id}/tasks",
    params(
        ("id" = i64, Path, description = "Group ID")
    ),
    request_body = CreateTask,
    responses(
        (status = 201, description = "Task created in the group", body = TaskEnvelope),
        (status = 403, description = "Not allowed to add tasks to the group"),
        (status = 422, description = "Group does not exist")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn create_group_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(group_id): Path<i64>,
    Json(payload): Json<CreateTask>,
) -> Result<(StatusCode, Json<TaskEnvelope>), AppError> {
    create_in(&pool, &user, payload, Some(group_id)).await
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Get task details", body = Task),
        (status = 403, description = "Not allowed to see the task"),
        (status = 404, description = "Task not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Task>, AppError> {
    let ctx = TaskContext::load(&pool, id, user.id).await?;
    ctx.authorize(user.id, Action::View)?;
    Ok(Json(ctx.task))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    request_body = UpdateTask,
    responses(
        (status = 200, description = "Task updated", body = TaskEnvelope),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Only the owner or group admin may edit"),
        (status = 404, description = "Task not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn update_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTask>,
) -> Result<Json<TaskEnvelope>, AppError> {
    let ctx = TaskContext::load(&pool, id, user.id).await?;
    ctx.authorize(user.id, Action::Modify)?;
    let TaskContext { mut task, group } = ctx;

    let title = clean_title(&payload.title)?;
    check_due_date(payload.due_date)?;

    // Judged on the status the task is being saved with, so reopening a task
    // together with a new date is a reschedule anyone who may edit can make.
    if payload.due_date != task.due_date
        && payload.status.unwrap_or(task.status) == TaskStatus::Overdue
        && user.id != task.owner_id
    {
        return Err(AppError::ValidationError(
            "Only the task owner can change the due date of an overdue task.".to_string(),
        ));
    }

    let group = match payload.group_id {
        Some(group_id) if Some(group_id) == task.group_id => group.map(|g| g.group),
        Some(group_id) => Some(resolve_group_choice(&pool, group_id, user.id).await?.group),
        None => None,
    };

    if let Some(assignee_id) = payload.assignee_id {
        check_assignee(&pool, assignee_id, group.as_ref()).await?;
    }

    task.title = title;
    task.description = payload.description;
    task.due_date = payload.due_date;
    task.assignee_id = payload.assignee_id;
    task.group_id = group.as_ref().map(|g| g.id);
    if let Some(status) = payload.status {
        task.status = status;
    }

    let task = save_task(&pool, task).await?;

    tracing::info!(task_id = task.id, user_id = user.id, "task updated");
    Ok(Json(TaskEnvelope {
        task,
        messages: vec![Flash::success("Task updated successfully!")],
    }))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/complete",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task completed (or already was)", body = TaskEnvelope),
        (status = 403, description = "Not involved in the task"),
        (status = 404, description = "Task not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn complete_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<TaskEnvelope>, AppError> {
    let ctx = TaskContext::load(&pool, id, user.id).await?;
    ctx.authorize(user.id, Action::Complete)?;
    let mut task = ctx.task;

    if task.status == TaskStatus::Completed {
        return Ok(Json(TaskEnvelope {
            task,
            messages: vec![Flash::info("Task is already completed.")],
        }));
    }

    task.status = TaskStatus::Completed;
    let task = save_task(&pool, task).await?;

    tracing::info!(task_id = task.id, user_id = user.id, "task completed");
    Ok(Json(TaskEnvelope {
        task,
        messages: vec![Flash::success("Task marked as completed.")],
    }))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task deleted", body = Messages),
        (status = 403, description = "Only the owner or group admin may delete"),
        (status = 404, description = "Task not found")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "tasks"
)]
pub async fn delete_task(
    State(pool): State<SqlitePool>,
    CurrentUser { user, .. }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Messages>, AppError> {
    let ctx = TaskContext::load(&pool, id, user.id).await?;
    ctx.authorize(user.id, Action::Delete)?;

    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Task not found".to_string()));
    }

    tracing::info!(task_id = id, user_id = user.id, "task deleted");
    Ok(Json(Messages {
        messages: vec![Flash::success("Task deleted successfully.")],
    }))
}
