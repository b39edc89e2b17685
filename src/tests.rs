use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tower::ServiceExt; // for `oneshot`

use crate::{
    config::Config, create_app, db, error::AppError, handlers::groups::name_write_error, status,
    AppState,
};

struct Harness {
    app: Router,
    pool: SqlitePool,
}

async fn setup_app() -> Harness {
    // In-memory SQLite: a single connection that never gets recycled keeps the schema alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let config = Config {
        database_url: "sqlite::memory:".into(),
        secret_key: "test-secret".into(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        token_ttl_minutes: 30,
        overdue_sweep_interval: None,
    };

    Harness {
        app: create_app(AppState {
            pool: pool.clone(),
            config: Arc::new(config),
        }),
        pool,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Registers `username` and logs in. Returns the user id and a bearer token.
async fn signup(app: &Router, username: &str) -> (i64, String) {
    let (status, user) = send(
        app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{user}");

    let (status, token) = send(
        app,
        "POST",
        "/token",
        None,
        Some(json!({ "username": username, "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    (
        user["id"].as_i64().unwrap(),
        token["access_token"].as_str().unwrap().to_string(),
    )
}

async fn create_group(app: &Router, token: &str, name: &str) -> i64 {
    let (status, body) = send(app, "POST", "/groups", Some(token), Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["group"]["id"].as_i64().unwrap()
}

async fn set_members(app: &Router, token: &str, group_id: i64, members: &[i64]) -> (StatusCode, Value) {
    send(
        app,
        "PUT",
        &format!("/groups/{group_id}/members"),
        Some(token),
        Some(json!({ "members": members })),
    )
    .await
}

async fn create_task(app: &Router, token: &str, uri: &str, body: Value) -> Value {
    let (status, body) = send(app, "POST", uri, Some(token), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["task"].clone()
}

fn days_from_today(n: i64) -> NaiveDate {
    status::today() + Duration::days(n)
}

fn ids_of(page: &Value) -> Vec<i64> {
    page["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_i64().unwrap())
        .collect()
}

async fn membership_rows(pool: &SqlitePool, group_id: i64) -> Vec<i64> {
    sqlx::query_scalar::<_, i64>("SELECT user_id FROM memberships WHERE group_id = ? ORDER BY user_id")
        .bind(group_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

// --- accounts ---

#[tokio::test]
async fn test_register_user() {
    let h = setup_app().await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": "tester",
            "email": "test@example.com",
            "password": "password123"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "tester");
    assert!(body.get("hashed_password").is_none());
}

#[tokio::test]
async fn test_register_rejects_taken_username() {
    let h = setup_app().await;
    signup(&h.app, "ana").await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": "ana",
            "email": "other@example.com",
            "password": "password123"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("username"));
}

#[tokio::test]
async fn test_login_by_email_and_bad_password() {
    let h = setup_app().await;
    signup(&h.app, "ana").await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/token",
        None,
        Some(json!({ "username": "ana@example.com", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("access_token").is_some());

    let (status, _) = send(
        &h.app,
        "POST",
        "/token",
        None,
        Some(json!({ "username": "ana", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_username_and_email_never_shadow_each_other() {
    let h = setup_app().await;
    let (status, first) = send(
        &h.app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": "bob@example.com",
            "email": "first@example.com",
            "password": "password123"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_i64().unwrap();

    // An email that is already somebody's username.
    let (status, body) = send(
        &h.app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": "bob",
            "email": "bob@example.com",
            "password": "password456"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("email"));

    // A username that is already somebody's email.
    let (status, body) = send(
        &h.app,
        "POST",
        "/users",
        None,
        Some(json!({
            "username": "first@example.com",
            "email": "second@example.com",
            "password": "password456"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("username"));

    // Rows written before the check existed: an exact username still wins.
    sqlx::query(
        "INSERT INTO users (username, email, hashed_password, created_at)
         SELECT 'carol', 'bob@example.com', hashed_password, created_at FROM users WHERE id = ?",
    )
    .bind(first_id)
    .execute(&h.pool)
    .await
    .unwrap();

    let (status, token) = send(
        &h.app,
        "POST",
        "/token",
        None,
        Some(json!({ "username": "bob@example.com", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = token["access_token"].as_str().unwrap();
    let task = create_task(&h.app, token, "/tasks", json!({ "title": "whoami" })).await;
    assert_eq!(task["owner_id"].as_i64().unwrap(), first_id);
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let h = setup_app().await;

    let (status, _) = send(&h.app, "GET", "/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;

    let (status, _) = send(&h.app, "POST", "/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("revoked"));
}

// --- tasks ---

#[tokio::test]
async fn test_personal_task_is_assigned_to_creator() {
    let h = setup_app().await;
    let (ana, token) = signup(&h.app, "ana").await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({ "title": "Write report" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["task"]["owner_id"], ana);
    assert_eq!(body["task"]["assignee_id"], ana);
    assert_eq!(body["task"]["status"], "ongoing");
    assert_eq!(body["messages"][0]["level"], "success");
}

#[tokio::test]
async fn test_blank_title_is_rejected() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;

    let (status, _) = send(&h.app, "POST", "/tasks", Some(&token), Some(json!({ "title": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_saving_past_due_task_marks_it_overdue() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;

    let task = create_task(
        &h.app,
        &token,
        "/tasks",
        json!({ "title": "Late already", "due_date": days_from_today(-3).to_string() }),
    )
    .await;
    assert_eq!(task["status"], "overdue");

    // A completed task keeps its status no matter the date.
    let done = create_task(
        &h.app,
        &token,
        "/tasks",
        json!({
            "title": "Done long ago",
            "due_date": days_from_today(-3).to_string(),
            "status": "completed"
        }),
    )
    .await;
    assert_eq!(done["status"], "completed");
}

#[tokio::test]
async fn test_list_fetch_sweeps_stale_tasks_to_overdue() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;
    let task = create_task(&h.app, &token, "/tasks", json!({ "title": "Pay rent" })).await;
    let id = task["id"].as_i64().unwrap();

    // Simulate a task that was ongoing yesterday and whose deadline has now passed.
    sqlx::query("UPDATE tasks SET status = 'ongoing', due_date = ? WHERE id = ?")
        .bind(days_from_today(-1))
        .bind(id)
        .execute(&h.pool)
        .await
        .unwrap();

    let (status, page) = send(&h.app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["status"], "ongoing");
    assert!(!ids_of(&page).contains(&id));

    let stored: String = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(stored, "overdue");

    let (_, page) = send(&h.app, "GET", "/tasks?status=overdue", Some(&token), None).await;
    assert_eq!(ids_of(&page), vec![id]);
    assert_eq!(page["tasks"][0]["status"], "overdue");

    // Sweeping again changes nothing.
    assert_eq!(status::sweep_overdue(&h.pool, status::today()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_filters_and_order() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;

    let later = create_task(
        &h.app,
        &token,
        "/tasks",
        json!({ "title": "later", "due_date": days_from_today(2).to_string() }),
    )
    .await;
    let undated = create_task(&h.app, &token, "/tasks", json!({ "title": "someday" })).await;
    let sooner = create_task(
        &h.app,
        &token,
        "/tasks",
        json!({ "title": "sooner", "due_date": days_from_today(1).to_string() }),
    )
    .await;
    let done = create_task(
        &h.app,
        &token,
        "/tasks",
        json!({ "title": "done", "status": "completed" }),
    )
    .await;

    let (_, page) = send(&h.app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(
        ids_of(&page),
        vec![
            sooner["id"].as_i64().unwrap(),
            later["id"].as_i64().unwrap(),
            undated["id"].as_i64().unwrap()
        ]
    );

    let (_, page) = send(&h.app, "GET", "/tasks?status=completed", Some(&token), None).await;
    assert_eq!(ids_of(&page), vec![done["id"].as_i64().unwrap()]);

    let (_, page) = send(&h.app, "GET", "/tasks?status=all", Some(&token), None).await;
    assert_eq!(page["tasks"].as_array().unwrap().len(), 4);

    let (_, page) = send(&h.app, "GET", "/tasks?status=nonsense", Some(&token), None).await;
    assert_eq!(page["status"], "ongoing");
    assert_eq!(page["tasks"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_only_shows_visible_tasks() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let (_, eve) = signup(&h.app, "eve").await;

    let personal = create_task(&h.app, &ana, "/tasks", json!({ "title": "ana only" })).await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;
    let shared = create_task(
        &h.app,
        &ana,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "for the team" }),
    )
    .await;

    let (_, page) = send(&h.app, "GET", "/tasks", Some(&bob), None).await;
    assert_eq!(ids_of(&page), vec![shared["id"].as_i64().unwrap()]);

    let (_, page) = send(&h.app, "GET", "/tasks", Some(&eve), None).await;
    assert!(ids_of(&page).is_empty());

    let (status, _) = send(
        &h.app,
        "GET",
        &format!("/tasks/{}", personal["id"]),
        Some(&eve),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_outsider_cannot_complete_task() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (_, eve) = signup(&h.app, "eve").await;
    let task = create_task(&h.app, &ana, "/tasks", json!({ "title": "private" })).await;
    let uri = format!("/tasks/{}/complete", task["id"]);

    let (status, body) = send(&h.app, "POST", &uri, Some(&eve), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["redirect"], "/tasks");

    let (_, fresh) = send(&h.app, "GET", &format!("/tasks/{}", task["id"]), Some(&ana), None).await;
    assert_eq!(fresh["status"], "ongoing");
}

#[tokio::test]
async fn test_group_member_can_complete_group_task() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;

    let task = create_task(
        &h.app,
        &ana,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "restart servers" }),
    )
    .await;
    let uri = format!("/tasks/{}/complete", task["id"]);

    let (status, body) = send(&h.app, "POST", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "completed");

    let (status, body) = send(&h.app, "POST", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"][0]["level"], "info");
}

#[tokio::test]
async fn test_member_cannot_edit_but_admin_can() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let (carl_id, carl) = signup(&h.app, "carl").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id, carl_id]).await;

    let task = create_task(
        &h.app,
        &bob,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "bob's task" }),
    )
    .await;
    assert_eq!(task["assignee_id"], bob_id);
    let uri = format!("/tasks/{}", task["id"]);
    let edit = json!({ "title": "renamed", "group_id": group_id, "assignee_id": carl_id });

    let (status, _) = send(&h.app, "PUT", &uri, Some(&carl), Some(edit.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&h.app, "PUT", &uri, Some(&ana), Some(edit)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["title"], "renamed");
    assert_eq!(body["task"]["assignee_id"], carl_id);

    let (status, _) = send(&h.app, "DELETE", &uri, Some(&carl), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&h.app, "DELETE", &uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.app, "GET", &uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_owner_reschedules_overdue_task() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;

    let due = days_from_today(-2).to_string();
    let task = create_task(
        &h.app,
        &bob,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "late", "due_date": due }),
    )
    .await;
    assert_eq!(task["status"], "overdue");
    let uri = format!("/tasks/{}", task["id"]);

    let moved = json!({
        "title": "late",
        "group_id": group_id,
        "assignee_id": bob_id,
        "due_date": days_from_today(5).to_string()
    });
    let (status, body) = send(&h.app, "PUT", &uri, Some(&ana), Some(moved.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let kept = json!({ "title": "still late", "group_id": group_id, "assignee_id": bob_id, "due_date": due });
    let (status, _) = send(&h.app, "PUT", &uri, Some(&ana), Some(kept)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&h.app, "PUT", &uri, Some(&bob), Some(moved)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_group_task_requires_participation() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (_, eve) = signup(&h.app, "eve").await;
    let group_id = create_group(&h.app, &ana, "ops").await;

    let (status, body) = send(
        &h.app,
        "POST",
        &format!("/groups/{group_id}/tasks"),
        Some(&eve),
        Some(json!({ "title": "sneaky" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["redirect"], "/groups");

    let (status, _) = send(
        &h.app,
        "POST",
        "/tasks",
        Some(&eve),
        Some(json!({ "title": "sneaky", "group_id": group_id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.app,
        "POST",
        "/groups/9999/tasks",
        Some(&ana),
        Some(json!({ "title": "nowhere" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_assignee_must_belong_to_group() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (eve_id, _) = signup(&h.app, "eve").await;
    let group_id = create_group(&h.app, &ana, "ops").await;

    let (status, _) = send(
        &h.app,
        "POST",
        &format!("/groups/{group_id}/tasks"),
        Some(&ana),
        Some(json!({ "title": "x", "assignee_id": eve_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Personal tasks may go to anyone.
    let task = create_task(&h.app, &ana, "/tasks", json!({ "title": "x", "assignee_id": eve_id })).await;
    assert_eq!(task["assignee_id"], eve_id);
}

#[tokio::test]
async fn test_task_choices_are_scoped() {
    let h = setup_app().await;
    let (ana_id, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    signup(&h.app, "eve").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    create_group(&h.app, &ana, "admin-only").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;

    let (_, choices) = send(
        &h.app,
        "GET",
        &format!("/tasks/choices?group_id={group_id}"),
        Some(&bob),
        None,
    )
    .await;
    let assignees: Vec<i64> = choices["assignees"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_i64().unwrap())
        .collect();
    assert_eq!(assignees, vec![ana_id, bob_id]);
    assert_eq!(choices["groups"].as_array().unwrap().len(), 1);

    let (_, choices) = send(&h.app, "GET", "/tasks/choices", Some(&ana), None).await;
    assert_eq!(choices["assignees"].as_array().unwrap().len(), 3);
    let names: Vec<&str> = choices["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["admin-only", "ops"]);
}

// --- groups ---

#[tokio::test]
async fn test_reconciliation_adds_removes_and_is_idempotent() {
    let h = setup_app().await;
    let (ana_id, ana) = signup(&h.app, "ana").await;
    let (bob_id, _) = signup(&h.app, "bob").await;
    let (carl_id, _) = signup(&h.app, "carl").await;
    let group_id = create_group(&h.app, &ana, "ops").await;

    // Creating the group leaves the admin without a membership row.
    assert!(membership_rows(&h.pool, group_id).await.is_empty());

    let (status, body) = set_members(&h.app, &ana, group_id, &[bob_id, carl_id]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], json!([bob_id, carl_id]));
    assert_eq!(membership_rows(&h.pool, group_id).await, vec![bob_id, carl_id]);

    let (_, body) = set_members(&h.app, &ana, group_id, &[bob_id, carl_id]).await;
    assert_eq!(body["added"], json!([]));
    assert_eq!(body["removed"], json!([]));
    assert_eq!(membership_rows(&h.pool, group_id).await, vec![bob_id, carl_id]);

    // Dropping bob (and the admin, who cannot be dropped).
    let (_, body) = set_members(&h.app, &ana, group_id, &[carl_id]).await;
    assert_eq!(body["removed"], json!([bob_id]));
    assert_eq!(membership_rows(&h.pool, group_id).await, vec![carl_id]);

    let (_, detail) = send(&h.app, "GET", &format!("/groups/{group_id}"), Some(&ana), None).await;
    let members: Vec<(i64, &str)> = detail["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| (m["id"].as_i64().unwrap(), m["role"].as_str().unwrap()))
        .collect();
    assert_eq!(members, vec![(ana_id, "admin"), (carl_id, "member")]);
    assert_eq!(detail["is_admin"], true);

    // Submitting the admin explicitly never creates a row for them.
    set_members(&h.app, &ana, group_id, &[ana_id, carl_id]).await;
    assert_eq!(membership_rows(&h.pool, group_id).await, vec![carl_id]);
}

#[tokio::test]
async fn test_unknown_member_rejects_whole_submission() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, _) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;

    let (status, _) = set_members(&h.app, &ana, group_id, &[bob_id, 4242]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(membership_rows(&h.pool, group_id).await.is_empty());
}

#[tokio::test]
async fn test_only_admin_manages_group() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;

    let (status, body) = set_members(&h.app, &bob, group_id, &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["redirect"], "/groups");
    assert_eq!(membership_rows(&h.pool, group_id).await, vec![bob_id]);

    let uri = format!("/groups/{group_id}");
    let (status, _) = send(&h.app, "PUT", &uri, Some(&bob), Some(json!({ "name": "mine" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&h.app, "DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, form) = send(&h.app, "GET", &format!("{uri}/members"), Some(&ana), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(form["selected"], json!([bob_id]));
    assert_eq!(form["choices"].as_array().unwrap().len(), 1);

    let (status, body) = send(&h.app, "PUT", &uri, Some(&ana), Some(json!({ "name": "platform" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group"]["name"], "platform");
}

#[tokio::test]
async fn test_group_visibility_and_unique_names() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (_, eve) = signup(&h.app, "eve").await;
    let group_id = create_group(&h.app, &ana, "ops").await;

    let (status, _) = send(&h.app, "GET", &format!("/groups/{group_id}"), Some(&eve), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, groups) = send(&h.app, "GET", "/groups", Some(&eve), None).await;
    assert!(groups.as_array().unwrap().is_empty());

    let (status, _) = send(&h.app, "POST", "/groups", Some(&eve), Some(json!({ "name": "ops" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deleting_group_removes_its_tasks() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, _) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;
    let task = create_task(
        &h.app,
        &ana,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "gone soon" }),
    )
    .await;

    let (status, _) = send(&h.app, "DELETE", &format!("/groups/{group_id}"), Some(&ana), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&h.app, "GET", &format!("/tasks/{}", task["id"]), Some(&ana), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(membership_rows(&h.pool, group_id).await.is_empty());
}

#[tokio::test]
async fn test_due_date_beyond_year_9999_is_rejected() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({ "title": "far future", "due_date": "+10000-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let task = create_task(&h.app, &token, "/tasks", json!({ "title": "far future" })).await;
    let uri = format!("/tasks/{}", task["id"]);
    let (status, _) = send(
        &h.app,
        "PUT",
        &uri,
        Some(&token),
        Some(json!({ "title": "far future", "due_date": "+10000-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing stored, so listing and sweeping leave the task alone.
    let (status, page) = send(&h.app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids_of(&page), vec![task["id"].as_i64().unwrap()]);
    assert_eq!(page["tasks"][0]["status"], "ongoing");
    assert!(page["tasks"][0]["due_date"].is_null());
}

#[tokio::test]
async fn test_same_due_date_lists_newest_first() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;
    let due = days_from_today(3).to_string();

    let older = create_task(&h.app, &token, "/tasks", json!({ "title": "older", "due_date": due })).await;
    let newer = create_task(&h.app, &token, "/tasks", json!({ "title": "newer", "due_date": due })).await;

    let (_, page) = send(&h.app, "GET", "/tasks", Some(&token), None).await;
    assert_eq!(
        ids_of(&page),
        vec![newer["id"].as_i64().unwrap(), older["id"].as_i64().unwrap()]
    );
}

#[tokio::test]
async fn test_background_sweeper_marks_stale_tasks_overdue() {
    let h = setup_app().await;
    let (_, token) = signup(&h.app, "ana").await;
    let task = create_task(&h.app, &token, "/tasks", json!({ "title": "Pay rent" })).await;
    let id = task["id"].as_i64().unwrap();

    sqlx::query("UPDATE tasks SET status = 'ongoing', due_date = ? WHERE id = ?")
        .bind(days_from_today(-1))
        .bind(id)
        .execute(&h.pool)
        .await
        .unwrap();

    let sweeper = status::spawn_sweeper(h.pool.clone(), std::time::Duration::from_millis(20));

    let mut stored = String::new();
    for _ in 0..250 {
        stored = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
        if stored == "overdue" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    sweeper.abort();

    assert_eq!(stored, "overdue");
}

#[tokio::test]
async fn test_reopening_overdue_task_with_new_date_is_allowed() {
    let h = setup_app().await;
    let (_, ana) = signup(&h.app, "ana").await;
    let (bob_id, bob) = signup(&h.app, "bob").await;
    let group_id = create_group(&h.app, &ana, "ops").await;
    set_members(&h.app, &ana, group_id, &[bob_id]).await;

    let task = create_task(
        &h.app,
        &bob,
        &format!("/groups/{group_id}/tasks"),
        json!({ "title": "late", "due_date": days_from_today(-2).to_string() }),
    )
    .await;
    assert_eq!(task["status"], "overdue");

    let (status, body) = send(
        &h.app,
        "PUT",
        &format!("/tasks/{}", task["id"]),
        Some(&ana),
        Some(json!({
            "title": "late",
            "group_id": group_id,
            "assignee_id": bob_id,
            "due_date": days_from_today(5).to_string(),
            "status": "ongoing"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["task"]["status"], "ongoing");
}

#[tokio::test]
async fn test_group_name_race_reads_as_validation_error() {
    let h = setup_app().await;
    let (ana_id, _) = signup(&h.app, "ana").await;

    let insert = || {
        sqlx::query("INSERT INTO task_groups (name, admin_id, created_at) VALUES ('ops', ?, ?)")
            .bind(ana_id)
            .bind(chrono::Utc::now().naive_utc())
            .execute(&h.pool)
    };
    insert().await.unwrap();
    let err = insert().await.unwrap_err();

    match name_write_error(err) {
        AppError::ValidationError(message) => {
            assert_eq!(message, "Group with this name already exists.")
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}
