use std::sync::Arc;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

mod choices;
mod config;
mod db;
mod error;
mod handlers;
mod membership;
mod middleware;
mod models;
mod policy;
mod status;

#[cfg(test)]
mod tests;

use config::Config;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::tasks::get_tasks,
        handlers::tasks::get_task_choices,
        handlers::tasks::create_task,
        handlers::tasks::create_group_task,
        handlers::tasks::get_task,
        handlers::tasks::update_task,
        handlers::tasks::complete_task,
        handlers::tasks::delete_task,
        handlers::groups::get_groups,
        handlers::groups::create_group,
        handlers::groups::get_group,
        handlers::groups::update_group,
        handlers::groups::delete_group,
        handlers::groups::get_members,
        handlers::groups::manage_members
    ),
    components(
        schemas(
            models::User,
            models::UserSummary,
            models::CreateUser,
            models::LoginRequest,
            models::Token,
            models::TaskStatus,
            models::Task,
            models::CreateTask,
            models::UpdateTask,
            models::TaskEnvelope,
            models::TaskPage,
            models::TaskChoices,
            models::Group,
            models::GroupForm,
            models::GroupEnvelope,
            models::GroupDetail,
            models::MemberRole,
            models::MemberView,
            models::MemberForm,
            models::MemberSelection,
            models::MembershipChange,
            models::FlashLevel,
            models::Flash,
            models::Messages
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, login and logout"),
        (name = "tasks", description = "Personal and group tasks"),
        (name = "groups", description = "Groups and their membership")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            );
        }
    }
}

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    // Inicializar tracing (logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    // Conectar a base de datos
    let pool = db::establish_connection(&config.database_url).await?;

    if let Some(every) = config.overdue_sweep_interval {
        tracing::info!(?every, "periodic overdue sweep enabled");
        status::spawn_sweeper(pool.clone(), every);
    }

    let addr = config.bind_addr;
    let app = create_app(AppState { pool, config });

    // Iniciar servidor
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    // Configurar CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Rutas públicas
        .route("/", get(|| async { "taskboard is running!" }))
        .route("/users", post(handlers::auth::register))
        .route("/token", post(handlers::auth::login))
        // Rutas protegidas
        .route("/logout", post(handlers::auth::logout))
        .route(
            "/tasks",
            get(handlers::tasks::get_tasks).post(handlers::tasks::create_task),
        )
        .route("/tasks/choices", get(handlers::tasks::get_task_choices))
        .route(
            "/tasks/:id",
            get(handlers::tasks::get_task)
                .put(handlers::tasks::update_task)
                .delete(handlers::tasks::delete_task),
        )
        .route("/tasks/:id/complete", post(handlers::tasks::complete_task))
        .route(
            "/groups",
            get(handlers::groups::get_groups).post(handlers::groups::create_group),
        )
        .route(
            "/groups/:id",
            get(handlers::groups::get_group)
                .put(handlers::groups::update_group)
                .delete(handlers::groups::delete_group),
        )
        .route(
            "/groups/:id/members",
            get(handlers::groups::get_members).put(handlers::groups::manage_members),
        )
        .route("/groups/:id/tasks", post(handlers::tasks::create_group_task))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
