use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::StatusCode, Json};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    middleware::CurrentUser,
    models::{Claims, CreateUser, Flash, LoginRequest, Messages, Token, User},
};

const MIN_PASSWORD_LEN: usize = 8;

fn validate_registration(payload: &CreateUser) -> Result<(), AppError> {
    let username = payload.username.trim();
    if username.is_empty() || username.len() > 150 {
        return Err(AppError::ValidationError(
            "Username must be between 1 and 150 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(AppError::ValidationError(
            "Username may contain only letters, digits and @/./+/-/_".to_string(),
        ));
    }
    let email = payload.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(AppError::ValidationError("Enter a valid email address".to_string())),
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn now_secs() -> Result<usize, AppError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .map_err(|e| AppError::InternalError(e.to_string()))
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created successfully", body = User),
        (status = 400, description = "Username or email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    validate_registration(&payload)?;
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    // 1. Verificar si el usuario ya existe.
    // Login accepts either column, so a username may not match any email and
    // an email may not match any username.
    let taken = sqlx::query_scalar::<_, String>(
        "SELECT CASE WHEN username = ? OR email = ? THEN 'username' ELSE 'email' END
         FROM users WHERE username IN (?, ?) OR email IN (?, ?)
         LIMIT 1",
    )
    .bind(&username)
    .bind(username.to_lowercase())
    .bind(&username)
    .bind(&email)
    .bind(username.to_lowercase())
    .bind(&email)
    .fetch_optional(&pool)
    .await?;

    if let Some(field) = taken {
        return Err(AppError::ValidationError(format!("A user with that {field} already exists")));
    }

    // 2. Hash de contraseña
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .to_string();

    // 3. Insertar usuario
    let id = sqlx::query(
        "INSERT INTO users (username, email, hashed_password, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(&email)
    .bind(&password_hash)
    .bind(chrono::Utc::now().naive_utc())
    .execute(&pool)
    .await?
    .last_insert_rowid();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&pool)
        .await?;

    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/token",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = Token),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login(
    State(pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Token>, AppError> {
    let invalid = || AppError::AuthError("Invalid username or password. Please try again.".to_string());

    // 1. Buscar usuario por nombre o email; an exact username wins.
    let login = payload.username.trim();
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE username = ? OR email = ?
         ORDER BY username = ? DESC
         LIMIT 1",
    )
    .bind(login)
    .bind(login.to_lowercase())
    .bind(login)
    .fetch_optional(&pool)
    .await?
    .filter(|u| u.is_active)
    .ok_or_else(invalid)?;

    // 2. Verificar password
    let parsed_hash = PasswordHash::new(&user.hashed_password)
        .map_err(|_| AppError::InternalError("Invalid password hash in DB".to_string()))?;

    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    // 3. Generar JWT
    let now = now_secs()?;
    let exp = usize::try_from(config.token_ttl_minutes)
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or_else(|| AppError::InternalError("Token expiry out of range".to_string()))?;
    let claims = Claims {
        sub: user.username.clone(),
        exp,
        jti: Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(|e| AppError::InternalError(format!("Token creation failed: {}", e)))?;

    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(Token {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Token revoked", body = Messages),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer" = [])
    ),
    tag = "auth"
)]
pub async fn logout(
    State(pool): State<SqlitePool>,
    CurrentUser { user, claims }: CurrentUser,
) -> Result<Json<Messages>, AppError> {
    let now = now_secs()? as i64;

    sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
        .bind(now)
        .execute(&pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?, ?)")
        .bind(&claims.jti)
        .bind(claims.exp as i64)
        .execute(&pool)
        .await?;

    tracing::info!(user_id = user.id, "user logged out");
    Ok(Json(Messages {
        messages: vec![Flash::success("You have been logged out successfully.")],
    }))
}
