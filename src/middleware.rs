use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use sqlx::SqlitePool;

use crate::{
    config::Config,
    error::AppError,
    models::{Claims, User},
};

/// The authenticated requester, plus the claims of the token they presented.
pub struct CurrentUser {
    pub user: User,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    SqlitePool: FromRef<S>,
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. Extraer el token del header Authorization
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::AuthError("Missing Authorization header".to_string()))?
            .to_str()
            .map_err(|_| AppError::AuthError("Invalid Authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::AuthError("Invalid token format".to_string()))?;

        // 2. Decodificar el token con el secreto de la configuración
        let config = Arc::<Config>::from_ref(state);
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.secret_key.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| AppError::AuthError(format!("Invalid token: {}", e)))?;

        let pool = SqlitePool::from_ref(state);

        // 3. Rechazar tokens revocados por logout
        let revoked = sqlx::query("SELECT 1 FROM revoked_tokens WHERE jti = ?")
            .bind(&token_data.claims.jti)
            .fetch_optional(&pool)
            .await?;
        if revoked.is_some() {
            return Err(AppError::AuthError("Token has been revoked".to_string()));
        }

        // 4. Obtener el usuario de la DB
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(&token_data.claims.sub)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::AuthError("User not found".to_string()))?;

        if !user.is_active {
            return Err(AppError::AuthError("User is inactive".to_string()));
        }

        Ok(CurrentUser {
            user,
            claims: token_data.claims,
        })
    }
}
