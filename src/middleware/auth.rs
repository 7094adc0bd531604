use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::db::now_rfc3339;
use crate::error::AppError;
use crate::models::CurrentAccount;
use crate::AppState;

/// Claims minted by the external identity service. `sub` is the account id.
#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Authentication middleware
/// Validates the bearer token and ensures the account row exists.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return Err(AppError::Unauthorized(
                "Missing or invalid Authorization header".to_string(),
            ));
        }
    };

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.auth.jwt_secret.as_bytes()),
        &Validation::default(),
    )?
    .claims;

    if claims.sub.is_empty() {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }

    // Accounts are provisioned lazily on first authenticated request; the
    // identity service owns credentials, we only own storage state.
    let now = now_rfc3339();
    sqlx::query(
        "INSERT OR IGNORE INTO accounts (id, plan, used_bytes, created_at, updated_at)
         VALUES (?, 'free', 0, ?, ?)",
    )
    .bind(&claims.sub)
    .bind(&now)
    .bind(&now)
    .execute(state.db.pool())
    .await?;

    request
        .extensions_mut()
        .insert(CurrentAccount { id: claims.sub });

    Ok(next.run(request).await)
}

/// Guard for /internal routes: a shared secret instead of a user token,
/// since callers are operators and cron, not accounts.
pub async fn internal_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get("X-Internal-Secret")
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(secret) if secret == state.config.auth.internal_secret => Ok(next.run(request).await),
        _ => Err(AppError::Unauthorized(
            "Missing or invalid internal secret".to_string(),
        )),
    }
}
