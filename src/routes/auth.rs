use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::UserRepository;
use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/login", post(login))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = UserRepository::find_by_username(&state.db, &request.username)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let valid = bcrypt::verify(&request.password, &user.password_hash)
        .map_err(|e| AppError::Internal(e.into()))?;
    if !valid {
        tracing::debug!("Rejected login for user {}", user.username);
        return Err(AppError::Unauthorized);
    }

    let token = create_jwt(&state, user.id)?;
    tracing::info!("User {} logged in", user.username);

    Ok(Json(LoginResponse {
        token,
        username: user.username,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Create a signed JWT for a user id
pub(crate) fn create_jwt(state: &Arc<AppState>, user_id: i64) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(state.config.jwt.expiration_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };

    let header = Header::default();
    let token = encode(
        &header,
        &claims,
        &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
    )?;
    Ok(token)
}

/// Decode and validate a JWT, returning the claims
fn decode_jwt(state: &Arc<AppState>, token: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

// ============================================================================
// Auth Middleware / Extractor
// ============================================================================

/// Extractor for authenticated user
pub struct AuthUser(pub crate::db::User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
            tracing::debug!("Authorization header doesn't start with 'Bearer '");
            return Err(AppError::Unauthorized);
        }

        let token = auth_header[7..].trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }

        let claims = decode_jwt(state, token)?;
        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized)?;

        let user = UserRepository::find_by_id(&state.db, user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        tracing::debug!("Authenticated user: {}", user.id);
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".to_string();
        Arc::new(AppState {
            db: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            config,
            whatsapp: None,
        })
    }

    #[tokio::test]
    async fn jwt_round_trips_the_user_id() {
        let state = state();
        let token = create_jwt(&state, 42).unwrap();
        let claims = decode_jwt(&state, &token).unwrap();
        assert_eq!(claims.sub, "42");
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn jwt_signed_with_another_secret_is_rejected() {
        let state = state();
        let other = {
            let mut config = Config::default();
            config.jwt.secret = "other-secret".to_string();
            Arc::new(AppState {
                db: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
                config,
                whatsapp: None,
            })
        };

        let token = create_jwt(&other, 42).unwrap();
        assert!(decode_jwt(&state, &token).is_err());
    }
}
