//! Single-operator authentication: the login token is checked against the
//! configured secret and exchanged for a short-lived JWT.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::{error::AppError, AppState};

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub fn issue_token(secret: &str) -> Result<String, AppError> {
    let claims = Claims {
        sub: "admin".to_string(),
        exp: (Utc::now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
}

pub fn verify_token(token: &str, secret: &str) -> bool {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .is_ok()
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let secret = &state.config.server.jwt_secret;
    if secret.is_empty() || payload.token != *secret {
        return Err(AppError::InvalidCredentials);
    }
    Ok(Json(LoginResponse {
        token: issue_token(secret)?,
    }))
}

pub async fn auth_status(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Json<serde_json::Value> {
    let secret = &state.config.server.jwt_secret;
    let authenticated = bearer_token(&request)
        .map(|token| verify_token(&token, secret))
        .unwrap_or(false);

    Json(json!({
        "need_setup": secret.is_empty(),
        "auth_enabled": state.config.server.auth_enabled,
        "authenticated": authenticated,
    }))
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.server.auth_enabled {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(&request).ok_or(AppError::InvalidCredentials)?;
    if !verify_token(&token, &state.config.server.jwt_secret) {
        warn!("rejected request with an invalid or expired token");
        return Err(AppError::InvalidCredentials);
    }
    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}
