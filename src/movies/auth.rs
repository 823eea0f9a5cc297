use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use tracing::{debug, info};

use super::types::*;
use crate::db::{AccessToken, AccessTokenRepo, DbError, User, UserRepo};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// The authenticated user for the current request, placed in the request
/// extensions by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResult>> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::InvalidInput("username is required".to_string()));
    }

    let now = Utc::now();
    let mut user = match state.db.get_user(username).await {
        Ok(user) => {
            if !bcrypt::verify(&req.password, &user.password).unwrap_or(false) {
                info!(username = %username, "Login failed: bad password");
                return Err(ApiError::Unauthorized);
            }
            user
        }
        Err(DbError::NotFound(_)) if state.config.movies.autoregister => {
            let new_user = User {
                id: uuid::Uuid::new_v4().to_string(),
                username: username.to_string(),
                password: bcrypt::hash(&req.password, state.config.movies.password_cost)?,
                created: Some(now.to_rfc3339()),
                lastlogin: None,
                lastused: None,
            };
            state.db.create_user(&new_user).await?;
            info!(username = %username, "Registered new user");
            new_user
        }
        Err(DbError::NotFound(_)) => {
            info!(username = %username, "Login failed: unknown user");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };

    user.lastlogin = Some(now.to_rfc3339());
    user.lastused = Some(now.to_rfc3339());
    state.db.upsert_user(&user).await?;

    let token = AccessToken {
        token: uuid::Uuid::new_v4().to_string(),
        userid: user.id.clone(),
        created: Some(now),
        lastused: None,
    };
    state.db.upsert_token(&token).await?;

    Ok(Json(LoginResult {
        user: UserDto {
            id: user.id,
            username: user.username,
        },
        access_token: token.token,
    }))
}

pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> ApiResult<StatusCode> {
    state.db.delete_token(&user.token).await?;
    state.messages.discard(&user.token).await;
    debug!(username = %user.username, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(token_str) = extract_token(&req, &params) {
        if let Ok(token) = state.db.get_token(&token_str).await {
            match state.db.get_user_by_id(&token.userid).await {
                Ok(user) => {
                    req.extensions_mut().insert(CurrentUser {
                        id: user.id,
                        username: user.username,
                        token: token.token,
                    });
                }
                Err(e) => debug!("Token {} has no valid user: {}", token_str, e),
            }
        }
    }

    next.run(req).await
}

fn extract_token<B>(req: &Request<B>, params: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(parse_bearer)
    {
        return Some(token);
    }

    if let Some(token) = req
        .headers()
        .get("X-Auth-Token")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        return Some(token);
    }

    params.get("api_key").cloned()
}

fn parse_bearer(auth_str: &str) -> Option<String> {
    let (scheme, token) = auth_str.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
