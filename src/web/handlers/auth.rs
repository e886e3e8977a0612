use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password};
use crate::config::validate_password;
use crate::db::UserChanges;
use crate::web::handlers::json_body;
use crate::web::middleware::current_user;
use crate::web::{ApiError, web_state};

const INVALID_LOGIN: &str = "invalid username or password";

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

/// Argon2 is CPU-bound; keep it off the async workers.
pub(crate) async fn hash_blocking(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| ApiError::Internal(format!("password hashing task failed: {err}")))?
        .map_err(ApiError::from)
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|err| ApiError::Internal(format!("password check task failed: {err}")))
}

#[handler]
pub async fn login(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let body: LoginRequest = json_body(req).await?;
    let state = web_state(depot)?;

    let username = body.username.trim();
    let credentials = state
        .db_manager
        .user_store()
        .get_credentials_by_username(username)
        .await?;
    let Some(credentials) = credentials else {
        warn!(username, "login attempt for unknown user");
        return Err(ApiError::Unauthorized(INVALID_LOGIN.to_string()));
    };
    if !verify_blocking(body.password, credentials.password_hash).await? {
        warn!(username, "login attempt with wrong password");
        return Err(ApiError::Unauthorized(INVALID_LOGIN.to_string()));
    }

    let token = state.tokens.issue(&credentials.user)?;
    info!(user_id = credentials.user.id, "user logged in");
    res.render(Json(json!({
        "token": token,
        "token_type": "Bearer",
        "expires_in": state.tokens.ttl_seconds(),
        "user": credentials.user,
    })));
    Ok(())
}

#[handler]
pub async fn me(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let caller = current_user(depot)?;
    let user = web_state(depot)?
        .db_manager
        .user_store()
        .get_user(caller.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    res.render(Json(user));
    Ok(())
}

#[handler]
pub async fn change_password(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let body: ChangePasswordRequest = json_body(req).await?;
    let caller = current_user(depot)?;
    let store = web_state(depot)?.db_manager.user_store();

    let credentials = store
        .get_credentials(caller.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    if !verify_blocking(body.current_password, credentials.password_hash).await? {
        return Err(ApiError::Unauthorized("current password is incorrect".to_string()));
    }
    validate_password(&body.new_password)
        .map_err(|reason| ApiError::bad_request(format!("new_password {reason}")))?;

    let changes = UserChanges {
        password_hash: Some(hash_blocking(body.new_password).await?),
        ..UserChanges::default()
    };
    store
        .update_user(caller.id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    info!(user_id = caller.id, "password changed");
    res.render(Json(json!({ "message": "password updated" })));
    Ok(())
}
