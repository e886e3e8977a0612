use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::{validate_password, validate_username};
use crate::db::{NewUser, Role, UserChanges};
use crate::web::handlers::auth::hash_blocking;
use crate::web::handlers::content::ensure_subject_exists;
use crate::web::handlers::{double_option, json_body, page_request, path_id, query_param};
use crate::web::middleware::current_user;
use crate::web::{ApiError, web_state};

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    role: Role,
    #[serde(default)]
    assigned_subject_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateUserRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default, deserialize_with = "double_option")]
    assigned_subject_id: Option<Option<i64>>,
}

#[handler]
pub async fn list_users(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let state = web_state(depot)?;
    let role = query_param::<Role>(req, "role")?;
    let page = state
        .db_manager
        .user_store()
        .list_users(role, page_request(req, state)?)
        .await?;
    res.render(Json(page));
    Ok(())
}

#[handler]
pub async fn get_user(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let user = web_state(depot)?
        .db_manager
        .user_store()
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    res.render(Json(user));
    Ok(())
}

#[handler]
pub async fn create_user(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let body: CreateUserRequest = json_body(req).await?;
    let state = web_state(depot)?;

    let username = body.username.trim().to_string();
    validate_username(&username)
        .map_err(|reason| ApiError::bad_request(format!("username {reason}")))?;
    validate_password(&body.password)
        .map_err(|reason| ApiError::bad_request(format!("password {reason}")))?;
    if let Some(subject_id) = body.assigned_subject_id {
        ensure_subject_exists(state, subject_id).await?;
    }

    let new_user = NewUser {
        username,
        password_hash: hash_blocking(body.password).await?,
        role: body.role,
        assigned_subject_id: body.assigned_subject_id,
    };
    let user = state.db_manager.user_store().create_user(&new_user).await?;

    info!(user_id = user.id, role = %user.role, "user created");
    res.status_code(StatusCode::CREATED);
    res.render(Json(user));
    Ok(())
}

#[handler]
pub async fn update_user(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let body: UpdateUserRequest = json_body(req).await?;
    let state = web_state(depot)?;
    let store = state.db_manager.user_store();

    if store.get_user(id).await?.is_none() {
        return Err(ApiError::not_found("user not found"));
    }

    let username = match body.username {
        Some(name) => {
            let name = name.trim().to_string();
            validate_username(&name)
                .map_err(|reason| ApiError::bad_request(format!("username {reason}")))?;
            Some(name)
        }
        None => None,
    };
    let password_hash = match body.password {
        Some(password) => {
            validate_password(&password)
                .map_err(|reason| ApiError::bad_request(format!("password {reason}")))?;
            Some(hash_blocking(password).await?)
        }
        None => None,
    };
    if let Some(Some(subject_id)) = body.assigned_subject_id {
        ensure_subject_exists(state, subject_id).await?;
    }
    let changes = UserChanges {
        username,
        password_hash,
        role: body.role,
        assigned_subject_id: body.assigned_subject_id,
    };
    let user = store
        .update_user(id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    info!(user_id = user.id, "user updated");
    res.render(Json(user));
    Ok(())
}

#[handler]
pub async fn delete_user(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let caller = current_user(depot)?;
    if caller.id == id {
        return Err(ApiError::bad_request("you cannot delete your own account"));
    }

    if !web_state(depot)?.db_manager.user_store().delete_user(id).await? {
        return Err(ApiError::not_found("user not found"));
    }

    info!(user_id = id, deleted_by = caller.id, "user deleted");
    res.render(Json(json!({ "ok": true, "id": id })));
    Ok(())
}
