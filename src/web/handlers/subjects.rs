use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::{NewSubject, SubjectChanges};
use crate::web::handlers::{double_option, json_body, optional_text, path_id, trimmed_text};
use crate::web::{ApiError, web_state};

const MAX_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct CreateSubjectRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateSubjectRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
}

#[handler]
pub async fn list_subjects(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let subjects = web_state(depot)?
        .db_manager
        .subject_store()
        .list_subjects()
        .await?;
    res.render(Json(subjects));
    Ok(())
}

#[handler]
pub async fn get_subject(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let subject = web_state(depot)?
        .db_manager
        .subject_store()
        .get_subject(id)
        .await?
        .ok_or_else(|| ApiError::not_found("subject not found"))?;
    res.render(Json(subject));
    Ok(())
}

#[handler]
pub async fn create_subject(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let body: CreateSubjectRequest = json_body(req).await?;
    let new_subject = NewSubject {
        name: trimmed_text(&body.name, "name", MAX_NAME_CHARS)?,
        description: optional_text(body.description),
    };

    let subject = web_state(depot)?
        .db_manager
        .subject_store()
        .create_subject(&new_subject)
        .await?;

    info!(subject_id = subject.id, name = %subject.name, "subject created");
    res.status_code(StatusCode::CREATED);
    res.render(Json(subject));
    Ok(())
}

#[handler]
pub async fn update_subject(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let body: UpdateSubjectRequest = json_body(req).await?;
    let changes = SubjectChanges {
        name: body
            .name
            .map(|name| trimmed_text(&name, "name", MAX_NAME_CHARS))
            .transpose()?,
        description: body.description.map(optional_text),
    };

    let subject = web_state(depot)?
        .db_manager
        .subject_store()
        .update_subject(id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("subject not found"))?;

    info!(subject_id = subject.id, "subject updated");
    res.render(Json(subject));
    Ok(())
}

#[handler]
pub async fn delete_subject(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    if !web_state(depot)?
        .db_manager
        .subject_store()
        .delete_subject(id)
        .await?
    {
        return Err(ApiError::not_found("subject not found"));
    }

    info!(subject_id = id, "subject deleted");
    res.render(Json(json!({ "ok": true, "id": id })));
    Ok(())
}
