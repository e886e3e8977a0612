use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::access;
use crate::db::{Content, ContentChanges, ContentFilter, ContentType, NewContent};
use crate::web::handlers::{
    double_option, json_body, page_request, path_id, query_param, trimmed_text,
};
use crate::web::middleware::current_user;
use crate::web::{ApiError, WebState, web_state};

const MAX_TITLE_CHARS: usize = 200;
const MAX_MEDIA_URLS: usize = 50;
const MAX_MEDIA_URL_CHARS: usize = 2048;

#[derive(Debug, Deserialize)]
struct CreateContentRequest {
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default, rename = "type")]
    kind: Option<ContentType>,
    #[serde(default)]
    subject_id: Option<i64>,
    #[serde(default)]
    media_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateContentRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<ContentType>,
    #[serde(default, deserialize_with = "double_option")]
    subject_id: Option<Option<i64>>,
    #[serde(default)]
    media_urls: Option<Vec<String>>,
}

fn clean_media_urls(urls: Vec<String>) -> Result<Vec<String>, ApiError> {
    if urls.len() > MAX_MEDIA_URLS {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_MEDIA_URLS} media urls are allowed"
        )));
    }
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .map(|url| {
            if url.chars().count() > MAX_MEDIA_URL_CHARS {
                Err(ApiError::bad_request("media url is too long"))
            } else {
                Ok(url)
            }
        })
        .collect()
}

pub(crate) async fn ensure_subject_exists(
    state: &WebState,
    subject_id: i64,
) -> Result<(), ApiError> {
    state
        .db_manager
        .subject_store()
        .get_subject(subject_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::bad_request(format!("subject {subject_id} does not exist")))
}

pub(crate) async fn load_content(state: &WebState, id: i64) -> Result<Content, ApiError> {
    state
        .db_manager
        .content_store()
        .get_content(id)
        .await?
        .ok_or_else(|| ApiError::not_found("content not found"))
}

#[handler]
pub async fn list_content(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let state = web_state(depot)?;
    let filter = ContentFilter {
        kind: query_param(req, "type")?,
        subject_id: query_param(req, "subject_id")?,
        author_id: query_param(req, "author_id")?,
        query: None,
    };
    let page = state
        .db_manager
        .content_store()
        .list_content(&filter, page_request(req, state)?)
        .await?;
    res.render(Json(page));
    Ok(())
}

#[handler]
pub async fn get_content(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let state = web_state(depot)?;
    let mut content = load_content(state, id).await?;
    content.files = Some(state.db_manager.file_store().list_files(id).await?);
    res.render(Json(content));
    Ok(())
}

#[handler]
pub async fn create_content(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let caller = current_user(depot)?;
    let body: CreateContentRequest = json_body(req).await?;
    let state = web_state(depot)?;

    let subject_id = access::subject_for_new_content(&caller, body.subject_id)?;
    let title = trimmed_text(&body.title, "title", MAX_TITLE_CHARS)?;
    if let Some(subject_id) = subject_id {
        ensure_subject_exists(state, subject_id).await?;
    }

    let new_content = NewContent {
        title,
        body: body.body,
        kind: body.kind.unwrap_or_default(),
        subject_id,
        author_id: Some(caller.id),
        media_urls: clean_media_urls(body.media_urls)?,
    };
    let content = state
        .db_manager
        .content_store()
        .create_content(&new_content)
        .await?;

    info!(content_id = content.id, author_id = caller.id, kind = %content.kind, "content created");
    res.status_code(StatusCode::CREATED);
    res.render(Json(content));
    Ok(())
}

#[handler]
pub async fn update_content(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let caller = current_user(depot)?;
    let body: UpdateContentRequest = json_body(req).await?;
    let state = web_state(depot)?;

    let existing = load_content(state, id).await?;
    access::can_edit_content(&caller, &existing)?;
    if let Some(target) = body.subject_id {
        access::can_move_content(&caller, target)?;
        if let Some(subject_id) = target {
            ensure_subject_exists(state, subject_id).await?;
        }
    }

    let changes = ContentChanges {
        title: body
            .title
            .map(|title| trimmed_text(&title, "title", MAX_TITLE_CHARS))
            .transpose()?,
        body: body.body,
        kind: body.kind,
        subject_id: body.subject_id,
        media_urls: body.media_urls.map(clean_media_urls).transpose()?,
    };
    let content = state
        .db_manager
        .content_store()
        .update_content(id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("content not found"))?;

    info!(content_id = id, editor_id = caller.id, "content updated");
    res.render(Json(content));
    Ok(())
}

#[handler]
pub async fn delete_content(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let caller = current_user(depot)?;
    let state = web_state(depot)?;

    let existing = load_content(state, id).await?;
    access::can_edit_content(&caller, &existing)?;

    let removed = state
        .db_manager
        .content_store()
        .delete_content(id)
        .await?
        .ok_or_else(|| ApiError::not_found("content not found"))?;
    let stored: Vec<String> = removed.iter().map(|file| file.stored_filename.clone()).collect();
    state.media.remove_all(&stored).await;

    info!(content_id = id, files = removed.len(), editor_id = caller.id, "content deleted");
    res.render(Json(json!({ "ok": true, "id": id })));
    Ok(())
}
