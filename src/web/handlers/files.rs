use salvo::fs::NamedFile;
use salvo::prelude::*;
use serde_json::json;
use tracing::{info, warn};

use crate::access;
use crate::db::{FileRecord, NewFileRecord};
use crate::web::handlers::content::load_content;
use crate::web::handlers::{multipart_files, path_id};
use crate::web::middleware::current_user;
use crate::web::{ApiError, WebState, web_state};

async fn load_file(state: &WebState, id: i64) -> Result<FileRecord, ApiError> {
    state
        .db_manager
        .file_store()
        .get_file(id)
        .await?
        .ok_or_else(|| ApiError::not_found("file not found"))
}

/// Stores loose media for embedding in `media_urls`; nothing is recorded.
#[handler]
pub async fn upload_media(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let caller = current_user(depot)?;
    access::require_author(&caller)?;
    let state = web_state(depot)?;

    let incoming = multipart_files(req, state.media.max_request_size()).await?;
    let stored = state.media.store_all(&incoming).await?;
    let urls: Vec<String> = stored
        .iter()
        .map(|upload| FileRecord::public_url(&upload.stored_filename))
        .collect();

    info!(uploader_id = caller.id, count = urls.len(), "media uploaded");
    res.status_code(StatusCode::CREATED);
    res.render(Json(json!({ "urls": urls })));
    Ok(())
}

#[handler]
pub async fn upload_content_files(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let content_id = path_id(req, "id")?;
    let caller = current_user(depot)?;
    let state = web_state(depot)?;

    let content = load_content(state, content_id).await?;
    access::can_edit_content(&caller, &content)?;

    let incoming = multipart_files(req, state.media.max_request_size()).await?;
    let stored = state.media.store_all(&incoming).await?;
    let rows: Vec<NewFileRecord> = stored
        .iter()
        .map(|upload| NewFileRecord {
            content_id,
            filename: upload.filename.clone(),
            stored_filename: upload.stored_filename.clone(),
            mime_type: upload.mime_type.clone(),
            size: i64::try_from(upload.size).unwrap_or(i64::MAX),
        })
        .collect();

    let files = match state.db_manager.file_store().create_files(&rows).await {
        Ok(files) => files,
        Err(err) => {
            let copied: Vec<String> =
                rows.iter().map(|row| row.stored_filename.clone()).collect();
            state.media.remove_all(&copied).await;
            return Err(err.into());
        }
    };

    info!(content_id, count = files.len(), uploader_id = caller.id, "files attached");
    res.status_code(StatusCode::CREATED);
    res.render(Json(json!({ "files": files })));
    Ok(())
}

#[handler]
pub async fn list_content_files(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let content_id = path_id(req, "id")?;
    let state = web_state(depot)?;
    load_content(state, content_id).await?;
    let files = state.db_manager.file_store().list_files(content_id).await?;
    res.render(Json(files));
    Ok(())
}

#[handler]
pub async fn get_file(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let file = load_file(web_state(depot)?, id).await?;
    res.render(Json(file));
    Ok(())
}

#[handler]
pub async fn download_file(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let state = web_state(depot)?;
    let file = load_file(state, id).await?;

    let path = state
        .media
        .path_for(&file.stored_filename)
        .filter(|path| path.is_file())
        .ok_or_else(|| {
            warn!(file_id = id, stored = %file.stored_filename, "stored binary is missing");
            ApiError::not_found("file missing from storage")
        })?;

    NamedFile::builder(path)
        .attached_name(file.filename)
        .send(req.headers(), res)
        .await;
    Ok(())
}

#[handler]
pub async fn delete_file(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let id = path_id(req, "id")?;
    let caller = current_user(depot)?;
    let state = web_state(depot)?;

    let file = load_file(state, id).await?;
    let content = load_content(state, file.content_id).await?;
    access::can_edit_content(&caller, &content)?;

    let removed = state
        .db_manager
        .file_store()
        .delete_file(id)
        .await?
        .ok_or_else(|| ApiError::not_found("file not found"))?;
    if let Err(err) = state.media.remove(&removed.stored_filename).await {
        warn!(file_id = id, "failed to remove stored binary: {}", err);
    }

    info!(file_id = id, content_id = removed.content_id, editor_id = caller.id, "file deleted");
    res.render(Json(json!({ "ok": true, "id": id })));
    Ok(())
}
