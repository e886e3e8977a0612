use salvo::http::HeaderValue;
use salvo::http::header::CONTENT_DISPOSITION;
use salvo::prelude::*;
use serde_json::json;
use tracing::info;

use crate::db::DatabaseExport;
use crate::web::handlers::json_body;
use crate::web::middleware::current_user;
use crate::web::{ApiError, web_state};

/// Export documents carry every row, so they may be far larger than a form.
const MAX_IMPORT_BYTES: usize = 256 * 1024 * 1024;

#[handler]
pub async fn export_database(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let caller = current_user(depot)?;
    let export = web_state(depot)?.db_manager.export().await?;

    let filename = format!(
        "school-cms-export-{}.json",
        export.exported_at.format("%Y%m%dT%H%M%SZ")
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|err| ApiError::Internal(format!("invalid header value: {err}")))?;
    res.headers_mut().insert(CONTENT_DISPOSITION, disposition);

    info!(
        exported_by = caller.id,
        users = export.users.len(),
        content = export.content.len(),
        "database exported"
    );
    res.render(Json(export));
    Ok(())
}

#[handler]
pub async fn import_database(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let caller = current_user(depot)?;
    req.set_secure_max_size(MAX_IMPORT_BYTES);
    let export: DatabaseExport = json_body(req).await?;

    let summary = web_state(depot)?.db_manager.import(&export).await?;

    info!(imported_by = caller.id, "database replaced from import");
    res.render(Json(json!({ "ok": true, "imported": summary })));
    Ok(())
}

#[handler]
pub async fn stats(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let summary = web_state(depot)?
        .db_manager
        .maintenance_store()
        .stats()
        .await?;
    res.render(Json(summary));
    Ok(())
}
