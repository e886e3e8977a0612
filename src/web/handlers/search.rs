use salvo::prelude::*;

use crate::db::ContentFilter;
use crate::web::handlers::{page_request, query_param};
use crate::web::{ApiError, web_state};

const MAX_QUERY_CHARS: usize = 100;

#[handler]
pub async fn search(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), ApiError> {
    let state = web_state(depot)?;
    let query = req
        .query::<String>("q")
        .map(|q| q.trim().to_string())
        .unwrap_or_default();
    if query.is_empty() {
        return Err(ApiError::bad_request("search query is required"));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(ApiError::bad_request(format!(
            "search query must be at most {MAX_QUERY_CHARS} characters"
        )));
    }

    let filter = ContentFilter {
        kind: query_param(req, "type")?,
        subject_id: query_param(req, "subject_id")?,
        author_id: None,
        query: Some(query),
    };
    let page = state
        .db_manager
        .content_store()
        .list_content(&filter, page_request(req, state)?)
        .await?;
    res.render(Json(page));
    Ok(())
}
