use salvo::prelude::*;
use serde_json::json;

use crate::web::{ApiError, web_state};

#[handler]
pub async fn health_check(depot: &mut Depot, res: &mut Response) -> Result<(), ApiError> {
    let state = web_state(depot)?;
    res.render(Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    })));
    Ok(())
}
