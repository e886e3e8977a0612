use salvo::prelude::*;
use salvo::writing::Scribe;
use tracing::{debug, warn};

use crate::access::{self, AuthUser};
use crate::web::{ApiError, web_state};

const INVALID_TOKEN: &str = "invalid or expired token";

/// Resolves an optional `Authorization: Bearer` header into an [`AuthUser`].
///
/// Requests without the header pass through anonymously; a header that does
/// not resolve to a live account is rejected outright.
#[handler]
pub async fn authenticate(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
    ctrl: &mut FlowCtrl,
) {
    let Some(header) = req.header::<String>("authorization") else {
        return;
    };

    match resolve_user(depot, &header).await {
        Ok(user) => {
            debug!(user_id = user.id, role = %user.role, "authenticated request");
            depot.inject(user);
        }
        Err(err) => {
            warn!("rejected credentials for {}: {}", req.uri().path(), err);
            err.render(res);
            ctrl.skip_rest();
        }
    }
}

async fn resolve_user(depot: &Depot, header: &str) -> Result<AuthUser, ApiError> {
    let token = bearer_token(header)
        .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".to_string()))?;
    let state = web_state(depot)?;
    let claims = state.tokens.verify(token)?;

    // Role and subject come from the database so revocations apply immediately.
    let user = state
        .db_manager
        .user_store()
        .get_user(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(INVALID_TOKEN.to_string()))?;
    Ok(AuthUser::from(user))
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub fn current_user(depot: &Depot) -> Result<AuthUser, ApiError> {
    depot
        .obtain::<AuthUser>()
        .cloned()
        .map_err(|_| ApiError::Unauthorized("authentication required".to_string()))
}

#[handler]
pub async fn require_login(depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    if let Err(err) = current_user(depot) {
        err.render(res);
        ctrl.skip_rest();
    }
}

#[handler]
pub async fn require_admin(depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let outcome = current_user(depot)
        .and_then(|user| access::require_admin(&user).map_err(ApiError::from));
    if let Err(err) = outcome {
        err.render(res);
        ctrl.skip_rest();
    }
}
