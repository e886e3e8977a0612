use salvo::affix_state;
use salvo::cors::{AllowOrigin, Cors};
use salvo::http::header::{AUTHORIZATION, CONTENT_TYPE};
use salvo::http::{HeaderValue, Method};
use salvo::prelude::*;
use salvo::serve_static::StaticDir;
use tracing::warn;

use crate::web::WebState;
use crate::web::handlers::{
    auth::{change_password, login, me},
    content::{create_content, delete_content, get_content, list_content, update_content},
    database::{export_database, import_database, stats},
    files::{
        delete_file, download_file, get_file, list_content_files, upload_content_files,
        upload_media,
    },
    health::health_check,
    search::search,
    subjects::{create_subject, delete_subject, get_subject, list_subjects, update_subject},
    users::{create_user, delete_user, get_user, list_users, update_user},
};
use crate::web::middleware::{authenticate, require_admin, require_login};

pub fn create_router(state: WebState) -> Router {
    let uploads_root = state.media.root().to_path_buf();

    Router::new()
        .hoop(affix_state::inject(state))
        .push(api_router())
        .push(Router::with_path("uploads/{**path}").get(StaticDir::new([uploads_root])))
}

fn api_router() -> Router {
    Router::with_path("api")
        .hoop(authenticate)
        .push(Router::with_path("health").get(health_check))
        .push(
            Router::with_path("auth")
                .push(Router::with_path("login").post(login))
                .push(
                    Router::new()
                        .hoop(require_login)
                        .push(Router::with_path("me").get(me))
                        .push(Router::with_path("password").put(change_password)),
                ),
        )
        .push(
            Router::with_path("users")
                .hoop(require_admin)
                .get(list_users)
                .post(create_user)
                .push(
                    Router::with_path("{id}")
                        .get(get_user)
                        .put(update_user)
                        .delete(delete_user),
                ),
        )
        .push(
            Router::with_path("subjects")
                .get(list_subjects)
                .push(Router::new().hoop(require_admin).post(create_subject))
                .push(
                    Router::with_path("{id}")
                        .get(get_subject)
                        .push(
                            Router::new()
                                .hoop(require_admin)
                                .put(update_subject)
                                .delete(delete_subject),
                        ),
                ),
        )
        .push(
            Router::with_path("content")
                .get(list_content)
                .post(create_content)
                .push(
                    Router::with_path("{id}")
                        .get(get_content)
                        .put(update_content)
                        .delete(delete_content)
                        .push(
                            Router::with_path("files")
                                .get(list_content_files)
                                .post(upload_content_files),
                        ),
                ),
        )
        .push(
            Router::with_path("files/{id}")
                .get(get_file)
                .delete(delete_file)
                .push(Router::with_path("download").get(download_file)),
        )
        .push(Router::with_path("upload").post(upload_media))
        .push(Router::with_path("search").get(search))
        .push(Router::with_path("stats").hoop(require_admin).get(stats))
        .push(
            Router::with_path("database")
                .hoop(require_admin)
                .push(Router::with_path("export").get(export_database))
                .push(Router::with_path("import").post(import_database)),
        )
}

/// Any origin when none are configured; otherwise exactly the listed ones.
fn cors_handler(origins: &[String]) -> impl Handler {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| warn!("ignoring invalid CORS origin {}", origin))
                .ok()
        }))
    };

    Cors::new()
        .allow_origin(allow_origin)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(vec![AUTHORIZATION, CONTENT_TYPE])
        .into_handler()
}

pub fn create_service(state: WebState, cors_origins: &[String]) -> Service {
    Service::new(create_router(state)).hoop(cors_handler(cors_origins))
}
