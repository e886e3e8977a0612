pub mod auth;

pub use self::auth::{authenticate, current_user, require_admin, require_login};
