use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use salvo::prelude::*;
use tracing::info;

use crate::auth::TokenIssuer;
use crate::config::{Config, PaginationConfig};
use crate::db::DatabaseManager;
use crate::media::MediaStorage;

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

#[cfg(test)]
mod tests;

pub use self::error::ApiError;
use self::routes::create_service;

/// Shared per-process state, injected into every request's depot.
#[derive(Clone)]
pub struct WebState {
    pub db_manager: Arc<DatabaseManager>,
    pub tokens: Arc<TokenIssuer>,
    pub media: Arc<MediaStorage>,
    pub pagination: PaginationConfig,
    pub started_at: Instant,
}

impl WebState {
    pub fn new(config: &Config, db_manager: Arc<DatabaseManager>) -> Self {
        Self {
            db_manager,
            tokens: Arc::new(TokenIssuer::new(
                config.auth.jwt_secret.clone(),
                config.auth.token_ttl_hours,
            )),
            media: Arc::new(MediaStorage::new(&config.uploads)),
            pagination: config.pagination,
            started_at: Instant::now(),
        }
    }
}

pub fn web_state(depot: &Depot) -> Result<&WebState, ApiError> {
    depot
        .obtain::<WebState>()
        .map_err(|_| ApiError::Internal("web state is not initialized".to_string()))
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
    state: WebState,
}

impl WebServer {
    pub async fn new(config: Arc<Config>, db_manager: Arc<DatabaseManager>) -> Result<Self> {
        let state = WebState::new(&config, db_manager);
        state.media.ensure_dir().await?;
        Ok(Self { config, state })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        info!("Starting web server on {}", bind_addr);

        let service = create_service(self.state.clone(), &self.config.server.cors_origins);
        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(service).await;

        Ok(())
    }
}
