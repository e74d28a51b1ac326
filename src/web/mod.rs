//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::history::BucketReader;
use crate::scheduler::Scheduler;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    pub reader: Arc<BucketReader>,
}

/// HTTP boundary of the monitoring engine. Access control lives outside;
/// these routes expose exactly the tick trigger and the read model.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Store, scheduler: Arc<Scheduler>) -> Self {
        let reader = Arc::new(BucketReader::new(store.clone()));
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                reader,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/tick", post(handlers::handle_tick))
            .route(
                "/api/monitors/{id}/buckets",
                get(handlers::handle_get_buckets),
            )
            .route("/api/monitors/{id}/pings", get(handlers::handle_get_pings))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
