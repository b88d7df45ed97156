//! Admin HTTP surface: monitor CRUD, manual restore and login.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::dns::DnsProvider;
use crate::engine::{failover::MonitorEngine, scheduler::Scheduler};

pub mod auth;
pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub engine: Arc<MonitorEngine>,
    pub scheduler: Arc<Scheduler>,
    pub dns: Arc<dyn DnsProvider>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .nest("/monitors", routes::monitor_routes::create_monitor_router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/check", get(auth::auth_status))
        .route("/api/health", get(health_check))
        .nest("/api", protected)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
