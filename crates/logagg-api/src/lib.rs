//! logagg-api — REST API for the logagg master.
//!
//! Provides axum route handlers for clusters, their components, live log
//! and heartbeat tails, and the administrative queue pool.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | List cluster names |
//! | POST | `/api/v1/clusters` | Create a cluster |
//! | GET | `/api/v1/clusters/{name}` | Cluster details (secret required) |
//! | POST | `/api/v1/clusters/{name}/secret` | Rotate the cluster secret |
//! | GET | `/api/v1/clusters/{name}/components` | List components (secret required) |
//! | POST | `/api/v1/clusters/{name}/components` | Register a component |
//! | GET | `/api/v1/clusters/{name}/tail` | Stream the cluster's logs |
//! | GET | `/api/v1/clusters/{name}/heartbeats/tail` | Stream the cluster's raw heartbeats |
//! | GET | `/api/v1/admin/ping` | Check admin credentials |
//! | GET | `/api/v1/admin/queues` | List queue resources |
//! | POST | `/api/v1/admin/queues` | Add a queue resource |
//! | POST | `/api/v1/admin/clusters/{name}/secret` | Reset a cluster secret |
//! | GET | `/api/v1/admin/pollers` | Heartbeat poller phases |
//!
//! The cluster secret travels in the `x-cluster-secret` header, admin
//! credentials in `x-admin-key` and `x-admin-secret`.

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use logagg_registry::{PollerSupervisor, Registry, TailFanout};
use tokio_util::sync::CancellationToken;

/// Key/secret pair guarding the admin routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub key: String,
    pub secret: String,
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
    pub tail: TailFanout,
    pub supervisor: PollerSupervisor,
    /// `None` refuses every admin route.
    pub admin: Option<AdminCredentials>,
    /// Cancelled on server shutdown; ends every open tail.
    pub shutdown: CancellationToken,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let cluster_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters).post(handlers::create_cluster))
        .route("/clusters/{name}", get(handlers::get_cluster))
        .route("/clusters/{name}/secret", post(handlers::rotate_secret))
        .route(
            "/clusters/{name}/components",
            get(handlers::list_components).post(handlers::register_component),
        )
        .route("/clusters/{name}/tail", get(handlers::tail_logs))
        .route("/clusters/{name}/heartbeats/tail", get(handlers::tail_heartbeats));

    let admin_routes = Router::new()
        .route("/ping", get(handlers::admin_ping))
        .route("/queues", get(handlers::list_queues).post(handlers::add_queue))
        .route("/clusters/{name}/secret", post(handlers::reset_secret))
        .route("/pollers", get(handlers::list_pollers));

    let api_routes = cluster_routes
        .nest("/admin", admin_routes)
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
