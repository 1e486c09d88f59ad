use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use lifecycle_cell::router::{appointment_routes, consultation_routes, queue_routes};
use lifecycle_cell::LifecycleCoordinator;

pub fn create_router(state: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic flow API is running!" }))
        .nest("/queue", queue_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/consultations", consultation_routes(state))
}
