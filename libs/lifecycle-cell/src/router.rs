// libs/lifecycle-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::LifecycleCoordinator;

pub fn queue_routes(state: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/tickets", post(handlers::create_ticket))
        .route("/tickets/{ticket_id}", get(handlers::get_ticket))
        .route("/tickets/{ticket_id}/advance", post(handlers::advance_ticket))
        .route("/branches/{branch_id}/today", get(handlers::branch_queue_today))
        .route("/patients/{patient_id}", get(handlers::patient_tickets))
        .with_state(state)
}

pub fn appointment_routes(state: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/advance", post(handlers::advance_appointment))
        .route("/{appointment_id}/consultation", get(handlers::appointment_consultation))
        // Appointment listings
        .route("/doctors/{doctor_id}", get(handlers::doctor_appointments))
        .route("/doctors/{doctor_id}/today", get(handlers::doctor_appointments_today))
        .route("/patients/{patient_id}", get(handlers::patient_appointments))
        .with_state(state)
}

pub fn consultation_routes(state: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/", post(handlers::open_consultation))
        .route(
            "/{consultation_id}",
            get(handlers::get_consultation).patch(handlers::amend_consultation),
        )
        .route("/{consultation_id}/close", post(handlers::close_consultation))
        .with_state(state)
}
