// libs/lifecycle-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use consultation_cell::ConsultationNotes;
use shared_models::error::AppError;

use crate::models::{
    AdvanceAppointmentRequest, AdvanceTicketRequest, CloseConsultationRequest, CreateAppointmentRequest,
    CreateTicketRequest, DoctorRangeQuery, OpenConsultationRequest, QueueStatusQuery,
};
use crate::services::LifecycleCoordinator;

type CoordinatorState = State<Arc<LifecycleCoordinator>>;

// ==============================================================================
// QUEUE HANDLERS
// ==============================================================================

pub async fn create_ticket(
    State(coordinator): CoordinatorState,
    Json(request): Json<CreateTicketRequest>,
) -> Result<Json<Value>, AppError> {
    let ticket = coordinator
        .create_walk_in_ticket(request.branch_id, request.patient_id)
        .await?;

    Ok(Json(json!({
        "ticket": ticket,
        "message": format!("Ticket #{} issued", ticket.ticket_number())
    })))
}

pub async fn get_ticket(
    State(coordinator): CoordinatorState,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let ticket = coordinator.get_ticket(ticket_id).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn advance_ticket(
    State(coordinator): CoordinatorState,
    Path(ticket_id): Path<Uuid>,
    Json(request): Json<AdvanceTicketRequest>,
) -> Result<Json<Value>, AppError> {
    let ticket = coordinator.advance_queue_ticket(ticket_id, request.status).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn branch_queue_today(
    State(coordinator): CoordinatorState,
    Path(branch_id): Path<Uuid>,
    Query(query): Query<QueueStatusQuery>,
) -> Result<Json<Value>, AppError> {
    let tickets = match query.status {
        Some(status) => coordinator.queue_for_branch_today_by_status(branch_id, status).await?,
        None => coordinator.queue_for_branch_today(branch_id).await?,
    };

    Ok(Json(json!({
        "tickets": tickets,
        "total": tickets.len()
    })))
}

pub async fn patient_tickets(
    State(coordinator): CoordinatorState,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let tickets = coordinator.tickets_for_patient(patient_id).await?;

    Ok(Json(json!({
        "tickets": tickets,
        "total": tickets.len()
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

pub async fn create_appointment(
    State(coordinator): CoordinatorState,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = coordinator
        .create_appointment(
            request.patient_id,
            request.doctor_id,
            request.branch_id,
            request.appointment_date,
        )
        .await?;

    Ok(Json(json!({
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

pub async fn get_appointment(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = coordinator.get_appointment(appointment_id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn advance_appointment(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<AdvanceAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = coordinator.advance_appointment(appointment_id, request.status).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn doctor_appointments(
    State(coordinator): CoordinatorState,
    Path(doctor_id): Path<Uuid>,
    Query(range): Query<DoctorRangeQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = coordinator
        .appointments_for_doctor_in_range(doctor_id, range.start, range.end)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

pub async fn doctor_appointments_today(
    State(coordinator): CoordinatorState,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointments = coordinator.todays_appointments_for_doctor(doctor_id).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

pub async fn patient_appointments(
    State(coordinator): CoordinatorState,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointments = coordinator.appointments_for_patient(patient_id).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

pub async fn appointment_consultation(
    State(coordinator): CoordinatorState,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let consultation = coordinator.consultation_for_appointment(appointment_id).await?;
    Ok(Json(json!({ "consultation": consultation })))
}

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

pub async fn open_consultation(
    State(coordinator): CoordinatorState,
    Json(request): Json<OpenConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    let consultation = coordinator
        .open_consultation(request.appointment_id, request.start_time)
        .await?;
    Ok(Json(json!({ "consultation": consultation })))
}

pub async fn get_consultation(
    State(coordinator): CoordinatorState,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let consultation = coordinator.get_consultation(consultation_id).await?;
    Ok(Json(json!({ "consultation": consultation })))
}

pub async fn close_consultation(
    State(coordinator): CoordinatorState,
    Path(consultation_id): Path<Uuid>,
    Json(request): Json<CloseConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    let consultation = coordinator
        .close_consultation(consultation_id, request.end_time, request.notes)
        .await?;

    Ok(Json(json!({
        "consultation": consultation,
        "message": "Consultation closed and visit completed"
    })))
}

pub async fn amend_consultation(
    State(coordinator): CoordinatorState,
    Path(consultation_id): Path<Uuid>,
    Json(notes): Json<ConsultationNotes>,
) -> Result<Json<Value>, AppError> {
    let consultation = coordinator.amend_consultation(consultation_id, notes).await?;
    Ok(Json(json!({ "consultation": consultation })))
}
