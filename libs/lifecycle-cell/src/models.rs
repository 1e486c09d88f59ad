// libs/lifecycle-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use appointment_cell::AppointmentStatus;
use consultation_cell::ConsultationNotes;
use queue_cell::QueueStatus;

// ==============================================================================
// QUEUE REQUESTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub branch_id: Uuid,
    pub patient_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceTicketRequest {
    pub status: QueueStatus,
}

#[derive(Debug, Deserialize)]
pub struct QueueStatusQuery {
    pub status: Option<QueueStatus>,
}

// ==============================================================================
// APPOINTMENT REQUESTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub appointment_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceAppointmentRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct DoctorRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ==============================================================================
// CONSULTATION REQUESTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenConsultationRequest {
    pub appointment_id: Uuid,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CloseConsultationRequest {
    pub end_time: DateTime<Utc>,
    #[serde(flatten)]
    pub notes: ConsultationNotes,
}
