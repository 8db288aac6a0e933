use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

use crate::models::AppointmentStatus;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("appointment not found")]
    NotFound,
    #[error("slot is not available")]
    SlotUnavailable,
    #[error("cannot move appointment from {from:?} to {to:?}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("appointment already has a review")]
    AlreadyReviewed,
    #[error("appointment is not completed yet")]
    NotCompleted,
    #[error("rating must be between 1 and 5")]
    InvalidRating,
    #[error("availability check could not complete")]
    AvailabilityCheckFailed,
    #[error("{0}")]
    Validation(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ResponseError for BookingError {
    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::NotFound => StatusCode::NOT_FOUND,
            BookingError::SlotUnavailable
            | BookingError::InvalidTransition { .. }
            | BookingError::AlreadyReviewed
            | BookingError::NotCompleted => StatusCode::CONFLICT,
            BookingError::InvalidRating | BookingError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            // Fail closed: the caller must retry, never assume the slot is free.
            BookingError::AvailabilityCheckFailed => StatusCode::SERVICE_UNAVAILABLE,
            BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let BookingError::Database(err) = self {
            log::error!("Database error: {err}");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
