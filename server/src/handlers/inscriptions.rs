use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::CallerId;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

const MAX_NOTES_LEN: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct BookingRequest {
    pub customer_notes: Option<String>,
}

pub async fn create_inscription(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
    Path(excursion_id): Path<Uuid>,
    body: Option<Json<BookingRequest>>,
) -> Result<Response, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let notes = request
        .customer_notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        return Err(AppError::ValidationError(format!(
            "customer notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }

    let inscription = state
        .inscriptions
        .create_inscription(excursion_id, customer_id, notes)
        .await?;
    Ok(created(inscription, "Inscription created"))
}

pub async fn get_inscription(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let inscription = state.inscriptions.get_for_customer(id, customer_id).await?;
    Ok(success(inscription, "Inscription retrieved"))
}

pub async fn list_inscriptions(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
) -> Result<Response, AppError> {
    let inscriptions = state.inscriptions.list_for_customer(customer_id).await?;
    Ok(success(inscriptions, "Inscriptions retrieved"))
}
