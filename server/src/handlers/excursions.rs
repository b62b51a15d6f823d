use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::CallerId;
use crate::models::{Excursion, ExcursionStatus, ExcursionUpdate, NewExcursion};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: ExcursionStatus,
}

pub async fn create_excursion(
    State(state): State<AppState>,
    CallerId(organizer_id): CallerId,
    Json(input): Json<NewExcursion>,
) -> Result<Response, AppError> {
    let excursion = state.ledger.create_excursion(organizer_id, input).await?;
    Ok(created(excursion, "Excursion created"))
}

pub async fn get_excursion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let excursion = state.ledger.get_excursion(id).await?;
    Ok(success(excursion, "Excursion retrieved"))
}

pub async fn update_excursion(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(update): Json<ExcursionUpdate>,
) -> Result<Response, AppError> {
    owned_by(&state, id, caller).await?;
    let excursion = state.ledger.update_excursion(id, update).await?;
    Ok(success(excursion, "Excursion updated"))
}

pub async fn change_status(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Response, AppError> {
    owned_by(&state, id, caller).await?;
    let excursion = state.ledger.change_status(id, request.status).await?;
    Ok(success(excursion, "Excursion status updated"))
}

async fn owned_by(state: &AppState, id: Uuid, caller: Uuid) -> Result<Excursion, AppError> {
    let excursion = state.ledger.get_excursion(id).await?;
    if excursion.organizer_id != caller {
        return Err(AppError::Forbidden(
            "only the organizer can change this excursion".to_string(),
        ));
    }
    Ok(excursion)
}
