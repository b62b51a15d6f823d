use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::extract::CallerId;
use crate::payments::CardDetails;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct PixPaymentRequest {
    pub inscription_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CardPaymentRequest {
    pub inscription_id: Uuid,
    #[serde(flatten)]
    pub card: CardDetails,
}

pub async fn create_pix_payment(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
    Json(request): Json<PixPaymentRequest>,
) -> Result<Response, AppError> {
    let payment = state
        .payments
        .create_pix_payment(request.inscription_id, customer_id)
        .await?;
    Ok(created(payment, "PIX payment created"))
}

pub async fn create_card_payment(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
    Json(request): Json<CardPaymentRequest>,
) -> Result<Response, AppError> {
    let payment = state
        .payments
        .create_card_payment(request.inscription_id, customer_id, request.card)
        .await?;
    Ok(created(payment, "Card payment processed"))
}

pub async fn get_payment(
    State(state): State<AppState>,
    CallerId(customer_id): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let payment = state.payments.get_payment(id, customer_id).await?;
    Ok(success(payment, "Payment retrieved"))
}
