use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::webhooks::{extract_payment_id, extract_payment_id_from_query};

const SUPPORTED_GATEWAY: &str = "mercadopago";

/// Gateway notification endpoint.
///
/// Always answers `200 OK`: the gateway keeps redelivering anything else, and
/// every outcome on our side is already logged by the reconciler. A body that
/// cannot be read (over the size limit, broken stream) is dropped and the
/// payment id is taken from the query string instead.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    query: Option<Query<HashMap<String, String>>>,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, &'static str) {
    if gateway != SUPPORTED_GATEWAY {
        warn!(gateway = %gateway, "Webhook from unsupported gateway, acknowledging");
        return (StatusCode::OK, "OK");
    }

    let body = body.unwrap_or_else(|rejection| {
        warn!(error = %rejection, "Unreadable webhook body, using query parameters");
        Bytes::new()
    });

    let from_body = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|payload| extract_payment_id(&payload));
    let external_id = from_body.or_else(|| {
        query
            .as_ref()
            .and_then(|Query(params)| extract_payment_id_from_query(params))
    });

    let Some(external_id) = external_id else {
        debug!(body_len = body.len(), "Webhook without a payment id, acknowledging");
        return (StatusCode::OK, "OK");
    };

    let ack = state.webhooks.handle_webhook(&external_id).await;
    info!(external_id = %external_id, ack = ?ack, "Webhook acknowledged");

    (StatusCode::OK, "OK")
}
