use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

pub mod excursions;
pub mod extract;
pub mod inscriptions;
pub mod payments;
pub mod webhooks;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "tourapp-api",
    };

    success(payload, "Health check successful")
}
