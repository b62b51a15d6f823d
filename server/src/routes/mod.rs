use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{excursions, health_check, inscriptions, payments, webhooks};
use crate::state::AppState;

pub fn create_routes(state: AppState, allowed_origins: &str) -> Router {
    let excursion_routes = Router::new()
        .route("/", post(excursions::create_excursion))
        .route(
            "/:id",
            get(excursions::get_excursion).patch(excursions::update_excursion),
        )
        .route("/:id/status", put(excursions::change_status))
        .route("/:id/inscriptions", post(inscriptions::create_inscription));

    let inscription_routes = Router::new()
        .route("/", get(inscriptions::list_inscriptions))
        .route("/:id", get(inscriptions::get_inscription));

    let payment_routes = Router::new()
        .route("/pix", post(payments::create_pix_payment))
        .route("/cartao", post(payments::create_card_payment))
        .route("/:id", get(payments::get_payment));

    Router::new()
        .route("/health", get(health_check))
        .nest("/excursions", excursion_routes)
        .nest("/inscriptions", inscription_routes)
        .nest("/payments", payment_routes)
        .route("/webhook/:gateway", post(webhooks::receive_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer())
        .layer(create_cors_layer(allowed_origins))
}
