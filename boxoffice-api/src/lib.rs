use axum::{
    http::Method,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod payments;
pub mod state;
pub mod sweeper;
pub mod tickets;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/v1/tickets", get(tickets::list_tickets))
        .route("/v1/purchases", post(tickets::create_purchase))
        .route("/v1/purchases/cancel", post(tickets::cancel_purchase))
        .route("/v1/payments/{payment_id}/status", get(payments::payment_status))
        .route(
            "/v1/payments/{payment_id}/remaining",
            get(tickets::reservation_remaining),
        )
        .route("/v1/orders/{order_id}/resend-email", post(payments::resend_email))
        .route(
            "/v1/admin/payments/{payment_id}/resync",
            post(payments::admin_resync),
        )
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
