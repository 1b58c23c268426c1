pub mod devices;
pub mod health;
pub mod metrics;
pub mod models;
pub mod readings;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the HTTP router with all API routes and middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::prometheus_metrics))
        // Devices
        .route(
            "/api/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route(
            "/api/devices/:id",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/api/devices/:id/status", patch(devices::update_device_status))
        // Environment readings
        .route(
            "/api/environment",
            get(readings::list_environment).post(readings::create_environment),
        )
        .route(
            "/api/environment/batch",
            post(readings::create_environment_batch),
        )
        .route(
            "/api/environment/device/:device_id",
            get(readings::environment_by_device),
        )
        .route(
            "/api/environment/latest/:device_id",
            get(readings::latest_environment),
        )
        // Traffic and weather
        .route("/api/traffic", get(readings::list_traffic))
        .route("/api/weather", get(readings::list_weather))
        // Building models
        .route("/api/model/import", post(models::import_model))
        .route("/api/model/import-status", get(models::import_status))
        .route("/api/model/building-data", get(models::building_data))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
