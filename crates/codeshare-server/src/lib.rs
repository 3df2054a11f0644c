pub mod api;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod exercise_store;
pub mod health;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod state;
pub mod ws;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, put};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;

use config::{CorsConfig, ServerConfig};
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let cors = cors_layer(&config.cors);
    let state = AppState::new(config);

    let api_routes = Router::new()
        .route(
            "/exercises",
            get(api::list_exercises).post(api::create_exercise),
        )
        .route("/exercises/{id}", get(api::get_exercise))
        .route("/exercises/{id}/current-code", put(api::save_current_code))
        .layer(cors);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_routes)
        .fallback_service(ServeDir::new(&web_root))
        .with_state(state.clone());

    (app, state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                    None
                },
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE])
}
