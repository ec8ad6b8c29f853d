use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_core::abuse::{ws_abuse_middleware, AbuseConfig};
use quiz_core::auth::{admin_auth_middleware, AuthConfig};
use quiz_core::config::AppConfig;
use quiz_core::state::AppState;
use quiz_core::{api, ws};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "quiz_core=debug,tower_http=debug,axum=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting quiz-core");

    let config = AppConfig::from_env();
    let auth_config = Arc::new(AuthConfig::from_env());
    let abuse_config = Arc::new(AbuseConfig::from_env());

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config));
    state.spawn_recovery_sweeper();

    let admin_routes = Router::new()
        .route("/api/sessions/{id}/export", get(api::export_session))
        .route("/api/sessions/{id}/import", post(api::import_session))
        .layer(middleware::from_fn_with_state(auth_config, admin_auth_middleware))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(abuse_config, ws_abuse_middleware))
        .with_state(state.clone());

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .merge(admin_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = bind_addr.parse().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
}
