use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use thinkspace_api::{AppState, AppStateInner, rows};
use thinkspace_gateway::{Dispatcher, connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thinkspace=debug,tower_http=debug".into()),
        )
        .init();

    let db_path = std::env::var("THINKSPACE_DB_PATH").unwrap_or_else(|_| "thinkspace.db".into());
    let host = std::env::var("THINKSPACE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("THINKSPACE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let db = Arc::new(thinkspace_db::Database::open(&PathBuf::from(&db_path))?);
    let dispatcher = Dispatcher::new();
    let state = AppStateInner::new(db, dispatcher);

    let realtime_routes = Router::new()
        .route("/health", get(health))
        .route("/realtime/{owner_id}", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(rows::router(state))
        .merge(realtime_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Thinkspace server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Thinkspace server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "realtime_connections": state.dispatcher.total_connections().await,
    }))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, owner_id))
}
