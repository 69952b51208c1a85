/// Server implementation for webfiles terminals
use std::net::SocketAddr;

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::{app_state::AppState, handlers, server::auth};

/// Build the application router with routes
pub fn build_router(state: AppState) -> Router {
    if state.auth_token().is_none() {
        warn!("No auth token configured, terminals are reachable without authentication");
    }

    // Create CORS layer to allow cross-origin requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let gated = Router::new()
        .route(
            "/ws/:terminal_id",
            get(handlers::websocket::websocket_handler),
        )
        .nest("/api", api_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(handlers::rest::health_check))
        .merge(gated)
        .layer(cors)
        .with_state(state)
}

/// Build API routes for terminal management
fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/terminals",
            get(handlers::rest::list_terminals).post(handlers::rest::create_terminal),
        )
        .route(
            "/terminals/:terminal_id",
            get(handlers::rest::get_terminal)
                .put(handlers::rest::rename_terminal)
                .delete(handlers::rest::destroy_terminal),
        )
        .route(
            "/terminals/:terminal_id/resize",
            post(handlers::rest::resize_terminal),
        )
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the HTTP server until a shutdown signal arrives
pub async fn run_server_with_graceful_shutdown(
    router: Router,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;

    info!("Server running on http://{}", addr);
    info!("WebSocket endpoint available at ws://{}/ws/:terminal_id", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
