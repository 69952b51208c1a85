/// HTTP server: router, authentication gate and graceful shutdown
mod auth;
mod server;

pub use server::{build_router, run_server_with_graceful_shutdown};
