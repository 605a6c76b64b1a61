//! API Server setup

use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::routes::build_app;
use crate::state::AppState;

/// Run the API server until Ctrl-C
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = state.config.listen_addr.parse()?;
    let router = build_app(state);

    tracing::info!("Referral API server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Referral API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
