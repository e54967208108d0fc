use crate::run_context;
use crate::web::api::{self, AppState};
use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub async fn run_server(host: IpAddr, port: u16, state: AppState) -> Result<()> {
    let state = Arc::new(state);

    spawn_sweep_task(state.output_root.clone());

    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Set non-blocking before registering with Tokio
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = Router::new()
        .route("/videos", get(api::get_videos))
        .route("/runs", get(api::get_runs))
        .route("/runs/:run_id/detections", get(api::get_run_detections))
        .route("/scan", post(api::scan_handler))
        .route("/extract", post(api::extract_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "person-snap server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}

/// Hourly sweep for runs whose clips the camera has already rotated away.
fn spawn_sweep_task(output_root: std::path::PathBuf) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let root = output_root.clone();
            match tokio::task::spawn_blocking(move || run_context::sweep_stale_runs(&root)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => info!("sweep removed {} stale runs", removed),
                Ok(Err(e)) => warn!("sweep failed: {:#}", e),
                Err(e) => warn!("sweep task panicked: {}", e),
            }
        }
    });
}
