use axum::{Json, Router, extract::State, routing::get};
use replay_bus::{SessionMonitor, SessionStats};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub(crate) fn start_api_server(
    addr: String,
    monitor: SessionMonitor,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/", get(index))
            .route("/status", get(status))
            .with_state(monitor);

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Error binding API server to {}: {}", addr, e);
                return;
            }
        };
        log::info!("API server started on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

async fn index(State(monitor): State<SessionMonitor>) -> String {
    monitor.print()
}

async fn status(State(monitor): State<SessionMonitor>) -> Json<SessionStats> {
    Json(monitor.stats())
}
