mod app;
mod view;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use app::AppState;
use smash_collector_common::config::Config;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera_url = config.camera.url,
        mode = config.camera.mode,
        export_dir = config.export.dir,
        export_filename = config.export.filename,
        "starting smash-collector"
    );

    let controller = match smash_collector_session::build_controller(&config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to set up camera");
            std::process::exit(1);
        }
    };

    let feed_interval = Duration::from_secs_f64(1.0 / config.camera.fps);
    let state = Arc::new(AppState::new(controller, feed_interval));

    let app = app::router(Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(addr, "operator page listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await
    {
        error!(error = %e, "server error");
    }

    // Whatever ended the server, the camera is released before exit.
    state.session.lock().await.close();
    info!("smash-collector stopped");
}

/// Resolves on ctrl-c. Closing the session first ends the live feed and event
/// streams so graceful shutdown is not held open by them.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    state.session.lock().await.close();
}
