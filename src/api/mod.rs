//! The HTTP(S) transport: the only caller of `Queue::add`/`Queue::get`.

pub mod auth;
pub mod cert;
mod routes;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::logging::LogRegistry;
use crate::queue::Queue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<Queue>,
    pub logs: Arc<LogRegistry>,
    pub api_key: String,
}

fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/task/queue", post(routes::queue_task))
        .route("/task/queue/:id", get(routes::get_task))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .merge(protected)
        .route("/task/ping", get(routes::ping))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API forever: HTTPS via a locally generated self-signed
/// certificate, or plain HTTP if `config.no_tls` is set (development only).
pub async fn serve(config: &AppConfig, queue: Arc<Queue>, logs: Arc<LogRegistry>) -> anyhow::Result<()> {
    let state = AppState {
        queue,
        logs,
        api_key: config.api_key.clone(),
    };
    let app = router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.listen_port));

    if config.no_tls {
        tracing::warn!("no_tls set: serving plain HTTP on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;
        let hostname = hostname_for_cert();
        let paths = cert::ensure_self_signed(exe_dir, &hostname)?;
        let tls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path)
                .await?;
        tracing::info!("serving HTTPS on {addr}");
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}

fn hostname_for_cert() -> String {
    hostname_from_env().unwrap_or_else(|| "localhost".to_string())
}

fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
