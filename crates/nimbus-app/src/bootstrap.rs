//! Service wiring and the serve loop.

use std::path::PathBuf;
use std::sync::Arc;

use nimbus_telemetry::{LogFormat, LoggingConfig, Metrics};
use nimbus_webdav::{DavServer, router};
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::scheduler;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "NIMBUS_CONFIG";
/// Fallback configuration path.
const CONFIG_DEFAULT: &str = "nimbus.yaml";

/// Boot the engine and serve WebDAV until interrupted.
///
/// # Errors
///
/// Fatal startup failures (unreadable configuration, no reachable NNTP
/// provider while one is configured, unbindable listener) surface so the
/// binary exits non-zero.
pub async fn run_app() -> AppResult<()> {
    let config_path = config_path();
    let config = nimbus_config::load(&config_path)
        .map_err(|source| AppError::config("config.load", source))?;

    let format = if config.log_format.is_empty() {
        LogFormat::infer()
    } else {
        LogFormat::from_label(&config.log_format)
    };
    nimbus_telemetry::init_logging(&LoggingConfig {
        level: &config.log_level,
        format,
        build_sha: option_env!("NIMBUS_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|source| AppError::Telemetry { source })?;
    info!(config = %config_path.display(), "nimbus starting");

    let bind_addr = config.webdav.bind_addr;
    let url_base = config.webdav.url_base.clone();

    let engine = Arc::new(Engine::build(config).await?);
    let mut handles = engine.start().await;
    handles.extend(scheduler::spawn(&engine));

    let dav = Arc::new(DavServer::new(
        url_base,
        engine.dav_backends(),
        engine.metrics.clone(),
    ));
    let app = router(dav).merge(metrics_route(engine.metrics.clone()));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: bind_addr,
            source,
        })?;
    info!(addr = %bind_addr, "webdav listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let result = serve.await.map_err(|source| AppError::Serve { source });

    for handle in &handles {
        handle.abort();
    }
    engine.shutdown().await;
    if let Err(err) = &result {
        error!(error = %err, "server terminated");
    }
    result
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map_or_else(|| PathBuf::from(CONFIG_DEFAULT), PathBuf::from)
}

fn metrics_route(metrics: Metrics) -> axum::Router {
    use axum::routing::get;
    axum::Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move {
                metrics.render().map_or_else(
                    |err| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                    |body| (axum::http::StatusCode::OK, body),
                )
            }
        }),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("interrupt received; shutting down"),
        () = terminate => info!("terminate received; shutting down"),
    }
}
