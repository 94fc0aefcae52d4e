use crate::clips::ClipScheduler;
use crate::state::StatusBoard;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod routes_api;
pub mod routes_clips;
pub mod routes_sse;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub status: StatusBoard,
    /// Directory the artifacts are served from
    pub clips_dir: PathBuf,
    /// Clip jobs, when the pipeline is running
    pub scheduler: Option<ClipScheduler>,
}

impl AppContext {
    pub fn new(status: StatusBoard, clips_dir: PathBuf) -> Self {
        Self {
            status,
            clips_dir,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: ClipScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_RANGE, header::ACCEPT_RANGES, header::CONTENT_LENGTH]);

    Router::new()
        .merge(routes_api::api_routes())
        .merge(routes_sse::sse_routes())
        .merge(routes_clips::clip_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// HTTP surface for the artifact directory.
///
/// Binding is separate from serving so a port conflict is reported at
/// startup, before anything else runs.
pub struct MediaServer {
    listener: TcpListener,
    app: Router,
}

impl MediaServer {
    pub async fn bind(host: &str, port: u16, ctx: AppContext) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("Invalid server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind media server to {}", addr))?;

        Ok(Self {
            listener,
            app: create_router(ctx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("Serving clips on http://{}", self.local_addr()?);

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
