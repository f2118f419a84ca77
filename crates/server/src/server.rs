//! Upload server lifecycle and routing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use pondrelay_transfer::TransferRegistry;

use crate::ServerError;
use crate::handlers::{self, AppState};
use crate::sweeper::spawn_sweeper;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub listen: SocketAddr,
    /// Path the FilePond endpoint is mounted at.
    pub base_path: String,
    /// Idle time after which a transfer is swept (zero disables the sweep).
    pub transfer_ttl: Duration,
    pub sweep_interval: Duration,
    /// Maximum request body size in bytes (0 = unlimited).
    pub max_chunk_bytes: usize,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8888)),
            base_path: "/filepond".into(),
            transfer_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            max_chunk_bytes: 0,
            cors: true,
        }
    }
}

/// The FilePond upload server.
pub struct UploadServer {
    config: ServerConfig,
    registry: Arc<TransferRegistry>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    pub fn new(config: ServerConfig, registry: Arc<TransferRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Gracefully shuts down the server and its sweeper.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.listen).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            base_path = %normalize_base_path(&self.config.base_path),
            "upload server listening on {local_addr}"
        );

        let sweeper = spawn_sweeper(
            Arc::clone(&self.registry),
            self.config.transfer_ttl,
            self.config.sweep_interval,
            self.cancel.clone(),
        );

        let app = router(Arc::clone(&self.registry), &self.config);
        let cancel = self.cancel.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;

        // Stop the sweeper even if serve failed on its own.
        self.cancel.cancel();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        tracing::info!("server shut down");
        Ok(result?)
    }
}

/// Builds the FilePond router over `registry`.
pub fn router(registry: Arc<TransferRegistry>, config: &ServerConfig) -> Router {
    let base = normalize_base_path(&config.base_path);

    let mut app = Router::new()
        .route(
            &base,
            post(handlers::process)
                .patch(handlers::patch)
                .head(handlers::head)
                .get(handlers::fetch)
                .delete(handlers::revert),
        )
        .route("/debug/commit", post(handlers::commit))
        .route("/debug/temp-files", get(handlers::temp_files))
        .route("/debug/save-files", get(handlers::save_files))
        .with_state(AppState { registry })
        // Chunks are streamed to disk; only an explicit limit applies.
        .layer(DefaultBodyLimit::disable());

    if config.max_chunk_bytes > 0 {
        app = app.layer(RequestBodyLimitLayer::new(config.max_chunk_bytes));
    }

    if config.cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([
                    HeaderName::from_static("upload-offset"),
                    HeaderName::from_static("content-disposition"),
                ]),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}
