//! Wires storage, the registry and the HTTP server together.

use std::sync::Arc;

use pondrelay_server::UploadServer;
use pondrelay_transfer::{TransferRegistry, UploadDirs};

use crate::config::Config;

/// Runs the upload server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let dirs = UploadDirs::create(&config.temp_dir, &config.save_dir)?;
    tracing::info!(
        temp_dir = %dirs.temp_dir().display(),
        save_dir = %dirs.save_dir().display(),
        "upload directories ready"
    );

    let registry = Arc::new(TransferRegistry::new(dirs));

    // Pick up transfers interrupted by the previous run.
    let recovery = {
        let registry = Arc::clone(&registry);
        tokio::task::spawn_blocking(move || registry.recover()).await??
    };
    if recovery.resumed.len() + recovery.assembled.len() > 0 {
        tracing::info!(
            resumed = recovery.resumed.len(),
            assembled = recovery.assembled.len(),
            "recovered interrupted transfers"
        );
    }

    let server = UploadServer::new(config.server_config(), registry);
    let server_run = Arc::clone(&server);
    let mut serving = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut serving => {
            // The server only returns on its own when it failed to bind or serve.
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    serving.await??;
    Ok(())
}
