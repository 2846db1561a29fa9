//! Process plumbing shared by the broker and agent binaries

use std::sync::Arc;
use std::time::Duration;

use russh_keys::key::KeyPair;
use tokio_util::sync::CancellationToken;

/// SSH server configuration presented by `host_key`.
///
/// Public-key authentication only; the first rejection is immediate and
/// later ones wait a second.
pub fn ssh_server_config(host_key: KeyPair) -> Arc<russh::server::Config> {
    let mut config = russh::server::Config::default();
    config.keys.push(host_key);
    config.methods = russh::MethodSet::PUBLICKEY;
    config.auth_rejection_time = Duration::from_secs(1);
    config.auth_rejection_time_initial = Some(Duration::from_secs(0));
    Arc::new(config)
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }

    cancel.cancel();
}
