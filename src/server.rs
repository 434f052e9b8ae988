//! HTTPS listener for the admission webhook

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::injector::PatchEngine;
use crate::webhook::{webhook_router, WebhookState};
use crate::{Error, Result, DEFAULT_TLS_DIR, DEFAULT_WEBHOOK_PORT, TLS_CERT_FILE, TLS_KEY_FILE};

/// Server configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM file
    pub cert_path: PathBuf,
    /// TLS private key PEM file
    pub key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_tls_dir(
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
            Path::new(DEFAULT_TLS_DIR),
        )
    }
}

impl ServerConfig {
    /// Use `tls.crt` and `tls.key` from a mounted secret directory
    pub fn from_tls_dir(addr: SocketAddr, tls_dir: &Path) -> Self {
        Self {
            addr,
            cert_path: tls_dir.join(TLS_CERT_FILE),
            key_path: tls_dir.join(TLS_KEY_FILE),
        }
    }
}

/// Start the webhook server and serve until the listener fails
pub async fn start_server(config: ServerConfig, engine: Arc<PatchEngine>) -> Result<()> {
    let app = webhook_router(Arc::new(WebhookState::new(engine)));

    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "TLS config error ({}, {}): {}",
                config.cert_path.display(),
                config.key_path.display(),
                e
            ))
        })?;

    info!(addr = %config.addr, "Starting SkyWorking injector webhook");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::server(e.to_string()))?;

    Ok(())
}
