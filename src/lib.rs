//! SkyWorking Injector - mutating admission webhook for JVM observability
//!
//! Pods annotated with `linkedcare.io/skyworking-injection: "true"` receive an
//! init container that copies the SkyWalking agent into a shared volume, and
//! every application container gets that volume plus a `SKYWORKING_ARGES`
//! environment variable holding the `-javaagent` flags for SkyWalking tracing
//! and the Prometheus JMX exporter.
//!
//! # Modules
//!
//! - [`injector`] - Decision logic and JSON patch synthesis
//! - [`webhook`] - AdmissionReview handling over axum
//! - [`server`] - TLS listener
//! - [`config`] - Agent image and collector configuration
//! - [`telemetry`] - Structured logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod injector;
pub mod server;
pub mod telemetry;
pub mod webhook;

pub use config::InjectorConfig;
pub use error::Error;
pub use injector::{InjectionPlan, PatchEngine};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default port for the webhook HTTPS server
///
/// Port 8443 is used instead of 443 to avoid requiring root privileges; the
/// Service maps 443 onto it.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Directory the webhook's serving certificate secret is mounted at
pub const DEFAULT_TLS_DIR: &str = "/run/secrets/tls";

/// Certificate file name inside [`DEFAULT_TLS_DIR`]
pub const TLS_CERT_FILE: &str = "tls.crt";

/// Private key file name inside [`DEFAULT_TLS_DIR`]
pub const TLS_KEY_FILE: &str = "tls.key";
