//! SkyWorking Injector - mutating admission webhook for JVM observability

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use skyworking_injector::config::DEFAULT_AGENT_IMAGE;
use skyworking_injector::server::{start_server, ServerConfig};
use skyworking_injector::telemetry::{init_logging, LogConfig, LogFormat};
use skyworking_injector::{InjectorConfig, PatchEngine, DEFAULT_TLS_DIR};

/// Inject the SkyWalking agent and JMX exporter into annotated pods
#[derive(Parser, Debug)]
#[command(name = "skyworking-injector", version, about, long_about = None)]
struct Cli {
    /// Image of the init container that ships the agent jars
    #[arg(long, env = "SKYWORKING_AGENT_IMAGE", default_value = DEFAULT_AGENT_IMAGE)]
    agent_image: String,

    /// SkyWalking OAP address passed to the agent as collector.backend_service
    #[arg(long, env = "SKYWORKING_SERVER", default_value = "")]
    collector_backend: String,

    /// Address the HTTPS listener binds to
    #[arg(long, env = "WEBHOOK_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    listen_addr: SocketAddr,

    /// Directory containing tls.crt and tls.key
    #[arg(long, env = "WEBHOOK_TLS_DIR", default_value = DEFAULT_TLS_DIR)]
    tls_dir: PathBuf,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_logging(LogConfig {
        format: cli.log_format,
        filter: None,
    })?;

    let injector = InjectorConfig::new(cli.agent_image, cli.collector_backend);
    injector.validate()?;

    info!(
        agent_image = %injector.agent_image,
        collector_backend = %injector.collector_backend,
        "Loaded injector configuration"
    );

    let engine = Arc::new(PatchEngine::new(injector));
    let server = ServerConfig::from_tls_dir(cli.listen_addr, &cli.tls_dir);

    start_server(server, engine).await?;
    Ok(())
}
