//! lumina server binary.
//!
//! # Usage
//!
//! ```bash
//! # Plaintext on the default port
//! lumina-server lumina.db
//!
//! # TLS with an operator-supplied certificate
//! lumina-server lumina.db --ip 0.0.0.0 --cert cert.pem --key key.pem
//! ```

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use clap::{Parser, ValueEnum};
use lumina_server::{Server, ServerConfig, Store};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Offline metadata-sharing server for the lumina protocol
#[derive(Parser, Debug)]
#[command(name = "lumina-server")]
#[command(about = "Offline function-metadata server for the lumina protocol")]
#[command(version)]
struct Args {
    /// Persistent store file (created if absent)
    db: PathBuf,

    /// Listening ip address
    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Listening port
    #[arg(short, long, default_value_t = 4443)]
    port: u16,

    /// TLS certificate in PEM format (no cert means TLS off)
    #[arg(short, long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS certificate private key in PEM format
    #[arg(short, long, requires = "cert")]
    key: Option<PathBuf>,

    /// Log level
    #[arg(short, long, value_enum, ignore_case = true, default_value = "INFO")]
    log: LogLevel,
}

/// Log level choices, named after the levels the original deployment used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    /// Everything, including per-packet traces
    Notset,
    /// Per-packet and per-client detail
    Debug,
    /// Lifecycle events only
    Info,
    /// Problems only
    Warning,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Notset => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log.directive()));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let store = Store::open(&args.db)?;

    let config = ServerConfig {
        bind_addr: SocketAddr::new(args.ip, args.port),
        cert_path: args.cert,
        key_path: args.key,
        ..ServerConfig::default()
    };

    let server = Server::bind(config, store).await?;

    server.run().await?;

    Ok(())
}
