//! `cvl-server` binary entry point.

use clap::Parser;
use cvl_server::{tls, CvlServer, DEFAULT_PORT};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Publish/subscribe and shared-object server for visualization clients.
#[derive(Debug, Parser)]
#[command(name = "cvl-server", version, about)]
struct Args {
    /// Run in read-only mode: every mutating endpoint returns 404.
    #[arg(long)]
    read_only: bool,

    /// Directory where objects are persisted. Without it, objects disappear
    /// when the server restarts.
    #[arg(long, value_name = "DIR")]
    persist: Option<PathBuf>,

    /// Port number the web server will listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Allow connections from any interface instead of loopback only.
    #[arg(long)]
    any: bool,

    /// Timeseries databases to serve data from.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    timeseries: Vec<PathBuf>,

    /// Enable SSL support (the default).
    #[arg(long, overrides_with = "no_ssl")]
    ssl: bool,

    /// Disable SSL support.
    #[arg(long, overrides_with = "ssl")]
    no_ssl: bool,

    /// Path to certificate file for SSL.
    #[arg(long, default_value = "cert.pem", value_name = "PATH")]
    cert: PathBuf,

    /// Path to private key file for SSL.
    #[arg(long, default_value = "key.pem", value_name = "PATH")]
    key: PathBuf,
}

#[tokio::main]
async fn main() -> cvl_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let ssl = args.ssl || !args.no_ssl;

    if ssl && !tls::credentials_present(&args.cert, &args.key) {
        eprintln!("{}", tls::missing_credentials_hint(&args.cert, &args.key));
        std::process::exit(1);
    }

    let mut builder = CvlServer::builder()
        .port(args.port)
        .bind_any(args.any)
        .read_only(args.read_only);
    if let Some(dir) = args.persist {
        builder = builder.persist(dir);
    }
    for path in args.timeseries {
        builder = builder.timeseries(path);
    }
    if ssl {
        builder = builder.tls(args.cert, args.key);
    }

    builder.build().await?.run().await
}
