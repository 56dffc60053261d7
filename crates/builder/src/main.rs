//! # distro-builder
//!
//! Build custom OpenTelemetry Collector distributions.
//!
//! ## Usage
//!
//! ```bash
//! distro-builder compile --config otelcol.yaml -o manifest.yaml
//! distro-builder build --components components.yaml --platforms linux/amd64,linux/arm64
//! distro-builder build --manifest manifest.yaml --goos linux,windows --goarch amd64
//! distro-builder versions              # Resolved toolchain versions
//! distro-builder tools fetch           # Fetch generator + supervisor binaries
//! distro-builder doctor                # Check go, goreleaser, syft, curl
//! ```
//!
//! ## Pipeline
//!
//! Config or component list -> manifest -> per-target generate, compile,
//! package, SBOM -> flat output directory with checksums.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod builder;

#[derive(Parser)]
#[command(
    name = "distro-builder",
    version,
    about = "OpenTelemetry Collector distribution builder"
)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: builder::Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cancel = builder::process::CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight targets");
            interrupt.cancel();
        }
    });

    builder::run(cli.command, &cancel).await
}
