//! tcpbridge - single-upstream TCP proxy
//!
//! Accepts connections on a local IPv4 address and forwards each one, byte for
//! byte, to a fixed upstream server.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;
use std::net::Ipv4Addr;
use tcpbridge_server::{parse_ipv4, parse_port, Acceptor, ProxyConfig, MAX_CHUNK};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Forward TCP connections from a local address to one upstream server
#[derive(Parser, Debug)]
#[command(name = "tcpbridge")]
#[command(about = "Forward TCP connections from a local address to one upstream server")]
#[command(version)]
#[command(long_about = r#"
tcpbridge listens on a local IPv4 address and, for every client that
connects, opens a connection to the upstream server and forwards bytes in
both directions until either side closes.

EXAMPLES:
  # Forward local port 9100 to an upstream service on 10.0.0.5:9000
  tcpbridge 127.0.0.1 9100 10.0.0.5 9000

  # Same, with debug logging and at most 256 concurrent connections
  tcpbridge --log-level debug --max-bridges 256 0.0.0.0 9100 10.0.0.5 9000
"#)]
struct Cli {
    /// IPv4 address to listen on (e.g., 127.0.0.1)
    #[arg(value_parser = parse_ipv4)]
    local_host: Ipv4Addr,

    /// Port to listen on (1-65535)
    #[arg(value_parser = parse_port)]
    local_port: u16,

    /// IPv4 address of the upstream server
    #[arg(value_parser = parse_ipv4)]
    forward_host: Ipv4Addr,

    /// Port of the upstream server (1-65535)
    #[arg(value_parser = parse_port)]
    forward_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Per-direction buffer size in bytes
    #[arg(long, default_value_t = MAX_CHUNK)]
    buffer_size: usize,

    /// Maximum number of concurrent connections (unlimited if not specified)
    #[arg(long)]
    max_bridges: Option<usize>,

    /// Runtime worker threads (1 runs everything on the main thread)
    #[arg(long)]
    threads: Option<usize>,
}

/// Parse arguments, exiting with status 1 on usage errors
fn parse_args() -> Cli {
    Cli::try_parse().unwrap_or_else(|e| {
        if matches!(
            e.kind(),
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
        ) {
            e.exit();
        }
        let _ = e.print();
        std::process::exit(1);
    })
}

/// Setup logging to stderr with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();

    Ok(())
}

fn build_runtime(threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = match threads {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(n) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(n.max(1));
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };

    builder
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn build_config(cli: &Cli) -> Result<ProxyConfig> {
    let mut config = ProxyConfig::from_parts(
        cli.local_host,
        cli.local_port,
        cli.forward_host,
        cli.forward_port,
    )
    .with_buffer_size(cli.buffer_size)
    .context("Invalid --buffer-size")?;

    if let Some(max_bridges) = cli.max_bridges {
        config = config.with_max_bridges(max_bridges);
    }

    Ok(config)
}

async fn run(config: ProxyConfig) -> Result<()> {
    let acceptor = Acceptor::new(config).context("Failed to start proxy")?;
    let tracker = acceptor.tracker();

    let accept_loop = acceptor.start().context("Failed to start accepting")?;

    // The loop only returns after a fatal accept error
    let result = accept_loop.await.context("Accept loop panicked")?;
    // the acceptor has already logged the cause
    if result.is_err() {
        info!(
            active = tracker.active(),
            "Waiting for open connections to finish"
        );
        tracker.wait_idle().await;
        bail!("Proxy stopped accepting connections");
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = parse_args();

    setup_logging(&cli.log_level)?;

    let config = build_config(&cli)?;
    let runtime = build_runtime(cli.threads)?;

    runtime.block_on(run(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_four_positionals() {
        let cli = Cli::try_parse_from(["tcpbridge", "127.0.0.1", "9100", "10.0.0.5", "9000"])
            .unwrap();
        assert_eq!(cli.local_host, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(cli.local_port, 9100);
        assert_eq!(cli.forward_host, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(cli.forward_port, 9000);
        assert_eq!(cli.buffer_size, MAX_CHUNK);
        assert_eq!(cli.log_level, "info");
        assert!(cli.max_bridges.is_none());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["tcpbridge", "127.0.0.1", "9100", "10.0.0.5"]).is_err());
        assert!(
            Cli::try_parse_from(["tcpbridge", "127.0.0.1", "http", "10.0.0.5", "9000"]).is_err()
        );
        assert!(Cli::try_parse_from(["tcpbridge", "127.0.0.1", "0", "10.0.0.5", "9000"]).is_err());
        assert!(
            Cli::try_parse_from(["tcpbridge", "localhost", "9100", "10.0.0.5", "9000"]).is_err()
        );
        assert!(Cli::try_parse_from([
            "tcpbridge",
            "127.0.0.1",
            "9100",
            "10.0.0.5",
            "9000",
            "extra"
        ])
        .is_err());
    }

    #[test]
    fn test_build_config_applies_options() {
        let cli = Cli::try_parse_from([
            "tcpbridge",
            "--buffer-size",
            "4096",
            "--max-bridges",
            "16",
            "0.0.0.0",
            "9100",
            "10.0.0.5",
            "9000",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.max_bridges, Some(16));
        assert_eq!(config.upstream_addr, "10.0.0.5:9000".parse().unwrap());
    }

    #[test]
    fn test_build_config_rejects_zero_buffer() {
        let cli = Cli::try_parse_from([
            "tcpbridge",
            "--buffer-size",
            "0",
            "127.0.0.1",
            "9100",
            "10.0.0.5",
            "9000",
        ])
        .unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_build_config_rejects_oversized_buffer() {
        let oversized = (usize::MAX / 2).to_string();
        let cli = Cli::try_parse_from([
            "tcpbridge",
            "--buffer-size",
            oversized.as_str(),
            "127.0.0.1",
            "9100",
            "10.0.0.5",
            "9000",
        ])
        .unwrap();
        let err = build_config(&cli).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid buffer size"));
    }
}
