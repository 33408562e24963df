//! netbypassd - accept seccomp listeners from sandbox launchers and re-issue
//! their `connect()` calls on the host network

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use netbypass::{Acceptor, Config, Ipv4Subnet};
use netbypass_sys::{CheckError, SystemInfo};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NETBYPASS_LOG";
const DEFAULT_FILTER: &str = "netbypass=info";

#[derive(Parser)]
#[command(name = "netbypassd")]
#[command(author, version, about = "Host network bypass for rootless sandboxes")]
struct Cli {
    /// Socket path [default: $XDG_RUNTIME_DIR/netbypass.sock]
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Write the daemon PID here once listening
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Leave destinations in this subnet to the sandbox (repeatable)
    #[arg(long = "ignore", value_name = "CIDR")]
    ignore: Vec<Ipv4Subnet>,

    /// Log filter, overrides NETBYPASS_LOG
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let config = match &self.socket {
            Some(path) => Config::new(path),
            None => Config::from_runtime_dir(std::env::var_os("XDG_RUNTIME_DIR"))?,
        };
        let config = self.ignore.iter().fold(config, |c, net| c.ignore(*net));
        Ok(match &self.pid_file {
            Some(path) => config.pid_file(path),
            None => config,
        })
    }

    /// Startup configuration. An unsupported kernel is not fatal: sessions
    /// then fail per connect and answer "continue", so sandboxes keep their
    /// own network.
    fn startup(&self, check: Result<&SystemInfo, &CheckError>) -> Result<Config> {
        match check {
            Ok(info) => tracing::debug!(kernel = ?info.kernel_version, "system check passed"),
            Err(e) => tracing::warn!(error = %e, "system check failed, connects will pass through"),
        }
        self.config()
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {directives:?}"))?,
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    let config = cli.startup(netbypass_sys::check())?;
    let acceptor = Acceptor::bind(&config)?;

    if let Some(path) = &config.pid_file {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing pid file {}", path.display()))?;
    }
    for net in &config.ignored_subnets {
        tracing::info!(%net, "ignoring subnet");
    }

    acceptor.run().context("acceptor")?;
    Ok(())
}
