use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nbk_exec::ExecConfig;
use nbk_kernel::{Kernel, KernelConfig, KernelConnection, ZmqTransport};
use nbk_protocol::ConnectionInfo;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nbk", version, about = "Notebook kernel for the scratch language")]
struct Cli {
    /// Connection file written by the notebook frontend
    connection_file: PathBuf,

    /// Evaluation timeout, e.g. `3000`, `5s` or `2 minutes`
    #[arg(long, env = "NBK_TIMEOUT")]
    timeout: Option<String>,

    /// Snippet evaluated before the first cell (repeatable)
    #[arg(long = "startup", value_name = "SNIPPET")]
    startup: Vec<String>,

    /// Heartbeat poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    heartbeat_ms: u64,

    /// Shell and control poll interval in milliseconds
    #[arg(long, default_value_t = 50)]
    poll_ms: u64,
}

impl Cli {
    fn kernel_config(&self) -> KernelConfig {
        KernelConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            poll_interval: Duration::from_millis(self.poll_ms),
            ..KernelConfig::default()
        }
    }

    fn exec_config(&self) -> ExecConfig {
        ExecConfig { timeout: self.timeout.clone(), ..ExecConfig::default() }
    }
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let info = ConnectionInfo::from_path(&cli.connection_file)
        .with_context(|| format!("reading connection file {}", cli.connection_file.display()))?;
    let config = cli.kernel_config();
    let exec = cli.exec_config();

    let kernel = Arc::new(Kernel::new(config.clone(), &exec, cli.startup.clone()).context("starting kernel")?);
    let transport = ZmqTransport::new();
    let connection = KernelConnection::new(info, &transport, &config).context("creating connection")?;
    kernel.install(&connection);
    connection.connect().context("binding kernel channels")?;
    tracing::info!(
        registration_id = %exec.registration_id,
        timeout = exec.timeout.as_deref().unwrap_or("none"),
        "kernel ready"
    );

    connection.wait_until_close()
}

/// Logs go to stderr, filtered by `NBK_LOG` (default `info`).
fn setup_logging() {
    let filter = EnvFilter::try_from_env("NBK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
