#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::{Parser, Subcommand};
use gridwan::{LinkCredentials, PendingUpdate};
use gridwan_replication::{NodeConfig, Receiver, TcpTransport, UpdateSink, WanReplicationManager};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "gridwan", about = "WAN replication between data grid clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept replication traffic from a remote cluster and log each update
    Receive {
        #[arg(long, env = "GRIDWAN_BIND_ADDR", default_value = "0.0.0.0:5701")]
        bind: String,
        #[arg(long, env = "GRIDWAN_GROUP_NAME", default_value = "dev")]
        group_name: String,
        #[arg(long, env = "GRIDWAN_GROUP_PASSWORD", default_value = "dev-pass")]
        group_password: String,
    },
    /// Replicate mutations read from stdin as JSON lines to every configured link
    Forward {
        #[arg(long, env = "GRIDWAN_DATA_DIR", default_value = "./data")]
        data_dir: String,
        /// How long to wait for queued updates to drain after stdin closes
        #[arg(long, default_value = "30")]
        drain_timeout_secs: u64,
    },
}

#[derive(Deserialize)]
struct MutationLine {
    container: String,
    key: String,
    value: String,
}

struct LoggingSink;

impl UpdateSink for LoggingSink {
    fn apply(&self, source_group: &str, update: PendingUpdate) {
        tracing::info!(
            group = source_group,
            container = update.container_name(),
            key = %String::from_utf8_lossy(update.key()),
            value = %String::from_utf8_lossy(update.value_envelope()),
            "[WAN-RX] merge"
        );
    }
}

async fn run_receive(
    bind: String,
    group_name: String,
    group_password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = LinkCredentials::new(group_name, group_password);
    let receiver = Receiver::bind(&bind, Some(credentials), Arc::new(LoggingSink)).await?;
    let (stop, shutdown) = watch::channel(false);
    let server = tokio::spawn(receiver.run(shutdown));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    stop.send_replace(true);
    server.await?;
    Ok(())
}

async fn run_forward(
    data_dir: String,
    drain_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let node_config = NodeConfig::load_or_default(std::path::Path::new(&data_dir));
    if node_config.links.is_empty() {
        tracing::warn!("No WAN links configured (standalone mode), nothing will be replicated");
    }
    let transport = Arc::new(TcpTransport::new()?);
    let manager = WanReplicationManager::start(node_config, transport)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut admitted = 0u64;
    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break true,
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str::<MutationLine>(&line) {
                    Ok(m) => {
                        manager.on_mutation_committed(
                            &m.container,
                            m.key.into_bytes(),
                            m.value.into_bytes(),
                        );
                        admitted += 1;
                    }
                    Err(e) => tracing::warn!("Skipping malformed mutation line: {}", e),
                },
                None => break false,
            },
        }
    };
    tracing::info!(admitted, interrupted, "Input finished");

    if !interrupted {
        // Two idle reads in a row, so an update between take and submit is not missed.
        let deadline = Instant::now() + drain_timeout;
        let mut idle_reads = 0;
        while idle_reads < 2 && Instant::now() < deadline {
            idle_reads = if manager.is_idle() { idle_reads + 1 } else { 0 };
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if idle_reads < 2 {
            tracing::warn!("Drain timeout elapsed with updates still pending");
        }
    }

    let stopping = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || {
        stopping.stop();
        stopping.join();
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&manager.status())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Receive {
            bind,
            group_name,
            group_password,
        } => run_receive(bind, group_name, group_password).await,
        Command::Forward {
            data_dir,
            drain_timeout_secs,
        } => run_forward(data_dir, Duration::from_secs(drain_timeout_secs)).await,
    }
}
