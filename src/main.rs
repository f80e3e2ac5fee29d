//! codebox - JSON-lines front end for one agent session
//!
//! Reads control messages (`{"type":"message","content":...}`,
//! `{"type":"cancel"}`) from stdin and writes stream events to stdout, one
//! JSON object per line. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use codebox::{
    metrics, telemetry, AgentExecutor, AppConfig, ContainerPool, ControlMessage, DockerClient, OllamaProvider,
    SessionHub, ToolRegistry,
};

#[derive(Debug, Parser)]
#[command(name = "codebox", version, about = "Sandboxed coding agent over JSON lines")]
struct Args {
    /// Session id (a new one is generated when omitted)
    #[arg(long)]
    session: Option<String>,

    /// Sandbox environment type, selects the image
    #[arg(long, default_value = "python")]
    environment: String,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    telemetry::init_tracing(&config.telemetry)?;

    let session_id = args.session.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    info!(session_id = %session_id, environment = %args.environment, model = %config.agent.model, "starting");

    // 1. Container pool
    let runtime = Arc::new(DockerClient::new(config.pool.docker_socket.clone()));
    let pool = Arc::new(ContainerPool::new(runtime, config.pool.clone()));
    match pool.sweep_orphans().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "removed leftover containers"),
        Err(e) => warn!(error = %e, "startup orphan sweep failed"),
    }
    pool.initialize().await;
    let shutdown = CancellationToken::new();
    let maintenance = ContainerPool::start_maintenance(pool.clone(), shutdown.clone());

    // 2. Agent
    let provider = Arc::new(OllamaProvider::new(
        config.provider.base_url.clone(),
        config.agent.model.clone(),
        f64::from(config.provider.temperature),
    ));
    let executor = Arc::new(AgentExecutor::new(
        provider,
        Arc::new(ToolRegistry::standard()),
        pool.clone(),
        config.agent.clone(),
    ));
    let hub = SessionHub::new(executor, config.streaming.clone());
    let session = hub.get_or_create(&session_id, &args.environment).await;

    // 3. Event writer
    let (resync, mut events) = session.attach().await;
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        if let Err(e) = write_line(&mut stdout, &resync.to_frame()).await {
            warn!(error = %e, "failed to write to stdout");
            return;
        }
        while let Some(event) = events.recv().await {
            if let Err(e) = write_line(&mut stdout, &event).await {
                warn!(error = %e, "failed to write to stdout");
                break;
            }
        }
    });

    // 4. Control loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                session.cancel().await;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ControlMessage>(&line) {
                    Ok(message) => {
                        if let Err(e) = session.handle_control(message).await {
                            warn!(error = %e, "control message rejected");
                        }
                    }
                    Err(e) => warn!(error = %e, "invalid control message"),
                }
            }
        }
    }

    // 5. Teardown
    session.wait().await;
    drop(session);
    if let Err(e) = hub.close(&session_id).await {
        warn!(error = %e, "session teardown failed");
    }
    if let Err(e) = writer.await {
        warn!(error = %e, "event writer failed");
    }
    shutdown.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "pool maintenance task failed");
    }
    pool.shutdown().await;

    if args.metrics {
        eprint!("{}", metrics::gather_text());
    }
    telemetry::shutdown_tracing();
    Ok(())
}

async fn write_line<T: Serialize>(out: &mut Stdout, value: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await
}
