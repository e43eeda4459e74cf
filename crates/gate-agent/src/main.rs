use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use gate_agent::config::{AgentConfig, LoggingConfig};
use gate_agent::service::GateService;

#[derive(Parser)]
#[command(name = "gate-agent")]
#[command(about = "Gate node - verifies presented credentials against the access backend")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, or a full filter directive (overrides config and RUST_LOG)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Also write logs to this file, rotated daily
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AgentConfig::load(args.config.as_deref())?;
    let _guard = init_tracing(&args, &config.logging)?;

    info!(gate_id = %config.gate_id, backend = %config.backend.host, port = config.backend.port, "starting gate-agent");

    let service = GateService::from_config(&config)?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());

    let how = service.run(input, shutdown_signal()).await?;
    info!(?how, "gate-agent exited");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(args: &Args, logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = args.log_level.as_deref().unwrap_or(&logging.level);
    let directive = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("gate_agent={0},gate_core={0},gate_transport={0}", level)
    };
    let filter = EnvFilter::try_new(directive)?;

    let json = args.log_json || logging.json;
    let (file_layer, guard) = match args.log_file.as_deref().or(logging.file.as_deref()) {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let prefix = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::daily(dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
