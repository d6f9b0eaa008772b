//! Gateway daemon polling Modbus TCP devices and republishing them through a DNP3 outstation

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rodgate::config::{GatewayConfig, GatewayMode};
use rodgate::{DnpOutstation, Gateway, TcpTransport};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Sequential,
    Concurrent,
}

impl From<Mode> for GatewayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Sequential => GatewayMode::Sequential,
            Mode::Concurrent => GatewayMode::Concurrent,
        }
    }
}

#[derive(Parser)]
#[command(name = "rodgate-server")]
#[command(about = "Polls Modbus TCP devices and republishes them through a DNP3 outstation")]
#[command(version)]
struct Cli {
    #[arg(
        short = 'c',
        long,
        default_value = "gateway.toml",
        help = "Path of the TOML configuration file"
    )]
    config: PathBuf,

    #[arg(short = 'l', long, help = "Log level, overrides [logging] level")]
    log_level: Option<String>,

    #[arg(short = 'm', long, value_enum, help = "Scheduling model, overrides [gateway] mode")]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("unable to load {}", cli.config.display()))?;
    if let Some(mode) = cli.mode {
        config.gateway.mode = mode.into();
    }

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    run(config).await
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    // RUST_LOG wins over both the command line and the configuration file
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let gateway = Gateway::create(&config, |device| {
        TcpTransport::create(&device.host, device.port)
    })
    .context("unable to create gateway")?;

    for name in gateway.endpoint_names() {
        tracing::info!("configured device: {name}");
    }
    let dispatcher = gateway.dispatcher();
    for index in dispatcher.indices() {
        tracing::info!("DirectOperate enabled on index {index}");
    }

    let outstation =
        DnpOutstation::bind(&config.outstation, &config.schema(), Arc::new(dispatcher))
            .await
            .context("unable to start DNP3 outstation")?;

    let token = CancellationToken::new();

    let signals = {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            token.cancel();
        })
    };

    gateway.run(Arc::new(outstation), token).await;
    signals.abort();

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to install Ctrl+C handler: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler: {err}");
            std::future::pending::<()>().await;
        }
    }
}
