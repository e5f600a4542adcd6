//! Command-line front end for the load generator engine.
//!
//! Configuration is layered, lowest to highest precedence: [`EngineConfig`]
//! defaults, an optional TOML file (`--config`), `BANKLOAD_`-prefixed
//! environment variables, then the handful of flags below that cover the
//! knobs operators reach for most often. Everything else is only settable
//! through the file or the environment.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bankload_engine::{EngineConfig, SessionManager};
use clap::Parser;
use config::{Config, Environment, File};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "bankload", version, about = "Synthetic banking load generator")]
struct Cli {
    /// TOML file layered on top of the built-in defaults.
    #[arg(long, env = "BANKLOAD_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Postgres connection string. Required unless set in the config file or
    /// `BANKLOAD_POOL__DSN`.
    #[arg(long, env = "BANKLOAD_DSN")]
    dsn: Option<String>,

    /// RNG seed; 0 draws from OS entropy and logs the resolved seed.
    #[arg(long, env = "BANKLOAD_SEED")]
    seed: Option<u64>,

    /// Number of worker tasks (the load controller ramps concurrency up to
    /// at most this many).
    #[arg(long, env = "BANKLOAD_NUM_SESSIONS")]
    num_sessions: Option<u32>,

    /// Seconds between progress log lines.
    #[arg(long, env = "BANKLOAD_METRICS_INTERVAL_SECS")]
    metrics_interval_secs: Option<u64>,

    #[arg(long, value_enum, default_value = "compact", env = "BANKLOAD_LOG_FORMAT")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);
    if let Some(path) = &cli.config {
        builder = builder.add_source(File::from(path.clone()));
    }
    builder = builder.add_source(Environment::with_prefix("BANKLOAD").separator("__"));

    let mut engine_config: EngineConfig = builder.build()?.try_deserialize()?;

    if let Some(dsn) = &cli.dsn {
        engine_config.pool.dsn = dsn.clone();
    }
    if let Some(seed) = cli.seed {
        engine_config.seed = seed;
    }
    if let Some(num_sessions) = cli.num_sessions {
        engine_config.num_sessions = num_sessions;
    }
    if let Some(secs) = cli.metrics_interval_secs {
        engine_config.metrics_interval = Duration::from_secs(secs);
    }

    engine_config.validate()?;
    Ok(engine_config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let engine_config = load_config(&cli)?;

    let manager = SessionManager::new(engine_config).await?;
    let cancel = manager.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, starting graceful shutdown");
            cancel.cancel();
        }
    });

    let report = manager.run().await?;
    tracing::info!(
        sessions_completed = report.sessions_completed,
        sessions_started = report.sessions_started,
        elapsed = ?report.elapsed,
        "run complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            ExitCode::FAILURE
        }
    }
}
