mod jobs;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use conductor_core::app::{RuntimeBuilder, RuntimeConfig, WorkerPool};
use conductor_core::domain::{JobMessage, RunnerError};
use conductor_core::impls::{HttpControlPlane, InMemoryControlPlane, InMemoryJobQueue};
use conductor_core::observability::{self, LogFormat};
use conductor_core::ports::{ControlPlane, JobQueue};

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version)]
#[command(about = "Runs queued jobs against a job control plane")]
struct Args {
    /// TOML configuration file, layered under CONDUCTOR__* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `log_format` from the configuration
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run job messages read from stdin, one JSON object per line
    Work,

    /// Run the sample job against an in-memory control plane
    Demo {
        /// How many times the transform task fails before it succeeds
        #[arg(long, default_value = "1")]
        failures: u32,

        /// Value fed to the sample job
        #[arg(long, default_value = "hello conductor")]
        input: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = RuntimeConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(format) = args.log_format {
        config.log_format = format.into();
    }
    observability::init(config.log_format);

    match args.command {
        Commands::Work => work(config).await,
        Commands::Demo { failures, input } => demo(config, failures, input).await,
    }
}

async fn work(config: RuntimeConfig) -> anyhow::Result<()> {
    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(&config.api_base_url, config.request_timeout())
            .context("building the control plane client")?,
    );
    let concurrency = config.worker_concurrency;
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();

    let runner = jobs::register(RuntimeBuilder::new(), 0)?
        .expect_complete()
        .into_runner(control_plane, Arc::new(config))?
        .with_error_channel(errors_tx);
    info!(worker = ?runner.worker(), "worker identity");
    tokio::spawn(log_errors(errors_rx));

    let queue = InMemoryJobQueue::new();
    let pool = WorkerPool::spawn(concurrency, Arc::new(queue.clone()), Arc::new(runner));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; finishing in-flight jobs");
                pool.request_shutdown();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JobMessage>(&line) {
                    Ok(message) => queue.publish(message).await?,
                    Err(err) => warn!(error = %err, "skipping malformed message"),
                }
            }
        }
    }

    queue.close().await;
    pool.join().await;
    Ok(())
}

async fn demo(config: RuntimeConfig, failures: u32, input: String) -> anyhow::Result<()> {
    let plane = InMemoryControlPlane::new();
    plane.create_job("demo-1").await;

    let runner = jobs::register(RuntimeBuilder::new(), failures)?
        .expect_complete()
        .into_runner(Arc::new(plane.clone()), Arc::new(config))?;

    let queue = InMemoryJobQueue::new().with_max_deliveries(10);
    queue
        .publish(
            JobMessage::new("demo-1", jobs::SAMPLE)
                .with_tag("source", "demo")
                .with_data(serde_json::json!({ "input": input })),
        )
        .await?;

    let pool = WorkerPool::spawn(1, Arc::new(queue.clone()), Arc::new(runner));
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let counts = queue.counts().await;
            if counts.acked + counts.dead > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("demo job did not finish")?;
    queue.close().await;
    pool.join().await;

    let job = plane
        .job("demo-1")
        .await
        .context("demo job disappeared")?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    println!("queue: {:?}", queue.counts().await);
    Ok(())
}

async fn log_errors(mut errors: mpsc::UnboundedReceiver<RunnerError>) {
    while let Some(err) = errors.recv().await {
        error!(error = %err, "background failure");
    }
}
