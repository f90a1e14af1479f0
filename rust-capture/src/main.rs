use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use rust_capture::config::AppConfig;
use rust_capture::database::models::CaptureSpecDbModel;
use rust_capture::domain::CaptureSpec;
use rust_capture::executor::{StepInput, StepOutcome};
use rust_capture::logging;
use rust_capture::maintenance::MAINTENANCE_INTERVAL;
use rust_capture::runner::GenerateInput;
use rust_capture::services::ServiceContainer;

#[derive(Parser)]
#[command(name = "rust-capture")]
#[command(about = "Scheduled, resumable capture of remote data sources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every active spec of a capture type, honoring dependencies
    Run {
        #[arg(long)]
        capture_type: String,
        /// Only specs whose name starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Expand one spec and process its queues
    Generate {
        #[arg(long)]
        spec: String,
        #[arg(long)]
        capture_type: String,
        /// Values for external_list parameters
        #[arg(long = "item")]
        items: Vec<String>,
    },

    /// Process a single queue item and print where to continue
    Step {
        #[arg(long)]
        queue: String,
        #[arg(long)]
        order: i64,
    },

    /// Insert or replace capture specs from a JSON file (one spec or a list)
    Import { path: PathBuf },

    /// Clean up stale queues and reset daily dedup namespaces
    Maintenance {
        /// Keep running, one pass per hour
        #[arg(long = "loop")]
        run_loop: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("loading configuration")?;
    let _logging = logging::init_logging(config.log_dir.as_deref())?;

    let services = ServiceContainer::from_config(&config)
        .await
        .context("initializing services")?;

    let cancel = services.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current steps");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Run {
            capture_type,
            prefix,
        } => {
            let summary = services.runner.run(&capture_type, &prefix).await?;
            services.runner.wait().await;
            info!(
                triggered = summary.triggered.len(),
                failed = summary.failed.len(),
                skipped = summary.skipped.len(),
                rejected = summary.rejected.len(),
                "Run finished"
            );
        }
        Commands::Generate {
            spec,
            capture_type,
            items,
        } => {
            let mut input = GenerateInput::new(spec, capture_type);
            input.external_list = items;
            let handles = services.runner.start(&input).await?;
            services.runner.wait().await;
            info!(queues = handles.len(), "Generation processed");
        }
        Commands::Step { queue, order } => {
            let outcome = services
                .executor
                .step(&StepInput {
                    queue_name: queue.clone(),
                    order,
                })
                .await?;
            let next = match outcome {
                StepOutcome::Next(order) => json!({ "queue_name": queue, "order": order }),
                StepOutcome::Done => json!({ "queue_name": queue, "done": true }),
            };
            println!("{next}");
        }
        Commands::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let specs: Vec<CaptureSpec> = match value {
                serde_json::Value::Array(_) => serde_json::from_value(value)?,
                other => vec![serde_json::from_value(other)?],
            };

            for spec in &specs {
                spec.validate()?;
                services
                    .specs
                    .upsert_spec(&CaptureSpecDbModel::from_spec(spec)?)
                    .await?;
                info!(spec = %spec.name, capture_type = %spec.capture_type, "Capture spec imported");
            }
        }
        Commands::Maintenance { run_loop } => {
            if run_loop {
                services
                    .maintenance
                    .run_loop(MAINTENANCE_INTERVAL, services.cancellation_token())
                    .await;
            } else {
                let report = services.maintenance.run_once().await?;
                info!(
                    deleted_queues = report.deleted_queues.len(),
                    reset_namespaces = report.reset_namespaces.len(),
                    "Maintenance finished"
                );
            }
        }
    }

    services.shutdown().await;
    Ok(())
}
