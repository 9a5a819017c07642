use anyhow::Context;
use clap::{Parser, Subcommand};

use jobping_infra::config::Settings;
use jobping_infra::workers::FailureScope;
use jobping_pipeline::Stage;
use jobping_pipeline::bootstrap::build_pipeline;

#[derive(Debug, Parser)]
#[command(name = "jobping-worker", about = "Job matching pipeline worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the stage queues until interrupted.
    Run {
        /// Comma list of stages; overrides WORKER_STAGES.
        #[arg(long)]
        stages: Option<String>,
        /// Fail whole batches for every stage instead of each stage's default.
        #[arg(long)]
        whole_batch: bool,
    },
    /// Re-enqueue matches that cleared their threshold but were never notified.
    Backfill,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    jobping_observability::init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("loading settings")?;
    let pipeline = build_pipeline(&settings).await.context("building pipeline")?;

    match cli.command {
        Command::Run { stages, whole_batch } => {
            let raw = stages.unwrap_or_else(|| settings.worker_stages.clone());
            let stages = Stage::parse_list(&raw)?;

            let handles: Vec<_> = stages
                .iter()
                .map(|stage| {
                    let scope = if whole_batch {
                        FailureScope::WholeBatch
                    } else {
                        stage.default_failure_scope()
                    };
                    pipeline.spawn_consumer(*stage, scope)
                })
                .collect();
            tracing::info!(consumers = handles.len(), "worker running");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("shutdown requested");
            for handle in handles {
                handle.shutdown().await;
            }
        }
        Command::Backfill => {
            let report = pipeline.requeue_pending_notifications().await?;
            tracing::info!(
                pending = report.pending,
                enqueued = report.enqueued,
                failed = report.failed,
                "backfill complete"
            );
        }
    }

    Ok(())
}
