//! `pcbench-worker` -- runs one codec at one rate over one dataset.
//!
//! Configuration comes from the environment (optionally a `.env` file);
//! see the `pcbench_worker` crate docs for the variable table.

use anyhow::Context;
use pcbench_worker::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcbench_worker=info,pcbench_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid worker configuration");
        std::process::exit(1);
    });

    tracing::info!(
        codec = %settings.codec,
        rate = %settings.rate,
        dataset = %settings.dataset,
        exp_dir = %settings.exp_dir.display(),
        "Starting pcbench-worker",
    );

    let summary = pcbench_worker::run(&settings)
        .await
        .with_context(|| format!("{} run over {} failed", settings.codec, settings.dataset))?;

    if summary.failed > 0 {
        tracing::warn!(failed = summary.failed, "Some jobs failed");
    }
    Ok(())
}
