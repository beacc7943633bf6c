//! Run the job once by hand.

use anyhow::{Context, Result};
use std::sync::Arc;
use sweep_runner::{cluster, executor, CancelToken, MemoryStore, OutputRelay, SweepController};
use tracing::info;

use super::load_config;
use crate::Cli;

/// Run the job template with the literal trailing arguments appended.
///
/// Output goes to the console and nothing is recorded.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    let machines = cluster::machines(cli.machines.as_deref()).await;
    info!(machines = %machines.join(","), "machines");

    let relay = Arc::new(OutputRelay::console());
    let executor =
        executor::from_config(&config.job, relay.clone()).context("Failed to create executor")?;

    let cancel = CancelToken::new();
    let _ctrl_c = cancel.cancel_on_ctrl_c();

    let controller = SweepController::from_config(&config, executor, Box::new(MemoryStore::new()))?
        .with_relay(relay)
        .with_cancel_token(cancel);

    match controller.run_manual(&cli.manual, &machines).await? {
        Some(metrics) => {
            let pretty =
                serde_json::to_string_pretty(&metrics).context("Failed to format metrics")?;
            println!("{}", pretty);
        }
        None => println!("(no metrics)"),
    }
    Ok(())
}
