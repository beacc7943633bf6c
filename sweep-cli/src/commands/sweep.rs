//! Run (or dry-run) the sweep.

use anyhow::{Context, Result};
use std::sync::Arc;
use sweep_core::SweepSummary;
use sweep_runner::{
    cluster, executor, hooks, notify, resolve_matrix, CancelToken, OutputRelay, SqliteStore,
    SweepController, SweepOptions,
};
use tracing::info;

use super::load_config;
use crate::Cli;

/// Run the sweep command.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    let machines = cluster::machines(cli.machines.as_deref()).await;
    info!(machines = %machines.join(","), "machines");

    let store = SqliteStore::new(&config.store.database, &cli.mode)
        .await
        .with_context(|| format!("Failed to open {}", config.store.database.display()))?;
    info!(
        database = %config.store.database.display(),
        table = store.table(),
        "result store opened"
    );

    let relay = if cli.dry {
        Arc::new(OutputRelay::disabled())
    } else {
        let relay = OutputRelay::to_file(&config.output.log_file, cli.verbose)
            .await
            .with_context(|| format!("Failed to create {}", config.output.log_file.display()))?;
        Arc::new(relay)
    };

    if !cli.dry {
        hooks::run_setup(&config.setup, &relay)
            .await
            .context("Setup failed")?;
    }

    let matrix = resolve_matrix(&config).await?;
    let executor =
        executor::from_config(&config.job, relay.clone()).context("Failed to create executor")?;

    let cancel = CancelToken::new();
    let _ctrl_c = cancel.cancel_on_ctrl_c();

    let controller = SweepController::from_config(&config, executor, Box::new(store))?
        .with_notifier(notify::from_config(config.webhook_url(), &config.notify))
        .with_relay(relay)
        .with_cancel_token(cancel);

    let opts = SweepOptions::new(cli.target)
        .dry_run(cli.dry)
        .failures(cli.failures);
    let summary = controller.run(&matrix, &opts).await;

    if cli.dry {
        print_status(&summary);
    }
    println!("{}", summary.message());
    Ok(())
}

/// Print one `count/target` row per combination.
fn print_status(summary: &SweepSummary) {
    println!("=== sweep status ===");
    println!();
    let mut remaining = 0;
    for row in &summary.statuses {
        println!("  {:>3}/{:<3} {}", row.stored, row.target, row.assignment);
        remaining += row.remaining();
    }
    println!();
    println!(
        "{} combinations, {} trials remaining",
        summary.statuses.len(),
        remaining
    );
}
