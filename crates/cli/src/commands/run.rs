//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::ControllerBlueprint;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{check_speed, Pipeline, RunConfig, Scenario};

/// Execute the `run` command
pub async fn run_controllers(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        intersections = blueprint.intersections.len(),
        observers = blueprint.observers.len(),
        "Configuration loaded"
    );

    let scenario = match &args.scenario {
        Some(path) => {
            let scenario = Scenario::load(path)?;
            info!(path = %path.display(), steps = scenario.len(), "Scenario loaded");
            Some(scenario)
        }
        None => None,
    };
    let replay_speed = check_speed(args.replay_speed)?;

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, scenario.as_ref());
        return Ok(());
    }

    let run_config = RunConfig {
        blueprint,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        scenario,
        replay_speed,
        mock_feed: (args.mock_feed_ms > 0).then(|| Duration::from_millis(args.mock_feed_ms)),
        seed: args.seed,
    };

    info!("Starting controllers...");
    let stats = Pipeline::new(run_config)
        .run(shutdown_signal())
        .await
        .context("Controller run failed")?;

    info!(
        snapshots = stats.metrics.snapshots,
        images = stats.images_ingested,
        duration_secs = stats.duration.as_secs_f64(),
        "Run completed"
    );
    stats.print_summary();

    info!("AISC finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ControllerBlueprint, scenario: Option<&Scenario>) {
    println!("\n=== Configuration Summary ===\n");
    println!("Intersections ({}):", blueprint.intersections.len());
    for intersection in &blueprint.intersections {
        let groups: Vec<&str> = intersection
            .phase_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        println!(
            "  - {} ({:?}): {}",
            intersection.id,
            intersection.next_phase,
            groups.join(" -> ")
        );
    }

    if !blueprint.observers.is_empty() {
        println!("\nObservers ({}):", blueprint.observers.len());
        for observer in &blueprint.observers {
            println!("  - {} ({:?})", observer.name, observer.observer_type);
        }
    }

    if let Some(scenario) = scenario {
        println!(
            "\nScenario: {} steps over {:.1}s",
            scenario.len(),
            scenario.span().as_secs_f64()
        );
    }

    println!();
}
