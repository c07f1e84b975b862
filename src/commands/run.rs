//! `stampede run` command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;

use stampede::scenario::{self, Scenario, SCENARIO_FILE_NAME};
use stampede::{Orchestrator, RunSummary, TerminalVisualizer};

use super::RunArgs;

/// Execute the `run` command.
///
/// Loads the scenario (explicit path or discovery), applies CLI overrides,
/// runs it, and prints a one-line summary.
pub async fn execute_run(args: RunArgs) -> Result<()> {
    // Step 1: Load scenario
    let scenario_file = match &args.scenario {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Scenario file not found: {}\nUse `stampede init` to create one.",
                    path.display()
                );
            }
            path.clone()
        },
        None => discover_scenario()?,
    };
    tracing::info!(path = %scenario_file.display(), "loading scenario");

    let mut scenario = Scenario::load(&scenario_file)
        .with_context(|| format!("Failed to load scenario '{}'", scenario_file.display()))?;

    // Step 2: Apply CLI overrides
    apply_overrides(&mut scenario, &args);
    scenario.validate()?;

    // Step 3: Build config and tasks
    let config = scenario.test_config()?;
    let tasks = scenario.build_tasks()?;
    let base_url = scenario.base_url()?.to_string();

    if args.no_color || !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }

    // Step 4: Run
    let orchestrator = Orchestrator::new(config)
        .with_visualizer(Box::new(TerminalVisualizer::new(args.no_color)))
        .on_start(move |path| {
            eprintln!(
                "{}",
                boxed_message(&format!(
                    "Starting test against {base_url}... Test Results: {}",
                    path.display()
                ))
            );
        });

    let summary = orchestrator
        .run(tasks)
        .await
        .context("Load test failed")?;

    // Step 5: Summary
    println!("{}", render_summary(&summary));
    Ok(())
}

/// Apply CLI flag overrides to a loaded scenario.
fn apply_overrides(scenario: &mut Scenario, args: &RunArgs) {
    if let Some(url) = &args.url {
        scenario.set_base_url(url.clone());
    }
    if let Some(users) = args.users {
        scenario.settings.users = users;
    }
    if let Some(duration) = args.duration {
        scenario.settings.duration_secs = duration;
    }
    if let Some(think_time) = args.think_time {
        scenario.settings.think_time_ms = think_time;
    }
    if let Some(dir) = &args.output_dir {
        scenario.settings.output_dir = dir.clone();
    }
    if let Some(workers) = args.sink_workers {
        scenario.settings.sink_workers = workers;
    }
    if args.no_visualizer {
        scenario.settings.visualizer = false;
    }
}

/// Discover `stampede.toml` from the working directory upward.
fn discover_scenario() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    scenario::discover(&cwd).ok_or_else(|| {
        anyhow::anyhow!(
            "No {SCENARIO_FILE_NAME} found.\n\
             Run `stampede init` to create one, or pass the scenario path explicitly."
        )
    })
}

/// Draws `message` inside a single-line box.
fn boxed_message(message: &str) -> String {
    let width = message.chars().count() + 2;
    let bar = "─".repeat(width);
    format!("┌{bar}┐\n│ {message} │\n└{bar}┘")
}

fn render_summary(summary: &RunSummary) -> String {
    format!(
        "{} {} records written to {} in {:.1}s ({}, {} passes)",
        "✓".green(),
        summary.records_written,
        summary.results_path.display(),
        summary.elapsed.as_secs_f64(),
        summary.stop_reason,
        summary.passes
    )
}
