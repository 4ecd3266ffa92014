use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use strategy_runtime::cli::Args;
use strategy_runtime::config::FrameworkConfig;
use strategy_runtime::demo::{self, ScenarioOutcome};
use strategy_runtime::manager::{HealthStatus, ManagerSnapshot};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn print_outcome(outcome: &ScenarioOutcome) {
    let failed = if outcome.failed == 0 {
        outcome.failed.to_string().green()
    } else {
        outcome.failed.to_string().red()
    };
    println!(
        "{} ok={} failed={} fallbacks={}",
        format!("[{}]", outcome.scenario).bright_cyan().bold(),
        outcome.succeeded.to_string().green(),
        failed,
        outcome.fallbacks.to_string().yellow()
    );
    for note in &outcome.notes {
        println!("    {}", note.dimmed());
    }
}

fn print_summary(snapshot: &ManagerSnapshot) {
    let status = match snapshot.health.status {
        HealthStatus::Healthy => snapshot.health.status.to_string().green(),
        HealthStatus::Degraded => snapshot.health.status.to_string().yellow(),
        HealthStatus::Unhealthy => snapshot.health.status.to_string().red(),
    };
    println!();
    println!("{} {}", "system:".bold(), status);
    for s in &snapshot.strategies {
        let Some(h) = &s.health else { continue };
        println!(
            "  {:<10} {:<12} runs={:<4} success={:>5.1}% avg={:>7.2}ms",
            s.category,
            s.name,
            h.execution_count,
            h.success_rate * 100.0,
            h.average_execution_time_ms
        );
    }
    for b in &snapshot.circuit_breakers {
        println!("  breaker {:<12} {}", b.name, b.state);
    }
    if !snapshot.alerts.is_empty() {
        println!("{} {}", "alerts:".bold(), snapshot.alerts.len().to_string().red());
        for a in &snapshot.alerts {
            println!("  {a}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = match &args.config {
        Some(path) => FrameworkConfig::from_file(path)?,
        None => FrameworkConfig::default(),
    };
    config.validate()?;

    let seed = args.seed.unwrap_or_else(rand::random);
    let manager = demo::build_manager(config, args.failure_rate, seed);
    let outcomes = demo::run_scenario(&manager, args.scenario, args.users).await;
    let snapshot = manager.export_snapshot();

    if args.json {
        let out = serde_json::json!({ "scenarios": outcomes, "snapshot": snapshot });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for outcome in &outcomes {
        print_outcome(outcome);
    }
    print_summary(&snapshot);
    Ok(())
}
