use clap::{Parser, ValueEnum};

/// Demo scenario to run against the built-in pricing strategies.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Scenario {
    All,
    Single,
    Fallback,
    Parallel,
    Pipeline,
    Ab,
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scenario::All => "all",
            Scenario::Single => "single",
            Scenario::Fallback => "fallback",
            Scenario::Parallel => "parallel",
            Scenario::Pipeline => "pipeline",
            Scenario::Ab => "ab",
        };
        write!(f, "{s}")
    }
}

impl Scenario {
    /// Scenarios executed for this selection, in run order.
    pub fn expand(self) -> Vec<Scenario> {
        match self {
            Scenario::All => vec![
                Scenario::Single,
                Scenario::Fallback,
                Scenario::Parallel,
                Scenario::Pipeline,
                Scenario::Ab,
            ],
            other => vec![other],
        }
    }
}

#[derive(Parser)]
#[command(name = "strategy-runtime")]
#[command(version)]
#[command(about = "Runs pricing strategies through the strategy runtime and prints what happened")]
pub struct Args {
    /// TOML framework config; built-in defaults are used when omitted
    #[arg(long, short)]
    pub config: Option<String>,

    /// Which demo scenario to run
    #[arg(long, value_enum, default_value = "all")]
    pub scenario: Scenario,

    /// Simulated users for the A/B scenario
    #[arg(long, default_value = "200")]
    pub users: u32,

    /// Failure probability of the flaky primary strategy
    #[arg(long, default_value = "0.5")]
    pub failure_rate: f64,

    /// Seed for assignment and failure randomness
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the final manager snapshot as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
