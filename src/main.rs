use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use feesplit::{
    config::LedgerConfig,
    contracts::{FeePercentage, FeeWeights, PolicyKind},
    scenario::{parse_steps, ScenarioRunner},
};

/// Fee-distribution ledger driver.
#[derive(Parser, Debug)]
#[command(name = "feesplit")]
#[command(about = "Replay fee-ledger scenarios and inspect weight policies")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scenario against a fresh ledger and print the final snapshot.
    Simulate {
        /// Ledger config (team roster, policy, opening wallets).
        #[arg(long)]
        config: PathBuf,

        /// Scenario script: JSON array of steps.
        #[arg(long)]
        scenario: PathBuf,

        /// Exit non-zero when any step deviates from its expectation.
        #[arg(long)]
        strict: bool,
    },
    /// Print the weight triple a policy assigns to a fee and recipient count.
    Weights {
        /// Fee as a decimal ("0.25"), percent ("25%") or fraction ("1/4").
        #[arg(long)]
        fee: FeePercentage,

        #[arg(long)]
        recipients: usize,

        #[arg(long, default_value = "exact_share")]
        policy: PolicyKind,
    },
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn simulate_cmd(config: &Path, scenario: &Path, strict: bool) -> Result<()> {
    let config = LedgerConfig::from_json(&read_text(config)?)
        .with_context(|| format!("parse {}", config.display()))?;
    let steps = parse_steps(&read_text(scenario)?)
        .with_context(|| format!("parse {}", scenario.display()))?;
    let (ledger, bank) = config.build();
    info!(
        team = ledger.roster().len(),
        policy = ledger.policy_name(),
        steps = steps.len(),
        "replaying scenario"
    );

    let report = ScenarioRunner::new(&ledger, &bank).run(&steps);
    for record in &report.records {
        println!("{}", serde_json::to_string(record)?);
    }
    let snapshot = ledger.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("wallets: {}", serde_json::to_string(&bank.wallets())?);

    ledger
        .check_conservation()
        .context("ledger failed the conservation check")?;
    if strict {
        report.ensure_expectations()?;
    } else if !report.mismatches.is_empty() {
        eprintln!("{} step(s) deviated from expectations", report.mismatches.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct WeightsReport {
    policy: &'static str,
    fee: FeePercentage,
    recipients: usize,
    weights: FeeWeights,
    team_share: f64,
}

fn weights_cmd(fee: FeePercentage, recipients: usize, policy: PolicyKind) -> Result<()> {
    if recipients == 0 {
        bail!("--recipients must be > 0");
    }
    let policy = policy.build();
    let weights = policy.weights(fee, recipients);
    let report = WeightsReport {
        policy: policy.name(),
        fee,
        recipients,
        weights,
        team_share: weights.team as f64 / weights.total as f64,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log_level).context("invalid --log-level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Simulate {
            config,
            scenario,
            strict,
        } => simulate_cmd(&config, &scenario, strict),
        Command::Weights {
            fee,
            recipients,
            policy,
        } => weights_cmd(fee, recipients, policy),
    }
}
