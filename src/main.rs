mod config;
mod error;
mod models;
mod pipeline;
mod scraper;
mod sensor;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::models::SubstitutionDay;
use crate::pipeline::RefreshOutcome;
use crate::scraper::parsers::parse_substitution_page;
use crate::sensor::PlanSensor;

#[derive(Parser)]
#[command(name = "ksf-plan", about = "Schulportal substitute plan fetcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Portal username (without the school prefix); overrides KSF__PORTAL__USERNAME
    #[arg(long, global = true)]
    username: Option<String>,

    /// Overrides KSF__PORTAL__PASSWORD
    #[arg(long, global = true)]
    password: Option<String>,

    /// Display name of the sensor; overrides KSF__PORTAL__NAME
    #[arg(long, global = true)]
    name: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in once and print the current substitute plan
    Fetch {
        /// Print the serialized plan instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Poll the portal on the scan interval and print the sensor state
    Watch,

    /// Parse a saved substitute plan page without logging in
    Parse {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn print_plan(plan: &[SubstitutionDay], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else if plan.is_empty() {
        println!("No substitutions published.");
    } else {
        for day in plan {
            println!("{}", day);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "ksf_plan=info,warn",
        1 => "ksf_plan=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    config
        .portal
        .override_credentials(cli.username, cli.password, cli.name);

    match cli.command {
        Command::Fetch { json } => {
            let _t = utils::Timer::start("Substitute plan fetch");
            let mut sensor = PlanSensor::setup(&config)?;

            match sensor.update().await {
                Some(RefreshOutcome::Failed(e)) => bail!("Refresh failed: {}", e),
                Some(_) | None => {}
            }

            let attrs = sensor.attributes();
            let raw = attrs.substitute_plan.context("No plan available")?;
            let plan: Vec<SubstitutionDay> = serde_json::from_str(&raw)?;
            print_plan(&plan, json)?;
        }

        Command::Watch => {
            let mut sensor = PlanSensor::setup(&config)?;
            let mut ticker = tokio::time::interval(config.refresh.scan_interval());
            info!(
                "Polling every {:?} as {}",
                config.refresh.scan_interval(),
                sensor.name()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(RefreshOutcome::Failed(e)) = sensor.update().await {
                            warn!("{}", e);
                        }
                        println!(
                            "{} state={} available={} attributes={}",
                            sensor.name(),
                            sensor.state().unwrap_or("-"),
                            sensor.available(),
                            serde_json::to_string(&sensor.attributes())?,
                        );
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping");
                        break;
                    }
                }
            }
        }

        Command::Parse { file, json } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let plan = parse_substitution_page(&html)?;
            info!("{}: {} days", file.display(), plan.len());
            print_plan(&plan, json)?;
        }
    }

    Ok(())
}
