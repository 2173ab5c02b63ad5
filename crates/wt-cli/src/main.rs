use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{filter, host, limit, report, reset, status, util};
use wt_cli::{Cli, Commands, Config};
use wt_core::Classifier;

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(wt_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = wt_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support; stdout carries host messages
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (db, config) = open_database(cli.config.as_deref())?;
    let classifier = Classifier::new(config.browser);
    let today = Local::now().date_naive();
    let mut stdout = std::io::stdout();

    match command {
        Commands::Host { replay } => {
            let _lock = host::acquire_lock(&config.database_path)?;
            let tracker_config = config.tracker_config();
            let timers = (!replay).then(|| host::Timers::from_config(&tracker_config));
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let mut output = tokio::io::stdout();
            host::run(db, &tracker_config, *replay, timers, input, &mut output).await?;
        }
        Commands::Report(args) => {
            let period = util::resolve_period(args.date.as_deref(), args.month.as_deref(), today)?;
            report::run(&mut stdout, &db, period, args.json).await?;
        }
        Commands::Status => {
            status::run(&mut stdout, &db, &config.database_path, today).await?;
        }
        Commands::Limit(action) => {
            limit::run(&mut stdout, &db, &classifier, action).await?;
        }
        Commands::Block { domain, switch } => {
            limit::block(&mut stdout, &db, &classifier, domain, switch.on).await?;
        }
        Commands::Filter(action) => {
            filter::run(&mut stdout, &db, &classifier, action).await?;
        }
        Commands::Reset { yes } => {
            reset::run(&mut stdout, &db, *yes).await?;
        }
    }

    Ok(())
}
