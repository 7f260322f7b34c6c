mod cli;

use std::process::exit;
use std::time::Duration;

use clap::Parser;
use clustercheck::config::{Config, SETTINGS};
use clustercheck::{Checker, Summary};
use dotenv::dotenv;
use log::{debug, error, info, LevelFilter};

#[tokio::main]
async fn main() {
    dotenv().ok();

    // Parse the CLI arguments.
    let args = cli::Cli::parse();
    init_logging(args.debug);
    debug!("Parsed args: {:?}", args);
    debug!("Settings: {:?}", *SETTINGS);

    let path = args
        .config
        .clone()
        .unwrap_or_else(|| SETTINGS.config_path.clone());
    let config = match Config::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            exit(2);
        }
    };

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(SETTINGS.timeout);
    let mut checker = Checker::new(&config)
        .with_timeout(timeout)
        .with_jobs(args.jobs.unwrap_or(SETTINGS.jobs));
    let reports = match checker.check().await {
        Ok(reports) => reports,
        Err(e) => {
            error!("{}", e);
            exit(2);
        }
    };

    let summary = Summary::new(reports);
    match args.format {
        cli::Format::Text => {
            if summary.total() > 0 {
                println!("{}", summary.to_text());
            }
        }
        cli::Format::Json => match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize reports: {}", e);
                exit(2);
            }
        },
    }
    info!("{}", summary);

    if !summary.all_ok() {
        exit(1);
    }
}

/// Logs warnings by default. `RUST_LOG` overrides that, `--debug` overrides both for this crate.
fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_module("clustercheck", LevelFilter::Debug);
    }
    builder.init();
}
