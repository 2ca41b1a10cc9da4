//! mintradar daemon entry point

use anyhow::{Context, Result};
use clap::Parser;
use mintradar::logger::{self, LogTag};
use mintradar::{Config, Pipeline, Scanner};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mintradar", version, about = "Solana token discovery and risk scoring pipeline")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "mintradar.toml")]
    config: PathBuf,

    /// Run a single scan pass and exit
    #[arg(long)]
    once: bool,

    /// Force debug logging regardless of the configured level
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if args.debug {
        config.general.log_level = "debug".to_string();
    }
    logger::init(&config.general);
    config.validate().context("invalid configuration")?;

    let pipeline = Pipeline::new(config).context("building pipeline")?;

    if args.once {
        let summary = pipeline.scan_all_sources().await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if summary.error_count() > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let scanner = Scanner::new(pipeline);
    let handle = scanner.shutdown_handle();
    ctrlc::set_handler(move || {
        logger::info(LogTag::System, "shutdown requested");
        handle.trigger();
    })
    .context("installing signal handler")?;

    scanner.run().await.context("scanner failed")?;
    Ok(())
}
