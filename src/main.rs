mod bridge;
mod config;
mod error;
mod logging;
mod runner;
mod sandbox;
mod script;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::runner::CycleDriver;

const DEFAULT_CONFIG_PATH: &str = "config/runner.toml";

/// Interpreter frames are deep; give every runtime thread room for them.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

fn print_help() {
    println!(
        "\
sandbox-runner v{}

Periodically loads scripts from a directory, strips disallowed imports and
calls, and runs every script's entry point on a bounded worker pool.

USAGE:
    sandbox-runner [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit
        --once       Run a single cycle and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, sandbox_runner=debug,warn)

EXAMPLES:
    sandbox-runner                           # uses {DEFAULT_CONFIG_PATH}
    sandbox-runner /etc/runner/runner.toml   # custom config path
    sandbox-runner --once                    # one cycle, then exit
    RUST_LOG=debug sandbox-runner            # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

fn main() -> Result<()> {
    let mut config_path: Option<String> = None;
    let mut once = false;

    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sandbox-runner v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--once" => once = true,
            _ => config_path = Some(arg),
        }
    }

    // The config names the log file, so it is read before logging starts
    let (config, origin) = load_config(config_path.as_deref())?;

    // Initialize logging (RUST_LOG=debug for debug mode)
    logging::init(&config.logging)?;
    match origin {
        Some(path) => info!("Loaded configuration from {path}"),
        None => warn!("No {DEFAULT_CONFIG_PATH} found, using defaults"),
    }
    if let Some(file) = &config.logging.file {
        info!("Also logging to {}", file.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(WORKER_STACK_SIZE)
        .build()?;
    runtime.block_on(run(config, once))
}

/// The configuration and the file it came from, if any.
fn load_config(path: Option<&str>) -> Result<(Config, Option<&str>)> {
    match path {
        Some(path) => Ok((Config::load(path)?, Some(path))),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Ok((Config::load(DEFAULT_CONFIG_PATH)?, Some(DEFAULT_CONFIG_PATH)))
        }
        None => Ok((Config::default(), None)),
    }
}

async fn run(config: Config, once: bool) -> Result<()> {
    let mut driver = CycleDriver::from_config(&config)?;

    if once {
        let report = driver.run_cycle().await;
        driver.probe_bridge();
        if report.listing_failed {
            anyhow::bail!("Could not list the script directory");
        }
        info!(
            "Single cycle {} done: {} compiled, {} failed to load, {} of {} runs failed",
            report.cycle,
            report.stats.compiled,
            report.stats.failed,
            report.failures(),
            report.results.len()
        );
        return Ok(());
    }

    let interval = Duration::from_secs(config.runner.interval_secs);
    info!("Running a cycle every {}s", interval.as_secs());
    driver.run(interval).await
}
