//! SCPI probe - scan for SCPI instruments and exercise their connections
//!
//! Discovers VISA-style resources, identifies the instruments behind them
//! and runs command sequences against a target with timing for every step.

use clap::Parser;
use scpi_probe::commands::Cli;
use scpi_probe::{cli, common::logging};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let guard = logging::init_cli(args.verbose, args.log_file.as_deref());

    let code = match cli::run(args).await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            tracing::error!(code = e.code(), "{}", e);
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}
