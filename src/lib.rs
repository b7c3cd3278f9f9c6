//! # FileLinker
//!
//! Shares one directory over the local network: folders are browsable as
//! HTML listings, files download as-is, and any folder can be fetched as a
//! ZIP archive.
//!
//! This library contains the core logic for the server. The `run` function
//! initializes and starts the server based on command-line arguments.

pub mod archive;
pub mod cli;
pub mod error;
pub mod fs;
pub mod http;
pub mod response;
pub mod server;
pub mod templates;
pub mod utils;


use crate::cli::Cli;
use clap::Parser;
use log::{error, warn};
use std::sync::mpsc;

/// Initializes the logger, parses command-line arguments, and starts the server.
///
/// Ctrl+C is routed into the server's shutdown channel so the accept loop
/// can stop and in-flight downloads finish. Startup errors are logged and
/// end the process with status 1.
pub fn run() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.detailed_logging {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::debug!("Log level set to: {log_level}");

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        warn!("Could not install Ctrl+C handler: {e}");
    }

    if let Err(e) = server::run_server(cli, Some(shutdown_rx), None) {
        error!("Server error: {e}");
        eprintln!("❌ Error: {e}");
        std::process::exit(1);
    }
}
