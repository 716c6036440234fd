//! Courier CLI - terminal front end for the courier client session.
//!
//! Logs in against the platform authority, keeps the session renewed, and
//! streams live package notifications while `watch` is running.

mod app;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use courier_core::Config;

const USAGE: &str = "\
Usage: courier <command>

Commands:
  login [identifier]   Log in and store the session
  status               Show the stored session
  logout               End the session and forget the credential
  watch                Stream live notifications until Ctrl-C";

/// Log file prefix inside the cache directory (rotated daily)
const LOG_FILE_PREFIX: &str = "courier.log";

/// Initialize the tracing subscriber for logging.
///
/// With `log_dir` set, events are also written to a daily rolling file there;
/// the returned guard must be held until exit so buffered lines get flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);

    let config = Config::load()?;

    let log_dir = match command {
        Some("watch") => Some(config.cache_dir()?),
        _ => None,
    };
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(command = ?command, "Courier CLI starting");

    let mut app = App::new(config)?;

    match command {
        Some("login") => app.login(args.get(1).map(String::as_str)).await,
        Some("status") => app.status().await,
        Some("logout") => app.logout(),
        Some("watch") => app.watch().await,
        Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}
