//! compile-box sandbox dispatcher
//!
//! Runs inside the container with the staging area mounted. Exit status 0
//! means `stdout`/`stderr` were written; 1 means the pipeline aborted.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use compile_box::{dispatcher::Dispatcher, pipeline::Registry};

#[derive(Parser, Debug)]
#[command(name = "compile-box-dispatch")]
#[command(about = "Build and run staged code inside a compile-box sandbox")]
struct Args {
    /// Language tag of the staged code
    language: String,

    /// Staging area mount point
    #[arg(long, default_value = "/shared")]
    shared_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stdout: it is the only stream the host attaches, and it
    // carries abort reasons back as failure detail.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stdout)
        .with_ansi(false)
        .init();

    let dispatcher = Dispatcher::new(Registry::builtin(), &args.shared_dir);

    match dispatcher.dispatch(&args.language).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Dispatch aborted");
            ExitCode::FAILURE
        }
    }
}
