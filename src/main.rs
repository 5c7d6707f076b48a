mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Command, RunArgs};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));
    match command {
        Command::Run(args) => cmd_run(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let to_file = conduit_core::config::Config::load(&args.config)
        .map(|c| c.logging_to_file)
        .unwrap_or(false);
    let log_dir = conduit_core::config::Config::load(&args.config)
        .ok()
        .and_then(|c| c.log_dir.clone());
    let _guard = init_logging(&args.log_level, to_file, log_dir.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(&args)?;
        application.serve().await
    })
}

/// Initialize the tracing subscriber. With file logging enabled, logs go
/// to a daily-rotated file through a non-blocking writer; the returned
/// guard must be held for the life of the process.
fn init_logging(
    level: &str,
    to_file: bool,
    log_dir: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if to_file {
        let dir = log_dir.unwrap_or("./logs");
        let file_appender = tracing_appender::rolling::daily(dir, "conduit.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        None
    }
}
