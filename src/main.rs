use clap::Parser;
use daemonize::Daemonize;
use pgaudit_ingest::{cli::CliArguments, ingest::Ingester, logfile};
use std::fs::OpenOptions;
use std::process;

macro_rules! fatal {
    ($err:expr, $msg:literal) => {{
        tracing::error!(fatal = true, error = %$err, $msg);
        process::exit(1);
    }};
    ($err:expr, $msg:literal, $($key:tt = $val:expr),+) => {{
        tracing::error!(fatal = true, error = %$err, $($key = %$val),+, $msg);
        process::exit(1);
    }};
}

fn main() {
    let cli_args = CliArguments::parse();

    // Startup preconditions are checked before detaching so that failures
    // land on the invoker's stderr.
    if let Err(e) = logfile::first_log_file(&cli_args.log_path) {
        eprintln!("pgaudit_ingest: {}", e);
        process::exit(1);
    }

    if cli_args.daemon {
        if let Err(e) = daemonize(&cli_args) {
            eprintln!("pgaudit_ingest: unable to daemonize: {}", e);
            process::exit(1);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .init();

    tracing::info!(
        log_path = %cli_args.log_path.display(),
        logging_server = cli_args.logging_server(),
        "Starting audit log ingest"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => fatal!(e, "Failed to start runtime"),
    };

    runtime.block_on(Ingester::new(cli_args).run());
}

/// Detaches into a daemon: new session group, stdout redirected to the
/// daemon's log file (where tracing output then lands), stdin and stderr to
/// null. The fork happens before the tokio runtime is built.
fn daemonize(cli_args: &CliArguments) -> Result<(), Box<dyn std::error::Error>> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli_args.log_file)?;

    Daemonize::new().stdout(log_file).start()?;
    Ok(())
}
