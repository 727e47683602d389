use std::process::ExitCode;
use std::thread;

use clap::Parser;
use reactor_http::handler::StaticFiles;
use reactor_server::signal::{SignalSet, signal_name};
use reactor_server::{Cli, HttpSessionFactory, Server, ServerError};
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(cli.log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    match serve(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "server error");
            ExitCode::FAILURE
        }
    }
}

fn serve(cli: &Cli) -> Result<(), ServerError> {
    let config = cli.server_config()?;

    // before the worker pool exists, so every thread inherits the mask
    let signals = SignalSet::shutdown()?;
    signals.block()?;

    if !cli.root.is_dir() {
        warn!(root = %cli.root.display(), "static file root is not a directory");
    }
    let factory = HttpSessionFactory::new(StaticFiles::new(&cli.root));
    let mut server = Server::bind(config, factory)?;

    let handle = server.shutdown_handle();
    thread::Builder::new().name("reactor-signals".to_string()).spawn(move || match signals.wait() {
        Ok(signal) => {
            info!(signal = signal_name(signal), "shutdown requested");
            handle.shutdown();
        }
        Err(e) => error!(cause = %e, "waiting for signals failed"),
    })?;

    server.run()
}
