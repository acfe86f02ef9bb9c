use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use shm_random::error::{EX_OK, EX_USAGE};
use shm_random::{run, Cli, Shutdown};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EX_USAGE } else { EX_OK });
        }
    };

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let shutdown = match Shutdown::new().and_then(|s| s.install().map(|_| s)) {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let config = cli.into_config();
    match run(&config, &shutdown) {
        Ok(_) => ExitCode::from(EX_OK),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
