//! `fastintercom` command line: init, start (stdio), serve (HTTP), status and reset.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fastintercom::start_fastintercom;

/// FastIntercom - local Intercom conversation access.
#[derive(Parser, Debug)]
#[command(name = "fastintercom", version, about, long_about = None)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Save credentials and create the local database.
    Init {
        /// Intercom access token.
        #[arg(long, env = "FASTINTERCOM_INTERCOM_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Days of history to sync initially (0 for all history).
        #[arg(long, default_value_t = 7, allow_negative_numbers = true)]
        sync_days: i64,
    },
    /// Serve the conversation tools over stdin/stdout.
    Start,
    /// Serve the conversation tools over HTTP.
    Serve {
        /// Listening port (defaults to the configured port).
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show mirror status and statistics.
    Status,
    /// Delete all local data.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    start_fastintercom::init_tracing(cli.verbose);

    if let Commands::Init { token, sync_days } = cli.command {
        return start_fastintercom::block_on(start_fastintercom::run_init(cli.config, token, sync_days));
    }

    let config = match start_fastintercom::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Init { .. } => ExitCode::SUCCESS,
        Commands::Start => start_fastintercom::block_on(start_fastintercom::run_start(config)),
        Commands::Serve { port } => start_fastintercom::block_on(start_fastintercom::run_serve(config, port)),
        Commands::Status => start_fastintercom::block_on(start_fastintercom::run_status(config)),
        Commands::Reset { yes } => match start_fastintercom::run_reset(&config, yes) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e:#}");
                ExitCode::from(1)
            }
        },
    }
}
