use circuitpack::cli::commands::{CliArgs, Commands};
use circuitpack::cli::handlers::{handle_bundle, handle_compile, handle_login, handle_terminate};
use circuitpack::util::logging::{self, LoggingConfig};
use circuitpack::{NAME, VERSION};

use clap::Parser;
use std::process;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Compile(compile_args) => handle_compile(compile_args, args.quiet).await,
        Commands::Bundle(bundle_args) => handle_bundle(bundle_args, args.quiet).await,
        Commands::Login(login_args) => handle_login(login_args),
        Commands::Terminate(terminate_args) => handle_terminate(terminate_args, args.quiet).await,
    };

    process::exit(exit_code);
}

/// `--log-level` wins over `-v`/`-q`, which win over the environment
fn init_logging_from_args(args: &CliArgs) {
    let config = if let Some(level_str) = &args.log_level {
        LoggingConfig {
            level: logging::parse_level(level_str),
            ..logging::config_from_env()
        }
    } else if args.verbose {
        LoggingConfig::verbose()
    } else if args.quiet {
        LoggingConfig::with_level(Level::ERROR)
    } else {
        logging::config_from_env()
    };
    logging::init_logging(config);
}
