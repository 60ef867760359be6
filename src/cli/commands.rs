use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Bundles circuit sources and drives remote circuit builds
#[derive(Parser, Debug)]
#[command(
    name = "circuitpack",
    about = "Bundle multi-file circuit sources and compile them remotely",
    version,
    author,
    long_about = "circuitpack resolves every file a circuit includes, strips local directory \
                  layout from the bundle, submits it to a remote compiler and follows the \
                  build's status log until it finishes. Large builds can run on a dedicated \
                  instance that is terminated when the job ends."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose diagnostics on stderr")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Compile a circuit remotely",
        long_about = "Resolves the entry file and its includes, submits the bundle and waits \
                      for the build to finish.\n\n\
                      Examples:\n  \
                      circuitpack compile circuits/main.circom\n  \
                      circuitpack compile circuits/main.circom --instance 16 --protocol plonk\n  \
                      circuitpack compile circuits/main.circom --resume <REQUEST_ID>"
    )]
    Compile(CompileArgs),

    #[command(
        about = "Print the build payload without sending it",
        long_about = "Resolves the entry file and prints the exact JSON payload that \
                      `compile` would submit.\n\n\
                      Examples:\n  \
                      circuitpack bundle circuits/main.circom\n  \
                      circuitpack bundle circuits/main.circom -o payload.json"
    )]
    Bundle(BundleArgs),

    #[command(about = "Save an API key in the home directory for later use")]
    Login(LoginArgs),

    #[command(about = "Terminate the instance running a build")]
    Terminate(TerminateArgs),
}

/// Options shared by `compile` and `bundle`
#[derive(Args, Debug, Clone, Default)]
pub struct BuildOptionArgs {
    #[arg(
        short = 'p',
        long,
        value_name = "PROTOCOL",
        help = "Proving protocol: groth16 (default), fflonk, plonk (overrides circomkit.json)"
    )]
    pub protocol: Option<String>,

    #[arg(
        short = 'k',
        long,
        value_name = "FILE_OR_URL",
        help = "Final proving key: a local file (sent inline) or an https URL"
    )]
    pub proving_key: Option<String>,

    #[arg(
        short = 't',
        long,
        value_name = "SIZE_OR_URL",
        help = "Force a Powers of Tau size (8-28) or a URL to a specific file"
    )]
    pub ptau: Option<String>,

    #[arg(
        short = 'c',
        long,
        value_name = "VERSION",
        help = "Compiler version, e.g. v2.1.8 (defaults to the service's default)"
    )]
    pub circom_version: Option<String>,

    #[arg(
        short = 's',
        long,
        value_name = "VERSION",
        help = "SnarkJS version, e.g. 0.7.3"
    )]
    pub snarkjs_version: Option<String>,

    #[arg(long, value_name = "URL", help = "Service map URL (overrides CIRCUITPACK_CONFIG_URL)")]
    pub config: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct CompileArgs {
    #[arg(value_name = "FILE", help = "Entry circuit file")]
    pub file: PathBuf,

    #[command(flatten)]
    pub options: BuildOptionArgs,

    #[arg(
        short = 'i',
        long,
        value_name = "GB",
        help = "Run on a dedicated instance with this much memory: 4, 8, 16, 32, 64, 128, 256, 384, 512"
    )]
    pub instance: Option<String>,

    #[arg(
        short = 'r',
        long,
        value_name = "REQUEST_ID",
        help = "Re-attach to an earlier request instead of submitting"
    )]
    pub resume: Option<String>,

    #[arg(short = 'a', long, value_name = "KEY", help = "API key (overrides saved key)")]
    pub api_key: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format for the final result"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

#[derive(Parser, Debug, Clone)]
pub struct BundleArgs {
    #[arg(value_name = "FILE", help = "Entry circuit file")]
    pub file: PathBuf,

    #[command(flatten)]
    pub options: BuildOptionArgs,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the payload to a file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct LoginArgs {
    #[arg(value_name = "API_KEY")]
    pub api_key: String,
}

#[derive(Parser, Debug, Clone)]
pub struct TerminateArgs {
    #[arg(value_name = "REQUEST_ID")]
    pub request_id: String,

    #[arg(long, value_name = "URL", help = "Service map URL (overrides CIRCUITPACK_CONFIG_URL)")]
    pub config: Option<String>,

    #[arg(short = 'a', long, value_name = "KEY", help = "API key (overrides saved key)")]
    pub api_key: Option<String>,
}
