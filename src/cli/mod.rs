pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    BuildOptionArgs, BundleArgs, CliArgs, Commands, CompileArgs, LoginArgs, OutputFormatArg,
    TerminateArgs,
};
pub use output::{format_payload, OutputFormat, OutputFormatter};
