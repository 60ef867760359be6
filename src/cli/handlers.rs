//! Subcommand handlers
//!
//! Each handler returns the process exit code. Failures are printed to stderr
//! with their error code; the detailed chain goes to the debug log.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::commands::{BuildOptionArgs, BundleArgs, CompileArgs, LoginArgs, OutputFormatArg, TerminateArgs};
use super::output::{format_payload, OutputFormat, OutputFormatter};
use crate::config::{resolve_api_key, CircuitpackConfig, RemoteConfig, UserConfig};
use crate::error::BuildError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::payload::{describe_files, BuildOptions, Payload, PayloadBuilder};
use crate::progress::{ConsoleRenderer, LoggingHandler, ProgressEvent, ProgressHandler, StatusRenderer};
use crate::remote::{BuildOrchestrator, BuildOutcome, HttpTransport, InstanceSize, RequestHistory, Transport};
use crate::source::SourceResolver;

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Human => OutputFormat::Human,
        }
    }
}

impl From<&BuildOptionArgs> for BuildOptions {
    fn from(args: &BuildOptionArgs) -> Self {
        Self {
            protocol: args.protocol.clone(),
            proving_key: args.proving_key.clone(),
            ptau: args.ptau.clone(),
            circom_version: args.circom_version.clone(),
            snarkjs_version: args.snarkjs_version.clone(),
        }
    }
}

pub async fn handle_compile(args: &CompileArgs, quiet: bool) -> i32 {
    let formatter = OutputFormatter::new(args.format.into());
    match compile(args, quiet).await {
        Ok(outcome) => match formatter.format_outcome(&outcome) {
            Ok(output) => {
                println!("{}", output);
                0
            }
            Err(e) => {
                error!("Failed to format output: {}", e);
                1
            }
        },
        Err(e) => report_failure(&formatter, &e),
    }
}

pub async fn handle_bundle(args: &BundleArgs, quiet: bool) -> i32 {
    match bundle(args, quiet).await {
        Ok(()) => 0,
        Err(e) => report_failure(&OutputFormatter::new(OutputFormat::Human), &e),
    }
}

pub fn handle_login(args: &LoginArgs) -> i32 {
    let Some(path) = UserConfig::default_path() else {
        error!("Could not determine home directory");
        return 1;
    };
    match save_api_key(&path, &args.api_key) {
        Ok(()) => {
            println!("API key saved to {}", path.display());
            0
        }
        Err(e) => {
            error!("Failed to save API key: {:#}", e);
            1
        }
    }
}

pub async fn handle_terminate(args: &TerminateArgs, quiet: bool) -> i32 {
    match terminate(args).await {
        Ok(()) => {
            if !quiet {
                println!("# Instance termination requested for {}", args.request_id);
            }
            0
        }
        Err(e) => report_failure(&OutputFormatter::new(OutputFormat::Human), &e),
    }
}

fn report_failure(formatter: &OutputFormatter, e: &anyhow::Error) -> i32 {
    debug!("Command failed: {:?}", e);
    match e.downcast_ref::<BuildError>() {
        Some(build_error) => eprintln!("{}", formatter.format_error(build_error)),
        None => eprintln!("Error: {:#}", e),
    }
    1
}

/// Environment config with the `--config` override applied, validated
fn load_config(config_url: Option<&str>) -> Result<CircuitpackConfig> {
    let default_config = CircuitpackConfig::default();
    let config = CircuitpackConfig {
        config_url: config_url
            .map(str::to_string)
            .unwrap_or(default_config.config_url.clone()),
        ..default_config
    };
    config.validate()?;
    debug!("{}", config);
    Ok(config)
}

fn load_user_config() -> Option<UserConfig> {
    let path = UserConfig::default_path()?;
    match UserConfig::load(&path) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!("Ignoring user config: {}", e);
            None
        }
    }
}

fn save_api_key(path: &Path, api_key: &str) -> Result<()> {
    let mut user = UserConfig::load(path)?;
    user.api_key = Some(api_key.to_string());
    user.save(path)?;
    Ok(())
}

fn transport_for(config: &CircuitpackConfig) -> Arc<dyn Transport> {
    Arc::new(HttpTransport::with_timeout(config.request_timeout()))
}

fn build_payload(
    entry: &Path,
    options: &BuildOptions,
    default_circom_path: &str,
    progress: &dyn ProgressHandler,
) -> Result<Payload> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let started = Instant::now();
    progress.on_progress(&ProgressEvent::ResolveStarted {
        entry: entry.display().to_string(),
    });
    let bundle = SourceResolver::new(fs.clone()).resolve(entry)?;
    progress.on_progress(&ProgressEvent::FilesResolved {
        count: bundle.len(),
        elapsed: started.elapsed(),
    });
    let payload = PayloadBuilder::new(fs, default_circom_path).build(&bundle, options)?;
    Ok(payload)
}

async fn compile(args: &CompileArgs, quiet: bool) -> Result<BuildOutcome> {
    let config = load_config(args.options.config.as_deref())?;
    let transport = transport_for(&config);
    let user = load_user_config();
    let api_key = resolve_api_key(args.api_key.as_deref(), &config, user.as_ref())?;

    let remote = RemoteConfig::fetch(transport.as_ref(), &config.config_url).await?;

    let renderer: Arc<dyn StatusRenderer> = if quiet {
        Arc::new(ConsoleRenderer::hidden())
    } else {
        Arc::new(ConsoleRenderer::new())
    };
    let progress: Arc<dyn ProgressHandler> = Arc::new(LoggingHandler);
    let orchestrator = BuildOrchestrator::new(
        transport,
        config.endpoints(&remote),
        api_key,
        renderer,
        progress.clone(),
    )
    .with_settings(config.orchestrator_settings())
    .with_history(RequestHistory::default_location());

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up");
            token.cancel();
        }
    });

    if let Some(request_id) = &args.resume {
        info!(request_id = %request_id, "Resuming earlier request");
        return Ok(orchestrator.resume(request_id, args.instance.as_deref()).await?);
    }

    let instance = args.instance.as_deref().map(InstanceSize::parse).transpose()?;
    let payload = build_payload(
        &args.file,
        &BuildOptions::from(&args.options),
        &remote.default_circom_path,
        progress.as_ref(),
    )?;
    if !quiet {
        print!("{}", describe_files(&payload));
    }

    Ok(orchestrator.run(payload, instance).await?)
}

async fn bundle(args: &BundleArgs, quiet: bool) -> Result<()> {
    let options = BuildOptions::from(&args.options);

    // the service map is only needed for the default compiler path
    let default_circom_path = if options.circom_version.is_some() {
        String::new()
    } else {
        let config = load_config(args.options.config.as_deref())?;
        let transport = transport_for(&config);
        RemoteConfig::fetch(transport.as_ref(), &config.config_url)
            .await?
            .default_circom_path
    };

    let payload = build_payload(&args.file, &options, &default_circom_path, &LoggingHandler)?;
    if !quiet {
        eprint!("{}", describe_files(&payload));
    }
    let json = format_payload(&payload)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write payload to {}", path.display()))?;
            if !quiet {
                eprintln!("Payload written to {}", path.display());
            }
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn terminate(args: &TerminateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let transport = transport_for(&config);
    let user = load_user_config();
    let api_key = resolve_api_key(args.api_key.as_deref(), &config, user.as_ref())?;
    let remote = RemoteConfig::fetch(transport.as_ref(), &config.config_url).await?;

    let orchestrator = BuildOrchestrator::new(
        transport,
        config.endpoints(&remote),
        api_key,
        Arc::new(ConsoleRenderer::hidden()),
        Arc::new(LoggingHandler),
    )
    .with_settings(config.orchestrator_settings());
    orchestrator
        .terminate(&args.request_id)
        .await
        .context("Termination request failed")?;
    Ok(())
}
