use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use artifactory_docker_resource::artifactory::ArtifactoryClient;
use artifactory_docker_resource::clock::Clock;
use artifactory_docker_resource::config::{Settings, load_request};
use artifactory_docker_resource::error::format_error;
use artifactory_docker_resource::registry::RegistryClient;
use artifactory_docker_resource::resource::{
    CheckRequest, GetRequest, PutContext, PutRequest, check, get, put,
};
use artifactory_docker_resource::vcs::GitInspector;
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report versions newer than the one on stdin.
    Check,
    /// Fetch the version on stdin into a directory.
    In { dir: PathBuf },
    /// Publish an image from a directory.
    Out { dir: PathBuf },
}

/// The orchestrator runs `/opt/resource/check`, `/opt/resource/in` and
/// `/opt/resource/out`, which may all link to this binary.
fn dispatch_args(mut args: Vec<OsString>) -> Vec<OsString> {
    let invoked = args
        .first()
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string);

    if let Some(name) = invoked {
        if matches!(name.as_str(), "check" | "in" | "out") {
            args.insert(1, name.into());
        }
    }
    args
}

async fn run(settings: &Settings, command: Command, input: &str) -> Result<String> {
    let output = match command {
        Command::Check => {
            let request: CheckRequest = load_request(input).context("Invalid check request")?;
            debug!(source = ?request.source, version = %request.version, "Check");

            let store = ArtifactoryClient::new(&request.source, settings)?;
            let versions = check(&request, &store, &Clock::new()).await?;
            serde_json::to_string(&versions)?
        }
        Command::In { dir } => {
            let request: GetRequest = load_request(input).context("Invalid in request")?;
            debug!(source = ?request.source, version = %request.version, "In");

            let store = ArtifactoryClient::new(&request.source, settings)?;
            let registry = RegistryClient::new(&request.source, settings)?;
            let response = get(&request, &dir, &store, &registry).await?;
            serde_json::to_string(&response)?
        }
        Command::Out { dir } => {
            let request: PutRequest = load_request(input).context("Invalid out request")?;
            debug!(source = ?request.source, "Out");

            let store = ArtifactoryClient::new(&request.source, settings)?;
            let registry = RegistryClient::new(&request.source, settings)?;
            let env = |key: &str| std::env::var(key).ok();
            let context = PutContext {
                store: &store,
                registry: &registry,
                vcs: &GitInspector,
                env: &env,
                clock: Clock::new(),
            };
            let response = put(request, &dir, &context).await?;
            serde_json::to_string(&response)?
        }
    };

    Ok(output)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let settings = match Settings::load(Settings::figment()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", format_error(&err));
            return ExitCode::FAILURE;
        }
    };

    // Stdout carries the response, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str())),
        )
        .init();

    let options = Opt::parse_from(dispatch_args(std::env::args_os().collect()));

    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        error!("Failed to read request from stdin: {err}");
        return ExitCode::FAILURE;
    }

    match run(&settings, options.command, &input).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
