//! wsdeploy - Entry Point
//!
//! Builds or locates workspace images, brings the backend stack up on a remote
//! docker host and provisions one session per declared user.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use wsdeploy::app::options::DeployOptions;
use wsdeploy::app::run::{deploy, destroy, list_images, print_summary};
use wsdeploy::deploy::compose;
use wsdeploy::filesys::file::File;
use wsdeploy::logs::{init_logging, LogLevel, LogOptions};
use wsdeploy::models::stack::{MergeMode, StackDefinition};
use wsdeploy::storage::settings::Settings;
use wsdeploy::utils::version_info;

#[derive(Parser)]
#[command(name = "wsdeploy", version, about = "Provision workspace sessions on remote docker hosts")]
struct Cli {
    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy the stack and provision every declared user
    Deploy {
        #[command(flatten)]
        settings: SettingsArg,

        /// Declarative source listing workspaces and users
        #[arg(long)]
        source: PathBuf,

        /// Stack documents, merged in order
        #[arg(long = "stack", required = true)]
        stacks: Vec<PathBuf>,

        /// Keep the first definition on key collisions instead of failing
        #[arg(long)]
        keep_first: bool,

        /// Name of the stack document on the host
        #[arg(long, default_value = "wsdeploy")]
        name: String,
    },

    /// Stack document tooling
    #[command(subcommand)]
    Compose(ComposeCommand),

    /// List images on the remote host
    Images {
        #[command(flatten)]
        settings: SettingsArg,

        /// List images of this machine instead
        #[arg(long)]
        local: bool,
    },

    /// Destroy every session recorded in the declarative source
    Destroy {
        #[command(flatten)]
        settings: SettingsArg,

        #[arg(long)]
        source: PathBuf,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum ComposeCommand {
    /// Merge two stack documents
    Merge {
        first: PathBuf,
        second: PathBuf,
        #[arg(long)]
        keep_first: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace a single-service template with named replicas
    Replicate {
        file: PathBuf,
        #[arg(long)]
        service: String,
        #[arg(long)]
        count: usize,
        /// Replica names, or one base name expanded to `<base>-1 .. <base>-<count>`
        #[arg(long = "name")]
        names: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a stack document against the schema
    Validate { file: PathBuf },
}

#[derive(Args)]
struct SettingsArg {
    /// Settings file
    #[arg(long, default_value = "wsdeploy.yml")]
    settings: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Version => {
            println!("{}", serde_json::to_string_pretty(&version_info())?);
            Ok(())
        }
        Command::Compose(command) => {
            let _guard = start_logging(cli.log_level.unwrap_or_default(), cli.log_json, None);
            run_compose(command).await
        }
        Command::Deploy {
            settings,
            source,
            stacks,
            keep_first,
            name,
        } => {
            let settings = load_settings(&settings.settings).await?;
            let _guard = start_logging(
                cli.log_level.unwrap_or(settings.log_level),
                cli.log_json,
                settings.log_dir.clone(),
            );
            let options = DeployOptions::from_settings(&settings);

            let mode = merge_mode(keep_first);
            let mut stack = StackDefinition::default();
            for path in &stacks {
                stack = compose::merge(&stack, &read_stack(path).await?, mode)
                    .with_context(|| format!("merging {}", path.display()))?;
            }

            let cancel = cancel_on_shutdown();
            let report = deploy(&options, File::new(source), stack, &name, &cancel).await?;
            print_summary(&report);
            match report.error() {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
        Command::Images { settings, local } => {
            let settings = load_settings(&settings.settings).await?;
            let _guard = start_logging(
                cli.log_level.unwrap_or(settings.log_level),
                cli.log_json,
                settings.log_dir.clone(),
            );
            let options = DeployOptions::from_settings(&settings);

            let cancel = cancel_on_shutdown();
            for image in list_images(&options, local, &cancel).await? {
                println!("{}", image);
            }
            Ok(())
        }
        Command::Destroy { settings, source } => {
            let settings = load_settings(&settings.settings).await?;
            let _guard = start_logging(
                cli.log_level.unwrap_or(settings.log_level),
                cli.log_json,
                settings.log_dir.clone(),
            );
            let options = DeployOptions::from_settings(&settings);

            let cancel = cancel_on_shutdown();
            let report = destroy(&options, File::new(source), &cancel).await?;
            for username in &report.destroyed {
                println!("destroyed session of {}", username);
            }
            if !report.failures.is_empty() {
                for (username, message) in &report.failures {
                    eprintln!("failed to destroy session of {}: {}", username, message);
                }
                bail!("{} session(s) could not be destroyed", report.failures.len());
            }
            Ok(())
        }
    }
}

async fn run_compose(command: ComposeCommand) -> anyhow::Result<()> {
    match command {
        ComposeCommand::Merge {
            first,
            second,
            keep_first,
            output,
        } => {
            let merged = compose::merge(
                &read_stack(&first).await?,
                &read_stack(&second).await?,
                merge_mode(keep_first),
            )?;
            write_stack(&merged, output).await
        }
        ComposeCommand::Replicate {
            file,
            service,
            count,
            names,
            output,
        } => {
            let mut stack = read_stack(&file).await?;
            compose::replicate(&mut stack, &service, count, &names)?;
            write_stack(&stack, output).await
        }
        ComposeCommand::Validate { file } => {
            compose::validate(&read_stack(&file).await?)
                .with_context(|| format!("validating {}", file.display()))?;
            println!("{} is valid", file.display());
            Ok(())
        }
    }
}

fn merge_mode(keep_first: bool) -> MergeMode {
    if keep_first {
        MergeMode::KeepFirst
    } else {
        MergeMode::Strict
    }
}

async fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    Settings::load(&File::new(path))
        .await
        .with_context(|| format!("loading settings from {}", path.display()))
}

async fn read_stack(path: &Path) -> anyhow::Result<StackDefinition> {
    let contents = File::new(path).read_string().await?;
    StackDefinition::from_yaml(&contents).with_context(|| format!("parsing {}", path.display()))
}

async fn write_stack(stack: &StackDefinition, output: Option<PathBuf>) -> anyhow::Result<()> {
    let rendered = stack.to_yaml()?;
    match output {
        Some(path) => File::new(path).write_string(&rendered).await?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn start_logging(
    log_level: LogLevel,
    json_format: bool,
    log_dir: Option<PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_options = LogOptions {
        log_level,
        log_dir,
        json_format,
        ..Default::default()
    };
    match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    }
}

/// Token cancelled on the first shutdown signal
fn cancel_on_shutdown() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        await_shutdown_signal().await;
        token.cancel();
    });
    cancel
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) =
            (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        else {
            error!("Failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
