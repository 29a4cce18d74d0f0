//! Command runners: wire collaborators from options and execute one command

use std::collections::BTreeMap;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::options::DeployOptions;
use crate::builder::{DockerCli, ImageBuilder};
use crate::deploy::images::ImageResolver;
use crate::deploy::orchestrator::{DeploymentRun, Orchestrator, OrchestratorOptions, RunReport};
use crate::deploy::session::SessionProvisioner;
use crate::deploy::stack::StackDeployer;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::models::stack::StackDefinition;
use crate::remote::SshExecutor;
use crate::storage::source::{load_source, persist_ids, FieldUpdate, IdUpdate};

/// Collaborators shared by the commands
struct Components {
    executor: Arc<SshExecutor>,
    builder: Arc<DockerCli>,
    control_plane: Arc<HttpClient>,
}

async fn init(options: &DeployOptions) -> Result<Components, DeployError> {
    options.layout.setup().await?;

    let executor = Arc::new(SshExecutor::new(options.layout.control_dir().path()));
    let builder = Arc::new(DockerCli::new(
        executor.clone(),
        options.timeouts.build,
        options.timeouts.load,
        options.timeouts.command,
    ));
    let control_plane = Arc::new(HttpClient::new(
        &options.control_plane.base_url,
        options.control_plane.api_key.clone(),
        options.control_plane.api_key_secret.clone(),
        options.control_plane.timeout,
        options.retry.clone(),
    )?);

    Ok(Components {
        executor,
        builder,
        control_plane,
    })
}

fn provisioner(options: &DeployOptions, components: &Components) -> SessionProvisioner {
    SessionProvisioner::new(
        components.control_plane.clone(),
        components.executor.clone(),
        options.retry.clone(),
        options.timeouts.command,
        options.timeouts.status,
    )
}

/// Deploy `stack` and provision every user of the declarative source
pub async fn deploy(
    options: &DeployOptions,
    source_file: File,
    stack: StackDefinition,
    stack_name: &str,
    cancel: &CancellationToken,
) -> Result<RunReport, DeployError> {
    let source = load_source(&source_file).await?;
    let users = source.user_records()?;
    let components = init(options).await?;

    let resolver = ImageResolver::new(
        components.builder.clone(),
        components.executor.clone(),
        options.layout.artifacts_dir(),
        options.build_contexts_dir.clone(),
        options.remote_dir.clone(),
        options.retry.clone(),
        options.timeouts.resolver(),
    );
    let deployer = StackDeployer::new(
        components.executor.clone(),
        options.layout.stacks_dir(),
        options.retry.clone(),
        options.timeouts.stack(),
    );
    let orchestrator = Orchestrator::new(
        resolver,
        deployer,
        provisioner(options, &components),
        OrchestratorOptions {
            remote_dir: options.remote_dir.clone(),
            network: options.network.clone(),
            concurrency: options.concurrency,
            poll: options.poll,
        },
    )
    .with_source(source_file);

    let run = DeploymentRun {
        stack,
        stack_name: stack_name.to_string(),
        host: options.host.clone(),
        users,
    };
    let report = orchestrator.run(run, cancel).await;

    components.executor.close(&options.host).await;
    Ok(report)
}

/// Image tags on the remote host, or on this machine when `local`
pub async fn list_images(
    options: &DeployOptions,
    local: bool,
    cancel: &CancellationToken,
) -> Result<Vec<String>, DeployError> {
    let components = init(options).await?;
    let host = if local { None } else { Some(&options.host) };

    let images = components.builder.list_images(host, cancel).await;
    if !local {
        components.executor.close(&options.host).await;
    }
    images
}

/// Outcome of a destroy command
#[derive(Debug, Default)]
pub struct DestroyReport {
    pub destroyed: Vec<String>,
    pub failures: Vec<(String, String)>,
}

/// Destroy every session recorded in the source and forget its id
pub async fn destroy(
    options: &DeployOptions,
    source_file: File,
    cancel: &CancellationToken,
) -> Result<DestroyReport, DeployError> {
    let source = load_source(&source_file).await?;
    let users = source.user_records()?;
    let components = init(options).await?;
    let provisioner = provisioner(options, &components);

    let mut report = DestroyReport::default();
    let mut updates = BTreeMap::new();
    for user in users {
        let (Some(session_id), Some(user_id)) = (&user.session_id, &user.user_id) else {
            continue;
        };
        match provisioner.destroy_session(session_id, user_id, cancel).await {
            Ok(()) => {
                updates.insert(
                    user.username.clone(),
                    IdUpdate {
                        kasm_id: FieldUpdate::Clear,
                        ..Default::default()
                    },
                );
                report.destroyed.push(user.username);
            }
            Err(e) => {
                warn!("Failed to destroy session of {}: {}", user.username, e);
                report.failures.push((user.username, e.to_string()));
            }
        }
    }

    persist_ids(&source_file, &updates).await?;
    info!(
        "Destroyed {} session(s), {} failure(s)",
        report.destroyed.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Print a human-readable run summary
pub fn print_summary(report: &RunReport) {
    println!("{} {}", "Run".bold(), report.run_id);

    for (username, session) in &report.sessions {
        let attached = if report.attached.contains(username) {
            "attached".green()
        } else {
            "not attached".yellow()
        };
        println!(
            "  {:<20} {:<12} {:<38} {}",
            username,
            session.status.to_string(),
            session.session_id,
            attached
        );
    }

    for failure in &report.failures {
        println!(
            "  {} [{}] {}: {}",
            "FAILED".red().bold(),
            failure.stage,
            failure.entity,
            failure.message
        );
    }

    if report.failures.is_empty() {
        println!("{}", "Deployment succeeded".green().bold());
    }
}
