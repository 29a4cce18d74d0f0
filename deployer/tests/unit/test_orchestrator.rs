//! Pipeline tests against in-memory collaborators

mod doubles;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use doubles::{FakeBuilder, FakeControlPlane, FakeRemote};
use wsdeploy::deploy::images::{ImageResolver, Resolution, ResolverTimeouts};
use wsdeploy::deploy::orchestrator::{DeploymentRun, Orchestrator, OrchestratorOptions, Stage};
use wsdeploy::deploy::session::{PollBudget, SessionProvisioner};
use wsdeploy::deploy::stack::{StackDeployer, StackTimeouts};
use wsdeploy::errors::DeployError;
use wsdeploy::filesys::dir::Dir;
use wsdeploy::filesys::file::File;
use wsdeploy::models::{
    Credential, HostTarget, ImageRef, SessionRecord, SessionStatus, StackDefinition, UserRecord,
};
use wsdeploy::retry::RetryPolicy;
use wsdeploy::storage::source::load_source;

const TAG: &str = "registry.local/desktop:1.0";

const STACK: &str = r#"
version: "3.8"
services:
  kasm_db:
    image: postgres:16
    environment:
      POSTGRES_DB: kasm
"#;

fn host() -> HostTarget {
    HostTarget {
        address: "10.0.0.5".to_string(),
        port: 22,
        username: "deploy".to_string(),
        credential: Credential::Agent,
        known_hosts: None,
        connect_timeout: Duration::from_secs(5),
    }
}

fn poll() -> PollBudget {
    PollBudget {
        attempts: 3,
        interval: Duration::from_millis(1),
    }
}

/// Work directory with a build context named `desktop`
fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("contexts/desktop")).unwrap();
    dir
}

fn image() -> ImageRef {
    ImageRef::new(TAG).unwrap().with_build_context("desktop", None)
}

fn resolver(work: &TempDir, builder: Arc<FakeBuilder>, remote: Arc<FakeRemote>) -> ImageResolver {
    ImageResolver::new(
        builder,
        remote,
        Dir::new(work.path().join("artifacts")),
        work.path().join("contexts"),
        "/opt/wsdeploy",
        RetryPolicy::no_delay(3),
        ResolverTimeouts {
            list: Duration::from_secs(5),
            transfer: Duration::from_secs(5),
            load: Duration::from_secs(5),
        },
    )
}

fn provisioner(control_plane: Arc<FakeControlPlane>, remote: Arc<FakeRemote>) -> SessionProvisioner {
    SessionProvisioner::new(
        control_plane,
        remote,
        RetryPolicy::no_delay(3),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
}

fn stack_deployer(work: &TempDir, remote: Arc<FakeRemote>) -> StackDeployer {
    StackDeployer::new(
        remote,
        Dir::new(work.path().join("stacks")),
        RetryPolicy::no_delay(3),
        StackTimeouts {
            command: Duration::from_secs(5),
            transfer: Duration::from_secs(5),
            compose_up: Duration::from_secs(5),
        },
    )
}

fn orchestrator(
    work: &TempDir,
    builder: Arc<FakeBuilder>,
    remote: Arc<FakeRemote>,
    control_plane: Arc<FakeControlPlane>,
) -> Orchestrator {
    Orchestrator::new(
        resolver(work, builder, remote.clone()),
        stack_deployer(work, remote.clone()),
        provisioner(control_plane, remote),
        OrchestratorOptions {
            remote_dir: "/opt/wsdeploy".to_string(),
            network: "kasm_default_network".to_string(),
            concurrency: 4,
            poll: poll(),
        },
    )
}

fn run(users: Vec<UserRecord>) -> DeploymentRun {
    DeploymentRun {
        stack: StackDefinition::from_yaml(STACK).unwrap(),
        stack_name: "kasm".to_string(),
        host: host(),
        users,
    }
}

fn session(user_id: &str) -> SessionRecord {
    SessionRecord {
        session_id: format!("kasm-{}", user_id),
        user_id: user_id.to_string(),
        image_id: "img-0".to_string(),
        status: SessionStatus::Requested,
        container_id: None,
        requested_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_end_to_end_with_one_session_stuck_starting() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::with_images(&[TAG]).with_status("bob", "starting"));

    let source = File::new(work.path().join("users.yml"));
    std::fs::write(
        source.path(),
        format!(
            "workspaces:\n  desktop:\n    image: {}\n    build_context: desktop\nusers:\n  - username: alice\n    workspace: desktop\n  - username: bob\n    workspace: desktop\n",
            TAG
        ),
    )
    .unwrap();
    let users = load_source(&source).await.unwrap().user_records().unwrap();

    let orchestrator = orchestrator(&work, builder.clone(), remote.clone(), control_plane.clone())
        .with_source(source.clone());
    let report = orchestrator.run(run(users), &CancellationToken::new()).await;

    // built, exported and loaded exactly once
    assert_eq!(builder.builds(), 1);
    assert_eq!(builder.exports(), 1);
    assert_eq!(remote.count("docker load"), 1);
    // stack deployed exactly once
    assert_eq!(remote.count("docker compose"), 1);
    // two sessions requested, at most two attached
    assert_eq!(control_plane.requests(), 2);
    assert!(remote.count("docker network connect") <= 2);
    assert_eq!(remote.count("docker network connect"), 1);

    // partial results: both sessions reported, only alice attached
    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.sessions["alice"].status, SessionStatus::Running);
    assert_eq!(report.sessions["alice"].container_id.as_deref(), Some("ctr-u-alice"));
    assert_eq!(report.sessions["bob"].status, SessionStatus::Starting);
    assert!(report.attached.contains("alice"));
    assert!(!report.attached.contains("bob"));
    assert!(report.error().is_none());

    // exported artifact removed after the load
    let artifact = work.path().join("artifacts").join(image().artifact_file_name());
    assert!(!artifact.exists());

    // identifiers written back
    let persisted = load_source(&source).await.unwrap();
    assert_eq!(persisted.users[0].user_id.as_deref(), Some("u-alice"));
    assert_eq!(persisted.users[1].kasm_id.as_deref(), Some("kasm-u-bob"));
}

#[tokio::test]
async fn test_build_failure_only_fails_users_of_that_image() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::with_remote_images(&["nginx:latest"]));
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::with_images(&["nginx"]));

    // no build context and not on the host: cannot be resolved
    let broken = UserRecord::new("carol", ImageRef::new("team/broken:1").unwrap());
    let fine = UserRecord::new("dave", ImageRef::new("nginx").unwrap());

    let orchestrator = orchestrator(&work, builder.clone(), remote.clone(), control_plane.clone());
    let report = orchestrator.run(run(vec![broken, fine]), &CancellationToken::new()).await;

    assert_eq!(builder.builds(), 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Image);
    assert_eq!(report.failures[0].entity, "team/broken:1");
    assert_eq!(control_plane.requests(), 1);
    assert!(report.sessions.contains_key("dave"));
    assert!(report.attached.contains("dave"));
    assert!(report.error().is_some());
}

#[tokio::test]
async fn test_no_stack_deploy_without_any_image() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::default());

    let user = UserRecord::new("carol", ImageRef::new("team/broken:1").unwrap());
    let orchestrator = orchestrator(&work, builder, remote.clone(), control_plane.clone());
    let report = orchestrator.run(run(vec![user]), &CancellationToken::new()).await;

    assert_eq!(remote.count("docker compose"), 0);
    assert_eq!(control_plane.requests(), 0);
    assert!(report.sessions.is_empty());
    assert!(report.error().is_some());
}

#[tokio::test]
async fn test_resolver_skips_everything_when_tag_present() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::with_remote_images(&[TAG, "postgres:16"]));
    let remote = Arc::new(FakeRemote::default());

    let resolution = resolver(&work, builder.clone(), remote.clone())
        .ensure(&host(), &image(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution, Resolution::AlreadyPresent);
    assert_eq!(builder.builds(), 0);
    assert_eq!(builder.exports(), 0);
    assert_eq!(remote.copy_count(), 0);
    assert!(remote.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_resolver_prefers_cached_artifact() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default());

    let artifact: PathBuf = work.path().join("artifacts").join(image().artifact_file_name());
    std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    std::fs::write(&artifact, b"cached").unwrap();

    let resolution = resolver(&work, builder.clone(), remote.clone())
        .ensure(&host(), &image(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution, Resolution::LoadedFromCache);
    assert_eq!(builder.builds(), 0);
    assert_eq!(remote.copy_count(), 1);
    assert_eq!(remote.copies.lock().unwrap()[0].1, "/opt/wsdeploy/images");
    assert_eq!(remote.count("docker load"), 1);
    assert_eq!(remote.count("rm -f"), 1);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_resolver_without_build_context_reports_build_error() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default());

    let result = resolver(&work, builder.clone(), remote.clone())
        .ensure(&host(), &ImageRef::new("team/broken:1").unwrap(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(DeployError::BuildError(_))));
    assert_eq!(builder.builds(), 0);
    assert_eq!(remote.copy_count(), 0);
}

#[tokio::test]
async fn test_resolver_retries_busy_load() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default().with_failure("docker load", 1, "daemon busy"));

    let resolution = resolver(&work, builder.clone(), remote.clone())
        .ensure(&host(), &image(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution, Resolution::BuiltAndLoaded);
    assert_eq!(remote.count("docker load"), 2);
    assert_eq!(builder.builds(), 1);
}

#[tokio::test]
async fn test_resolver_keeps_artifact_when_load_keeps_failing() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default().with_failure("docker load", usize::MAX, "no space left on device"));
    let resolver = resolver(&work, builder.clone(), remote.clone());
    let cancel = CancellationToken::new();

    let result = resolver.ensure(&host(), &image(), &cancel).await;

    assert!(matches!(result, Err(DeployError::CommandFailed { .. })));
    assert_eq!(remote.count("docker load"), 3);
    assert_eq!(remote.count("rm -f"), 0);
    let artifact = work.path().join("artifacts").join(image().artifact_file_name());
    assert!(artifact.exists());

    // the next attempt loads the kept archive instead of rebuilding
    remote.failures.lock().unwrap().clear();
    let resolution = resolver.ensure(&host(), &image(), &cancel).await.unwrap();
    assert_eq!(resolution, Resolution::LoadedFromCache);
    assert_eq!(builder.builds(), 1);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_resolver_falls_back_to_cache_when_listing_fails() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder {
        list_failure: Some("connection refused".to_string()),
        ..Default::default()
    });
    let remote = Arc::new(FakeRemote::default());

    let artifact = work.path().join("artifacts").join(image().artifact_file_name());
    std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    std::fs::write(&artifact, b"cached").unwrap();

    let resolution = resolver(&work, builder.clone(), remote.clone())
        .ensure(&host(), &image(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution, Resolution::LoadedFromCache);
    assert_eq!(builder.lists.load(Ordering::SeqCst), 3);
    assert_eq!(builder.builds(), 0);
    assert_eq!(remote.count("docker load"), 1);
}

#[tokio::test]
async fn test_compose_up_failure_aborts_run() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::with_remote_images(&["nginx:latest"]));
    let remote = Arc::new(FakeRemote::default().with_failure(
        "docker compose",
        usize::MAX,
        "Error response from daemon: port is already allocated",
    ));
    let control_plane = Arc::new(FakeControlPlane::with_images(&["nginx"]));

    let users = vec![
        UserRecord::new("alice", ImageRef::new("nginx").unwrap()),
        UserRecord::new("bob", ImageRef::new("nginx").unwrap()),
    ];
    let orchestrator = orchestrator(&work, builder, remote.clone(), control_plane.clone());
    let report = orchestrator.run(run(users), &CancellationToken::new()).await;

    assert_eq!(remote.count("docker compose"), 1);
    assert_eq!(remote.count("docker-compose"), 0);
    assert_eq!(control_plane.requests(), 0);
    assert_eq!(control_plane.creates(), 0);
    assert!(report.sessions.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Stack);
    assert_eq!(report.failures[0].entity, "kasm");
    assert!(report.error().unwrap().to_string().contains("stack failed for kasm"));
}

#[tokio::test]
async fn test_stack_deploy_falls_back_to_standalone_compose() {
    let work = workspace();
    let remote = Arc::new(FakeRemote::default().with_failure(
        "docker compose",
        usize::MAX,
        "docker: 'compose' is not a docker command.\nSee 'docker --help'",
    ));

    let stack = StackDefinition::from_yaml(STACK).unwrap();
    stack_deployer(&work, remote.clone())
        .deploy(&host(), &stack, "kasm", "/opt/wsdeploy", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(remote.count("docker compose"), 1);
    assert_eq!(remote.count("docker-compose -f /opt/wsdeploy/kasm.yml up -d"), 1);
    assert_eq!(remote.copy_count(), 1);
    assert!(work.path().join("stacks/kasm.yml").exists());
}

#[tokio::test]
async fn test_concurrent_ensure_serializes_builds() {
    let work = workspace();
    let builder = Arc::new(FakeBuilder::default());
    let remote = Arc::new(FakeRemote::default());
    let resolver = resolver(&work, builder.clone(), remote.clone());
    let cancel = CancellationToken::new();
    let (host, image) = (host(), image());

    let (first, second) = tokio::join!(
        resolver.ensure(&host, &image, &cancel),
        resolver.ensure(&host, &image, &cancel)
    );

    // the fake host never lists the image, so both calls build, one after the other
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(builder.builds(), 2);
    assert_eq!(builder.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_await_attachable_starting_is_not_an_error() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(
        FakeControlPlane::default()
            .with_user("bob", "u-bob")
            .with_status("bob", "starting"),
    );

    let outcome = provisioner(control_plane, remote)
        .await_attachable(&session("u-bob"), poll(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Starting);
    assert!(outcome.container_id.is_none());
}

#[tokio::test]
async fn test_await_attachable_keeps_polling_after_slow_status() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(
        FakeControlPlane::default().with_stalled_polls(1, Duration::from_millis(300)),
    );
    let provisioner = SessionProvisioner::new(
        control_plane.clone(),
        remote,
        RetryPolicy::no_delay(3),
        Duration::from_secs(5),
        Duration::from_millis(50),
    );
    let budget = PollBudget {
        attempts: 5,
        interval: Duration::from_millis(1),
    };

    let outcome = provisioner
        .await_attachable(&session("u-1"), budget, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Running);
    assert_eq!(outcome.container_id.as_deref(), Some("ctr-u-1"));
    assert_eq!(control_plane.status_polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_await_attachable_budget_spent_on_slow_status() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(
        FakeControlPlane::default().with_stalled_polls(3, Duration::from_millis(300)),
    );
    let provisioner = SessionProvisioner::new(
        control_plane.clone(),
        remote,
        RetryPolicy::no_delay(3),
        Duration::from_secs(5),
        Duration::from_millis(20),
    );

    let outcome = provisioner
        .await_attachable(&session("u-2"), poll(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Requested);
    assert!(outcome.container_id.is_none());
    assert_eq!(control_plane.status_polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_await_attachable_failed_is_an_error() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(
        FakeControlPlane::default()
            .with_user("erin", "u-erin")
            .with_status("erin", "failed"),
    );

    let result = provisioner(control_plane, remote)
        .await_attachable(&session("u-erin"), poll(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(DeployError::SessionError(_))));
}

#[tokio::test]
async fn test_await_attachable_unexpected_status_is_skipped() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(
        FakeControlPlane::default()
            .with_user("frank", "u-frank")
            .with_status("frank", "paused"),
    );

    let outcome = provisioner(control_plane.clone(), remote)
        .await_attachable(&session("u-frank"), poll(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Unexpected("paused".to_string()));
    assert!(outcome.container_id.is_none());
    assert_eq!(control_plane.status_polls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_await_attachable_returns_last_status_on_cancel() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut requested = session("u-gina");
    requested.status = SessionStatus::Starting;
    let outcome = provisioner(control_plane.clone(), remote)
        .await_attachable(&requested, poll(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Starting);
    assert_eq!(control_plane.status_polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_attach_already_attached_is_soft_failure() {
    let remote = Arc::new(FakeRemote {
        attach_failure: Some(
            "Error response from daemon: endpoint with name ctr already exists in network".to_string(),
        ),
        ..Default::default()
    });
    let control_plane = Arc::new(FakeControlPlane::default());

    let attached = provisioner(control_plane, remote.clone())
        .attach_to_network(&host(), "ctr", "kasm_default_network", &CancellationToken::new())
        .await
        .unwrap();

    assert!(!attached);
    assert_eq!(remote.count("docker network connect"), 1);
}

#[tokio::test]
async fn test_ensure_user_reuses_existing_user() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::default().with_user("alice", "u-existing"));
    let provisioner = provisioner(control_plane.clone(), remote);
    let cancel = CancellationToken::new();

    let user = UserRecord::new("alice", image());
    assert_eq!(provisioner.ensure_user(&user, &cancel).await.unwrap(), "u-existing");

    let new_user = UserRecord::new("henry", image());
    assert_eq!(provisioner.ensure_user(&new_user, &cancel).await.unwrap(), "u-henry");
    assert_eq!(control_plane.creates(), 1);
}

#[tokio::test]
async fn test_request_session_passes_environment() {
    let remote = Arc::new(FakeRemote::default());
    let control_plane = Arc::new(FakeControlPlane::default());
    let provisioner = provisioner(control_plane.clone(), remote);

    let environment = BTreeMap::from([("LANG".to_string(), "C".to_string())]);
    let record = provisioner
        .request_session("u-1", "img-0", &environment, &BTreeMap::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.session_id, "kasm-u-1");
    assert_eq!(record.status, SessionStatus::Requested);
    assert_eq!(control_plane.requests(), 1);
}
