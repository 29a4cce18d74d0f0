//! Deployment run orchestration.
//!
//! A run moves through fixed stages: images, stack, users and sessions,
//! polling and attachment, then write-back of identifiers. Per-user failures
//! are collected into the report; only failures every remaining user depends
//! on end the run early.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::deploy::images::ImageResolver;
use crate::deploy::session::{PollBudget, SessionProvisioner};
use crate::deploy::stack::StackDeployer;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::host::HostTarget;
use crate::models::image::ImageRef;
use crate::models::session::{SessionRecord, SessionStatus};
use crate::models::stack::StackDefinition;
use crate::models::user::UserRecord;
use crate::storage::source::{persist_ids, FieldUpdate, IdUpdate};

/// Everything one orchestration call works on
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub stack: StackDefinition,
    /// Name of the stack document on the host
    pub stack_name: String,
    pub host: HostTarget,
    pub users: Vec<UserRecord>,
}

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Image,
    Stack,
    User,
    Session,
    Poll,
    Attach,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Image => "image",
            Stage::Stack => "stack",
            Stage::User => "user",
            Stage::Session => "session",
            Stage::Poll => "poll",
            Stage::Attach => "attach",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// One failed entity of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    /// Image tag, stack name or username
    pub entity: String,
    pub message: String,
}

/// Outcome of a run, partial results included
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Control-plane user id per username
    pub user_ids: BTreeMap<String, String>,
    /// Session per username
    pub sessions: BTreeMap<String, SessionRecord>,
    /// Usernames whose session container is on the network
    pub attached: BTreeSet<String>,
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            user_ids: BTreeMap::new(),
            sessions: BTreeMap::new(),
            attached: BTreeSet::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, stage: Stage, entity: impl Into<String>, err: &DeployError) {
        let entity = entity.into();
        error!(stage = %stage, entity = %entity, "{}", err);
        self.failures.push(StageFailure {
            stage,
            entity,
            message: err.to_string(),
        });
    }

    /// Aggregate error naming each failed stage and its entities
    pub fn error(&self) -> Option<DeployError> {
        if self.failures.is_empty() {
            return None;
        }

        let mut by_stage: BTreeMap<Stage, Vec<&str>> = BTreeMap::new();
        for failure in &self.failures {
            by_stage.entry(failure.stage).or_default().push(&failure.entity);
        }
        let summary: Vec<String> = by_stage
            .iter()
            .map(|(stage, entities)| format!("{} failed for {}", stage, entities.join(", ")))
            .collect();
        Some(DeployError::RunFailed(summary.join("; ")))
    }

    /// Identifier changes to write back into the declarative source
    pub fn id_updates(&self) -> BTreeMap<String, IdUpdate> {
        self.user_ids
            .iter()
            .map(|(username, user_id)| {
                let kasm_id = match self.sessions.get(username) {
                    Some(session) => FieldUpdate::Set(session.session_id.clone()),
                    None => FieldUpdate::Keep,
                };
                let update = IdUpdate {
                    user_id: FieldUpdate::Set(user_id.clone()),
                    kasm_id,
                };
                (username.clone(), update)
            })
            .collect()
    }
}

/// Run-wide settings of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub remote_dir: String,
    pub network: String,
    /// Upper bound of concurrent per-user operations
    pub concurrency: usize,
    pub poll: PollBudget,
}

/// Sequences image resolution, stack deployment and session provisioning
pub struct Orchestrator {
    resolver: ImageResolver,
    deployer: StackDeployer,
    provisioner: SessionProvisioner,
    options: OrchestratorOptions,
    source: Option<File>,
}

impl Orchestrator {
    pub fn new(
        resolver: ImageResolver,
        deployer: StackDeployer,
        provisioner: SessionProvisioner,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            resolver,
            deployer,
            provisioner,
            options,
            source: None,
        }
    }

    /// Write provisioned identifiers back into `source` after each run
    pub fn with_source(mut self, source: File) -> Self {
        self.source = Some(source);
        self
    }

    pub fn provisioner(&self) -> &SessionProvisioner {
        &self.provisioner
    }

    /// Execute one deployment run. Never fails as a whole; see [`RunReport::error`].
    pub async fn run(&self, run: DeploymentRun, cancel: &CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        self.run_stages(RunReport::new(run_id), run, cancel)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        mut report: RunReport,
        run: DeploymentRun,
        cancel: &CancellationToken,
    ) -> RunReport {
        info!(
            "Starting deployment of {} user(s) to {}",
            run.users.len(),
            run.host
        );

        // 1. images
        let users = self.ensure_images(&run.host, run.users, &mut report, cancel).await;
        if users.is_empty() {
            warn!("No user has an available image, skipping the stack deploy");
            return report;
        }
        if self.cancelled(&mut report, Stage::Stack, cancel) {
            return report;
        }

        // 2. stack
        if let Err(e) = self
            .deployer
            .deploy(&run.host, &run.stack, &run.stack_name, &self.options.remote_dir, cancel)
            .await
        {
            report.fail(Stage::Stack, run.stack_name.clone(), &e);
            return report;
        }
        if self.cancelled(&mut report, Stage::Session, cancel) {
            return report;
        }

        // 3. users and session requests, all issued before any polling
        let image_ids = self.resolve_image_ids(&users, &mut report, cancel).await;
        let requested: Vec<_> = stream::iter(users.iter().filter_map(|user| {
            image_ids
                .get(&user.image.tag)
                .map(|image_id| self.provision_user(user, image_id, cancel))
        }))
        .buffer_unordered(self.options.concurrency.max(1))
        .collect()
        .await;

        let mut sessions = Vec::new();
        for (username, user_id, result) in requested {
            if let Some(user_id) = user_id {
                report.user_ids.insert(username.clone(), user_id);
            }
            match result {
                Ok(session) => {
                    report.sessions.insert(username.clone(), session.clone());
                    sessions.push((username, session));
                }
                Err((stage, e)) => report.fail(stage, username, &e),
            }
        }

        // 4. poll and attach
        let attached: Vec<_> = stream::iter(
            sessions
                .into_iter()
                .map(|(username, session)| self.attach_session(&run.host, username, session, cancel)),
        )
        .buffer_unordered(self.options.concurrency.max(1))
        .collect()
        .await;

        for (username, session, result) in attached {
            report.sessions.insert(username.clone(), session);
            match result {
                Ok(true) => {
                    report.attached.insert(username);
                }
                Ok(false) => {}
                Err((stage, e)) => report.fail(stage, username, &e),
            }
        }

        // 5. write back identifiers
        if let Some(source) = &self.source {
            if let Err(e) = persist_ids(source, &report.id_updates()).await {
                report.fail(Stage::Persist, source.path().display().to_string(), &e);
            }
        }

        info!(
            "Deployment finished: {} session(s), {} attached, {} failure(s)",
            report.sessions.len(),
            report.attached.len(),
            report.failures.len()
        );
        report
    }

    /// Record a cancellation observed before `next` started
    fn cancelled(&self, report: &mut RunReport, next: Stage, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            report.fail(next, "run", &DeployError::Cancelled(format!("before {} stage", next)));
            return true;
        }
        false
    }

    /// Resolve each distinct tag once; users of a tag that failed drop out of the run
    async fn ensure_images(
        &self,
        host: &HostTarget,
        users: Vec<UserRecord>,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Vec<UserRecord> {
        let mut images: Vec<&ImageRef> = Vec::new();
        for user in &users {
            if !images.iter().any(|image| image.tag == user.image.tag) {
                images.push(&user.image);
            }
        }

        let mut failed = BTreeSet::new();
        for image in images {
            if let Err(e) = self.resolver.ensure(host, image, cancel).await {
                report.fail(Stage::Image, image.tag.clone(), &e);
                failed.insert(image.tag.clone());
            }
        }

        users
            .into_iter()
            .filter(|user| {
                let keep = !failed.contains(&user.image.tag);
                if !keep {
                    warn!(
                        "Skipping user {}: image {} is unavailable",
                        user.username, user.image.tag
                    );
                }
                keep
            })
            .collect()
    }

    async fn resolve_image_ids(
        &self,
        users: &[UserRecord],
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, String> {
        let tags: BTreeSet<&str> = users.iter().map(|u| u.image.tag.as_str()).collect();

        let mut image_ids = BTreeMap::new();
        for tag in tags {
            match self.provisioner.resolve_image_id(tag, cancel).await {
                Ok(id) => {
                    image_ids.insert(tag.to_string(), id);
                }
                Err(e) => report.fail(Stage::Image, tag, &e),
            }
        }
        image_ids
    }

    async fn provision_user(
        &self,
        user: &UserRecord,
        image_id: &str,
        cancel: &CancellationToken,
    ) -> (String, Option<String>, Result<SessionRecord, (Stage, DeployError)>) {
        let username = user.username.clone();

        let user_id = match self.provisioner.ensure_user(user, cancel).await {
            Ok(id) => id,
            Err(e) => return (username, None, Err((Stage::User, e))),
        };

        let session = self
            .provisioner
            .request_session(&user_id, image_id, &user.environment, &user.volumes, cancel)
            .await
            .map_err(|e| (Stage::Session, e));
        (username, Some(user_id), session)
    }

    async fn attach_session(
        &self,
        host: &HostTarget,
        username: String,
        mut session: SessionRecord,
        cancel: &CancellationToken,
    ) -> (String, SessionRecord, Result<bool, (Stage, DeployError)>) {
        let outcome = match self
            .provisioner
            .await_attachable(&session, self.options.poll, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, DeployError::SessionError(_)) {
                    session.status = SessionStatus::Failed;
                }
                return (username, session, Err((Stage::Poll, e)));
            }
        };

        session.status = outcome.status;
        session.container_id = outcome.container_id.clone();
        let Some(container_id) = outcome.container_id else {
            return (username, session, Ok(false));
        };

        let result = self
            .provisioner
            .attach_to_network(host, &container_id, &self.options.network, cancel)
            .await
            .map(|_| true)
            .map_err(|e| (Stage::Attach, e));
        (username, session, result)
    }
}
