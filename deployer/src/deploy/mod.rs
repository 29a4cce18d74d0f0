//! Deployment pipeline

pub mod compose;
pub mod fsm;
pub mod images;
pub mod orchestrator;
pub mod schema;
pub mod session;
pub mod stack;

pub use images::{ImageResolver, Resolution};
pub use orchestrator::{DeploymentRun, Orchestrator, RunReport, Stage, StageFailure};
pub use session::{PollBudget, PollOutcome, SessionProvisioner};
pub use stack::StackDeployer;
