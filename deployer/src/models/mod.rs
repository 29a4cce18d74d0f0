//! Data model of a deployment run

pub mod host;
pub mod image;
pub mod session;
pub mod stack;
pub mod user;

pub use host::{Credential, HostTarget};
pub use image::{ArtifactTar, ImageRef};
pub use session::{SessionRecord, SessionStatus};
pub use stack::{Environment, MergeMode, ServiceSpec, StackDefinition};
pub use user::{DeclarativeSource, UserProfile, UserRecord, Workspace};
