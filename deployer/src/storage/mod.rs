//! Local configuration and state files

pub mod layout;
pub mod settings;
pub mod source;
