//! wsdeploy Library
//!
//! Deployment pipeline for containerized workspace sessions: image
//! availability on remote docker hosts, compose stack assembly and deployment,
//! and per-user session provisioning against the control plane.

pub mod app;
pub mod builder;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod process;
pub mod remote;
pub mod retry;
pub mod storage;
pub mod utils;
