//! Control-plane HTTP access

pub mod client;
pub mod controlplane;

pub use client::HttpClient;
pub use controlplane::ControlPlane;
