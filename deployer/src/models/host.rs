//! Remote execution endpoint

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// How the executor authenticates against the host
#[derive(Debug, Clone)]
pub enum Credential {
    /// Private key file passed with `-i`
    IdentityFile(PathBuf),
    /// Password fed to `sshpass` through the environment
    Password(SecretString),
    /// Whatever the local ssh agent and config provide
    Agent,
}

/// One remote execution endpoint, immutable for the duration of a run
#[derive(Debug, Clone)]
pub struct HostTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Known-hosts file used for host-key verification
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl HostTarget {
    /// `user@address` as understood by ssh and scp
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}
