//! Data types for the manifest crate

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Provider backend a host is reconciled against.
///
/// The docker provider runs a local container and exists mainly for testing.
/// The slack provider is a generic, already-provisioned remote SSH host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Docker container, used for testing
    Docker,
    /// AWS EC2 instance, looked up or launched by tag
    Ec2,
    /// Generic remote SSH host, no provisioning
    Slack,
    /// Linode instance, looked up or created by label
    Linode,
}

impl Provider {
    /// The identifier used in manifest files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Docker => "docker",
            Provider::Ec2 => "ec2",
            Provider::Slack => "slack",
            Provider::Linode => "linode",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of package: services are candidates for restart after a file change,
/// binaries are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Installed and restartable through the service manager
    Service,
    /// Plain binary, never restarted
    Binary,
}

/// A template that will be rendered and copied to a target host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Absolute target path on the host
    #[serde(default)]
    pub path: String,
    /// File mode in octal, e.g. 0644 or 755
    #[serde(default)]
    pub mode: String,
    /// Owner of the file, `user` or `user:group`
    #[serde(default)]
    pub owner: String,
    /// Literal template source, or `embed://<name>` naming a bundled template
    #[serde(default)]
    pub content: String,
}

/// A package to be installed on a host during reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name as known to the package manager
    pub name: String,
    /// Exact version string; no range support
    pub version: String,
    /// Either service or binary
    pub kind: PackageKind,
    /// Files to render and transfer to the target host
    #[serde(default)]
    pub files: Vec<File>,
    /// Parameters made available when rendering this package's files
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}
