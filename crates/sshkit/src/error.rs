//! Error types for SSH sessions

use thiserror::Error;

/// Errors that can occur while dialing or using an SSH session
#[derive(Error, Debug)]
pub enum Error {
    /// The host string could not be resolved to a socket address
    #[error("invalid host address {host}: {reason}")]
    Address {
        host: String,
        reason: String,
    },

    /// The private key could not be parsed or offered
    #[error("unable to use private key: {0}")]
    Key(String),

    /// Neither a private key nor a password was supplied
    #[error("no auth method available: provide a private key or a password")]
    NoAuthMethod,

    /// The local known-hosts file could not be loaded
    #[error("error on known hosts: {0}")]
    KnownHosts(String),

    /// The remote host key did not match the known-hosts entry
    #[error("host key verification failed for {host}")]
    HostKeyMismatch { host: String },

    /// Every dial attempt failed
    #[error("retries exhausted, failed to dial {host}: {reason}")]
    DialExhausted { host: String, reason: String },

    /// The caller's deadline expired while dialing
    #[error("deadline exceeded while dialing {host}")]
    DialTimeout { host: String },

    /// A remote command exited with a nonzero status.
    /// Carries the remote exit status and the combined output.
    #[error("remote command did not exit cleanly: {command}: exit status {status}: {}",
            String::from_utf8_lossy(.output))]
    CommandFailed {
        command: String,
        status: i32,
        output: Vec<u8>,
    },

    /// Underlying libssh2 failure
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Underlying IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Remote exit status, when this error came from a remote command.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a failed remote command reported a missing file.
    pub fn is_not_exist(&self) -> bool {
        match self {
            Error::CommandFailed { output, .. } => {
                String::from_utf8_lossy(output).contains("No such file or directory")
            }
            _ => false,
        }
    }
}

/// Result type for SSH operations
pub type Result<T> = std::result::Result<T, Error>;
