//! Error types for reconcile operations.
//!
//! Errors are categorized so retry loops can tell transient provider
//! conditions apart from permanent failures, and so the runner can report
//! which host failed and why.

use thiserror::Error;

/// Categories of reconcile errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Provider daemon/API not usable at all
    Backend,
    /// Credentials missing or rejected
    Auth,
    /// Host exists but cannot be reached yet (transient, retryable)
    Network,
    /// No instance matched the lookup (retryable while polling)
    NotFound,
    /// Deadline expired
    Timeout,
    /// Remote command or transfer failed
    Remote,
    /// Manifest or file input is invalid
    Invalid,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::NotFound)
    }
}

/// Errors that can occur while reconciling one host.
#[derive(Error, Debug)]
pub enum Error {
    /// The provider daemon or API is not usable
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Required credentials are missing or were rejected
    #[error("missing or rejected credentials: {0}")]
    AuthMissing(String),

    /// The provider refused to create the instance
    #[error("error creating instance {id}: {reason}")]
    CreateFailed { id: String, reason: String },

    /// The instance exists but cannot be reached
    #[error("host not reachable: {0}")]
    NotReachable(String),

    /// No instance matched the manifest id at the provider
    #[error("no instance found for {0}")]
    NoInstance(String),

    /// A required provider parameter is missing from the manifest
    #[error("missing required parameter {name} for provider {provider}")]
    MissingParameter {
        name: &'static str,
        provider: &'static str,
    },

    /// The per-host deadline expired
    #[error("timeout: {0}")]
    Timeout(String),

    /// dpkg-query failed with a real error (exit status >= 2)
    #[error("error querying packages: {0}")]
    QueryFailed(String),

    /// A file transfer failed
    #[error("error transferring {path}: {source}")]
    TransferFailed {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// A file in the manifest has no target path
    #[error("file path not set on a file of package {package}")]
    InvalidFile { package: String },

    /// A bundled template name did not resolve
    #[error("no bundled template named {0}")]
    TemplateNotFound(String),

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// SSH failure (dial, exec, copy)
    #[error(transparent)]
    Ssh(#[from] sshkit::Error),

    /// Manifest failure
    #[error(transparent)]
    Manifest(#[from] manifest::Error),

    /// Provider CLI/API output could not be parsed
    #[error("error parsing provider response: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::BackendUnavailable(_) => ErrorCategory::Backend,
            Error::AuthMissing(_) => ErrorCategory::Auth,
            Error::CreateFailed { .. } => ErrorCategory::Backend,
            Error::NotReachable(_) => ErrorCategory::Network,
            Error::NoInstance(_) => ErrorCategory::NotFound,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::QueryFailed(_) | Error::TransferFailed { .. } => ErrorCategory::Remote,
            Error::Ssh(_) => ErrorCategory::Remote,
            Error::MissingParameter { .. }
            | Error::InvalidFile { .. }
            | Error::TemplateNotFound(_)
            | Error::Manifest(_) => ErrorCategory::Invalid,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Result type for reconcile operations.
pub type Result<T> = std::result::Result<T, Error>;
