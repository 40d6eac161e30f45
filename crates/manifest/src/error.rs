//! Error types for the manifest crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or querying manifests
#[derive(Error, Debug)]
pub enum Error {
    /// The host document was empty
    #[error("cannot create a manifest from an empty host document")]
    EmptyManifest,

    /// The packages document was empty
    #[error("cannot create packages from an empty packages document")]
    EmptyPackages,

    /// One of the YAML documents failed to deserialize
    #[error("error unmarshalling {document} document: {source}")]
    Parse {
        /// Which document failed ("manifest" or "packages")
        document: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    /// A file carried a mode that is not 3-4 octal digits
    #[error("invalid file mode {mode} for file {path}")]
    InvalidFileMode {
        /// The offending mode string
        mode: String,
        /// Target path of the file carrying the mode
        path: String,
    },

    /// No package matched the prefix/suffix pair
    #[error("no package found with prefix: {prefix} and suffix: {suffix}")]
    PackageNotFound { prefix: String, suffix: String },

    /// Failed to read a manifest or packages file
    #[error("error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The system entropy source failed while generating an id
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, Error>;
