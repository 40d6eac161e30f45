//! # reconcile
//!
//! The per-host reconciliation engine for caravel.
//!
//! Given a loaded manifest, [`run`] obtains a provider backend, establishes
//! an authenticated SSH session to the host the manifest describes
//! (provisioning it first when necessary), and drives the desired state
//! onto it: packages installed, templated files rendered and transferred
//! with content-hash short-circuiting, ownership and modes applied, and
//! changed services restarted.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use reconcile::{backend::Settings, Deadline, Operation};
//!
//! let m = manifest::Manifest::from_files("web.yaml", "packages.yaml")?;
//! let deadline = Deadline::after(Duration::from_secs(900));
//! reconcile::run(&m, Operation::Reconcile, &Settings::default(), &deadline)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod engine;
mod error;
pub mod files;
pub mod packages;
pub mod retry;
pub mod templates;

pub use error::{Error, ErrorCategory, Result};
pub use retry::Deadline;

use std::time::Instant;

use log::{info, warn};

use manifest::Manifest;

use crate::backend::{ProviderBackend, Settings};
use crate::engine::Reconciler;

/// Operation to perform against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Bring the host into the manifest's desired state
    Reconcile,
    /// Remove the manifest's packages and files from the host
    Remove,
    /// Like remove, but also drop package configuration
    Purge,
}

/// Reconcile one host end to end.
///
/// Owns the backend for the duration of the call: the backend is
/// constructed from the manifest's provider, asked for a session, and
/// closed again once the operation finishes, success or not.
pub fn run(m: &Manifest, op: Operation, settings: &Settings, deadline: &Deadline) -> Result<()> {
    let start = Instant::now();
    let mut be = backend::new(m, settings)?;
    let result = run_with_backend(be.as_mut(), m, op, deadline);
    be.close();
    info!("{op:?} for {} done in {:?}", m.id, start.elapsed());
    result
}

fn run_with_backend(
    be: &mut dyn ProviderBackend,
    m: &Manifest,
    op: Operation,
    deadline: &Deadline,
) -> Result<()> {
    info!("running {} backend for {}", m.provider, m.id);
    let session = be.run(deadline)?;

    // purely informational, targets missing os-release are fine
    match session.exec("cat /etc/os-release") {
        Ok(out) => info!("os-release: {}", String::from_utf8_lossy(&out).trim()),
        Err(e) => warn!("unable to get /etc/os-release: {e}"),
    }

    let reconciler = Reconciler::new(m, &session, deadline);
    match op {
        Operation::Reconcile => reconciler.reconcile(),
        Operation::Remove => reconciler.remove(false),
        Operation::Purge => reconciler.remove(true),
    }
}
