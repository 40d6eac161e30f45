//! Bounded-concurrency fan-out across manifests.
//!
//! Every manifest is parsed and validated before any backend is touched,
//! then each host is reconciled on its own worker with an independent
//! deadline. One failing host never cancels its siblings; failures are
//! collected and reported together once every host has finished.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use log::{error, info};
use rayon::prelude::*;

use manifest::Manifest;
use reconcile::backend::Settings;
use reconcile::{Deadline, Operation};

/// Hard ceiling on concurrent reconciles, to avoid overwhelming providers.
const MAX_CONCURRENCY: usize = 3;

/// Hard ceiling on manifests per invocation. Prevents a malformed or
/// malicious invocation from fanning out to a large number of hosts.
const MAX_MANIFESTS: usize = 10;

/// Options for one reconcile run.
pub struct Options {
    pub concurrency: usize,
    pub timeout: Duration,
    pub operation: Operation,
    pub password: Option<String>,
}

/// Reconcile every manifest against the shared packages file.
pub fn run(manifest_paths: &[PathBuf], packages_path: &Path, opts: &Options) -> Result<()> {
    if manifest_paths.len() > MAX_MANIFESTS {
        bail!(
            "{} manifests given, over the limit of {MAX_MANIFESTS}",
            manifest_paths.len()
        );
    }

    // load everything up front so a bad manifest fails the run before any
    // host or provider is touched
    let mut manifests = Vec::with_capacity(manifest_paths.len());
    for path in manifest_paths {
        let m = Manifest::from_files(path, packages_path)
            .with_context(|| format!("error reading manifest file {}", path.display()))?;
        manifests.push(m);
    }

    let jobs = clamp_concurrency(opts.concurrency);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("failed to create thread pool")?;

    let settings = Settings {
        password: opts.password.clone(),
    };
    let failures: Mutex<Vec<(String, reconcile::Error)>> = Mutex::new(Vec::new());

    pool.install(|| {
        manifests.par_iter().for_each(|m| {
            let deadline = Deadline::after(opts.timeout);
            info!("starting {:?} for {}", opts.operation, m.id);
            match reconcile::run(m, opts.operation, &settings, &deadline) {
                Ok(()) => println!("{} {}", "ok".green().bold(), m.id),
                Err(e) => {
                    error!("error reconciling {}: {e}", m.id);
                    println!("{} {}: {e}", "failed".red().bold(), m.id);
                    failures.lock().unwrap().push((m.id.clone(), e));
                }
            }
        });
    });

    let failures = failures.into_inner().unwrap();
    if !failures.is_empty() {
        let summary: Vec<String> = failures
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect();
        bail!(
            "{} of {} hosts failed:\n  {}",
            failures.len(),
            manifests.len(),
            summary.join("\n  ")
        );
    }
    Ok(())
}

/// Clamp the requested concurrency into [1, MAX_CONCURRENCY].
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_concurrency() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(1), 1);
        assert_eq!(clamp_concurrency(2), 2);
        assert_eq!(clamp_concurrency(3), 3);
        assert_eq!(clamp_concurrency(4), 3);
        assert_eq!(clamp_concurrency(128), 3);
    }

    #[test]
    fn test_manifest_cap_fails_before_backends() {
        let paths: Vec<PathBuf> = (0..11)
            .map(|i| PathBuf::from(format!("manifest-{i}.yaml")))
            .collect();
        let opts = Options {
            concurrency: 2,
            timeout: Duration::from_secs(1),
            operation: Operation::Reconcile,
            password: None,
        };
        let err = run(&paths, Path::new("packages.yaml"), &opts).unwrap_err();
        assert!(err.to_string().contains("over the limit"));
    }

    #[test]
    fn test_missing_manifest_fails_before_backends() {
        let opts = Options {
            concurrency: 2,
            timeout: Duration::from_secs(1),
            operation: Operation::Reconcile,
            password: None,
        };
        let err = run(
            &[PathBuf::from("/nonexistent/manifest.yaml")],
            Path::new("/nonexistent/packages.yaml"),
            &opts,
        )
        .unwrap_err();
        assert!(err.to_string().contains("error reading manifest file"));
    }
}
