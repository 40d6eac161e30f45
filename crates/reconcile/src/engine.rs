//! Per-host reconciliation engine.
//!
//! One reconciler drives one host through a linear sequence: observe
//! installed packages, install what is missing, render and transfer files,
//! apply permissions, restart the services whose content changed, check
//! service status. Any failure outside the documented tolerated cases ends
//! the host with an error; reconvergence relies on every step being
//! idempotent rather than on checkpoints.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use sshkit::Session;

use manifest::{Manifest, Package, PackageKind, Provider};

use crate::error::Result;
use crate::files::{ChangedPackages, FileManager, TEMPLATE_KEY_LAST_MODIFIED_DATE};
use crate::packages::{InstalledPackage, PackageManager, STATUS_INSTALLED};
use crate::retry::Deadline;

/// Reconciles one host against its manifest over an established session.
pub struct Reconciler<'a> {
    manifest: &'a Manifest,
    session: &'a Session,
    deadline: &'a Deadline,
}

impl<'a> Reconciler<'a> {
    pub fn new(manifest: &'a Manifest, session: &'a Session, deadline: &'a Deadline) -> Self {
        Reconciler {
            manifest,
            session,
            deadline,
        }
    }

    /// Bring the host into the state the manifest describes.
    pub fn reconcile(&self) -> Result<()> {
        info!("reconcile {}", self.manifest.id);

        let packages = PackageManager::new(self.manifest, self.session);
        let observed = packages.query()?;
        info!("observed {} packages on target", observed.len());

        self.deadline.check("package install")?;
        let missing = missing_packages(&self.manifest.packages, &observed);
        if !missing.is_empty() {
            info!(
                "{} is missing {} packages, installing",
                self.manifest.id,
                missing.len()
            );
            packages.update()?;
            packages.install(&missing)?;
        }

        self.deadline.check("file transfer")?;
        let mut data = HashMap::new();
        data.insert(
            TEMPLATE_KEY_LAST_MODIFIED_DATE.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        for (k, v) in &self.manifest.parameters {
            data.insert(k.clone(), v.clone());
        }

        info!("rendering and copying templates with {data:?}");
        let files = FileManager::new(self.manifest, self.session);
        let (changed, transfer_result) = files.render_and_transfer(&data);
        info!(
            "changed packages: {:?}",
            changed.keys().collect::<Vec<_>>()
        );
        transfer_result?;

        self.deadline.check("permissions")?;
        info!("applying permissions to files");
        files.apply_permissions()?;

        // packages and files are reconciled; restart only the services
        // whose file content changed
        self.deadline.check("service restart")?;
        for pkg in services_to_restart(&changed) {
            packages.restart_service(&pkg.name)?;
        }

        self.check_service_status();
        Ok(())
    }

    /// Check status for the services we expect to be running, best effort.
    /// Docker containers run sysvinit rather than systemd, so the probe
    /// command differs there.
    fn check_service_status(&self) {
        for pkg in &self.manifest.packages {
            if pkg.kind != PackageKind::Service {
                continue;
            }
            // service name and package name might not be the same thing;
            // they match for current manifests. A service-name override on
            // the package would lift that assumption.
            let cmd = if self.manifest.provider == Provider::Docker {
                format!("service {} status", pkg.name)
            } else {
                format!("systemctl status {}", pkg.name)
            };
            match self.session.exec(&cmd) {
                Ok(out) => info!(
                    "service status for {}: '{}'",
                    pkg.name,
                    String::from_utf8_lossy(&out).trim()
                ),
                Err(e) => warn!("unable to get status of service {}: {e}", pkg.name),
            }
        }
    }

    /// Remove the manifest's packages from the host; purge also drops their
    /// configuration. File removal runs even when the package manager fails.
    pub fn remove(&self, purge: bool) -> Result<()> {
        info!("remove {} (purge? {purge})", self.manifest.id);

        let packages = PackageManager::new(self.manifest, self.session);
        let observed = packages.query()?;
        info!("observed {} packages on target", observed.len());

        let present: Vec<Package> = self
            .manifest
            .packages
            .iter()
            .filter(|p| observed.contains_key(&p.name))
            .cloned()
            .collect();

        if present.is_empty() {
            info!("nothing to remove on {}", self.manifest.id);
            return Ok(());
        }

        self.deadline.check("package remove")?;
        if let Err(e) = packages.remove(purge, &present) {
            warn!("error removing packages on {}: {e}", self.manifest.id);
        }

        let files = FileManager::new(self.manifest, self.session);
        files.remove(&present)?;
        Ok(())
    }
}

/// The packages to restart after a transfer pass: exactly the changed
/// packages of service kind.
pub(crate) fn services_to_restart(changed: &ChangedPackages) -> Vec<&Package> {
    changed
        .values()
        .filter(|p| p.kind == PackageKind::Service)
        .collect()
}

/// Desired packages that need an install: absent on the target, or present
/// in a state other than installed. A present package at a different
/// version is logged and left alone; exact-version installs are out of
/// scope.
pub(crate) fn missing_packages(
    desired: &[Package],
    observed: &HashMap<String, InstalledPackage>,
) -> Vec<Package> {
    let mut missing = Vec::with_capacity(desired.len());
    for pkg in desired {
        match observed.get(&pkg.name) {
            None => {
                info!("desired package {} is missing on target", pkg.name);
                missing.push(pkg.clone());
            }
            Some(actual) if actual.status != STATUS_INSTALLED => {
                info!(
                    "desired package {} appears not to be installed, will install, status: {}",
                    pkg.name, actual.status
                );
                missing.push(pkg.clone());
            }
            Some(actual) if actual.version != pkg.version => {
                info!(
                    "desired package {} version {} does not match actual version {}",
                    pkg.name, pkg.version, actual.version
                );
            }
            Some(_) => {
                info!("desired package {} is ok, installed", pkg.name);
            }
        }
    }
    missing
}
