//! Debian/APT package operations over an SSH session.
//!
//! Assumes debian/ubuntu targets and drives apt-get and dpkg-query remotely.
//! Supporting rpm, pacman and friends would mean an abstraction over package
//! managers; not needed yet.

use std::collections::HashMap;

use log::{info, warn};
use sshkit::Session;

use manifest::{Manifest, Package, Provider};

use crate::error::{Error, Result};

/// dpkg-query status value for a fully installed package. Other states
/// (config-files, half-configured) are treated as not installed.
pub const STATUS_INSTALLED: &str = "installed";

/// Observation of one package on the target, parsed from dpkg-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Package name as reported by dpkg
    pub name: String,
    /// Installed version
    pub version: String,
    /// Short dpkg status, e.g. "installed" or "config-files"
    pub status: String,
}

/// Manages installed packages on a remote system over SSH.
pub struct PackageManager<'a> {
    session: &'a Session,
    manifest: &'a Manifest,
}

impl<'a> PackageManager<'a> {
    pub fn new(manifest: &'a Manifest, session: &'a Session) -> Self {
        PackageManager { session, manifest }
    }

    /// Query the install state of every desired package.
    ///
    /// Packages missing from the output are absent on the target.
    /// dpkg-query exits 1 when some of the queried packages are not
    /// installed; that is expected and tolerated. Exit status 2 and above is
    /// a real error.
    pub fn query(&self) -> Result<HashMap<String, InstalledPackage>> {
        if self.manifest.packages.is_empty() {
            return Err(Error::QueryFailed(
                "no packages provided to query".to_string(),
            ));
        }
        let names: Vec<&str> = self
            .manifest
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .collect();

        let output = match self.session.exec(&query_command(&names)) {
            Ok(out) => out,
            Err(sshkit::Error::CommandFailed {
                status: 1, output, ..
            }) => {
                // dpkg-query exits 1 when packages are not installed; their
                // absence from the output marks them for install.
                info!("dpkg-query returned 1, some packages not installed");
                output
            }
            Err(e) => return Err(Error::QueryFailed(e.to_string())),
        };

        Ok(parse_query_output(&output))
    }

    /// Refresh the package index.
    pub fn update(&self) -> Result<()> {
        let out = self.session.exec(update_command())?;
        log_output(&out);
        Ok(())
    }

    /// Install the given packages.
    pub fn install(&self, packages: &[Package]) -> Result<()> {
        if packages.is_empty() {
            return Err(Error::Other("no packages provided to install".to_string()));
        }

        // Docker containers deny service starts during install with
        // "invoke-rc.d: could not determine current runlevel"; a permissive
        // policy-rc.d is the documented workaround.
        if self.manifest.provider == Provider::Docker {
            let out = self.session.exec(policy_rc_d_command())?;
            log_output(&out);
        }

        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        let out = self.session.exec(&install_command(&names))?;
        log_output(&out);
        Ok(())
    }

    /// Remove the given packages; purge also drops their configuration.
    pub fn remove(&self, purge: bool, packages: &[Package]) -> Result<()> {
        if packages.is_empty() {
            return Err(Error::Other("no packages provided to remove".to_string()));
        }
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        info!("removing packages (purge? {purge}): {}", names.join(","));
        let out = self.session.exec(&remove_command(purge, &names))?;
        log_output(&out);
        Ok(())
    }

    /// Restart a service that was installed.
    pub fn restart_service(&self, name: &str) -> Result<()> {
        let out = self.session.exec(&restart_command(name))?;
        log_output(&out);
        Ok(())
    }
}

fn log_output(output: &[u8]) {
    for line in String::from_utf8_lossy(output).lines() {
        if !line.trim().is_empty() {
            info!("ssh> {line}");
        }
    }
}

// Command builders are pure so the exact shapes stay testable; remote test
// harnesses match on these strings.

pub(crate) fn query_command(names: &[&str]) -> String {
    format!(
        "DEBIAN_FRONTEND=noninteractive /usr/bin/dpkg-query -W \
         '-f=${{binary:Package}},${{Version}},${{db:Status-Status}}\\n' {}",
        names.join(" ")
    )
}

pub(crate) fn update_command() -> &'static str {
    "DEBIAN_FRONTEND=noninteractive apt-get update"
}

pub(crate) fn install_command(names: &[&str]) -> String {
    format!(
        "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
        names.join(" ")
    )
}

pub(crate) fn remove_command(purge: bool, names: &[&str]) -> String {
    let verb = if purge { "purge" } else { "remove" };
    format!(
        "DEBIAN_FRONTEND=noninteractive apt-get {verb} -y {}",
        names.join(" ")
    )
}

pub(crate) fn restart_command(name: &str) -> String {
    format!("service {name} restart")
}

pub(crate) fn policy_rc_d_command() -> &'static str {
    "printf '#!/bin/sh\\nexit 0\\n' > /usr/sbin/policy-rc.d"
}

/// Parse dpkg-query CSV output into a name-keyed map.
/// Lines that do not have the three expected fields are skipped.
pub(crate) fn parse_query_output(output: &[u8]) -> HashMap<String, InstalledPackage> {
    let mut packages = HashMap::new();
    for line in String::from_utf8_lossy(output).lines() {
        info!("ssh> {line}");
        let mut parts = line.splitn(3, ',');
        let (Some(name), Some(version), Some(status)) =
            (parts.next(), parts.next(), parts.next())
        else {
            warn!("skipping unparsable dpkg-query line: {line}");
            continue;
        };
        packages.insert(
            name.to_string(),
            InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
                status: status.to_string(),
            },
        );
    }
    packages
}
