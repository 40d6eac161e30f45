//! Generic remote SSH host backend.
//!
//! No provisioning: the host named by the `hostname` parameter already
//! exists and is reachable. Auth uses the password from [`Settings`] and/or
//! a key file named by the `private-key-path` parameter. Kept under the
//! `slack` provider identifier for manifest compatibility.

use log::info;
use sshkit::{ConnectOptions, Session};

use manifest::Manifest;

use crate::backend::{ProviderBackend, Settings};
use crate::error::{Error, Result};
use crate::retry::Deadline;

/// Generic remote host backend.
pub struct SlackBackend {
    manifest: Manifest,
    password: Option<String>,
}

impl SlackBackend {
    pub fn new(m: &Manifest, settings: &Settings) -> Self {
        SlackBackend {
            manifest: m.clone(),
            password: settings.password.clone(),
        }
    }
}

impl ProviderBackend for SlackBackend {
    fn run(&mut self, deadline: &Deadline) -> Result<Session> {
        let hostname = self
            .manifest
            .parameters
            .get("hostname")
            .ok_or(Error::MissingParameter {
                name: "hostname",
                provider: "slack",
            })?;

        // a supplied password disables public key auth; only the first
        // method is offered to the server anyway
        let private_key = match self.manifest.parameters.get("private-key-path") {
            Some(path) if self.password.is_none() => {
                Some(std::fs::read(path).map_err(|e| {
                    Error::AuthMissing(format!("private key file {path}: {e}"))
                })?)
            }
            _ => None,
        };

        let session = Session::connect(&ConnectOptions {
            host: format!("{hostname}:22"),
            username: self.username().to_string(),
            password: self.password.clone(),
            private_key,
            insecure_host_key: true,
            deadline: deadline.instant(),
        })?;
        info!("remote host backend for {hostname} done");
        Ok(session)
    }

    fn close(&mut self) {
        // nothing provisioned, nothing to release
    }

    fn username(&self) -> &'static str {
        "root"
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}
