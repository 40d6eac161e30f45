//! Linode provider backend.
//!
//! Talks to the Linode REST API directly. The API token comes from the
//! `LINODE_TOKEN` environment variable; instances are looked up by label
//! (the manifest id) and created when absent. Instances survive close, the
//! same as EC2.

use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use sshkit::{ConnectOptions, Session};

use manifest::Manifest;

use crate::backend::ProviderBackend;
use crate::error::{Error, Result};
use crate::retry::{with_retry, Deadline, RetryConfig};

const API_BASE: &str = "https://api.linode.com/v4";

/// Poll cadence while checking whether an instance exists.
const EXISTS_RETRY: RetryConfig = RetryConfig::new(Duration::from_secs(5), 2);
/// Poll cadence while waiting for a created instance to run.
const RUNNING_RETRY: RetryConfig = RetryConfig::new(Duration::from_secs(10), 15);

#[derive(Debug, Clone, Deserialize)]
struct Instance {
    id: u64,
    label: String,
    status: String,
    #[serde(default)]
    ipv4: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    data: Vec<Instance>,
}

/// Linode provider backend.
pub struct LinodeBackend {
    manifest: Manifest,
    agent: ureq::Agent,
    token: String,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl LinodeBackend {
    /// Create the backend, loading the keypair named by the manifest's
    /// `private-key-path` / `public-key-path` parameters and the API token
    /// from `LINODE_TOKEN`.
    pub fn new(m: &Manifest) -> Result<Self> {
        let private_key_path =
            m.parameters
                .get("private-key-path")
                .ok_or(Error::MissingParameter {
                    name: "private-key-path",
                    provider: "linode",
                })?;
        let private_key = std::fs::read(private_key_path).map_err(|e| {
            Error::AuthMissing(format!("private key file {private_key_path}: {e}"))
        })?;

        let public_key_path =
            m.parameters
                .get("public-key-path")
                .ok_or(Error::MissingParameter {
                    name: "public-key-path",
                    provider: "linode",
                })?;
        let public_key = std::fs::read(public_key_path)
            .map_err(|e| Error::AuthMissing(format!("public key file {public_key_path}: {e}")))?;

        let token = std::env::var("LINODE_TOKEN").map_err(|_| {
            Error::AuthMissing("could not find LINODE_TOKEN, please assert it is set".to_string())
        })?;

        Ok(LinodeBackend {
            manifest: m.clone(),
            agent: ureq::Agent::new_with_defaults(),
            token,
            private_key,
            public_key,
        })
    }

    fn get_instances(&self, label: &str) -> Result<Vec<Instance>> {
        let filter = format!("{{\"label\": \"{label}\"}}");
        let mut response = self
            .agent
            .get(format!("{API_BASE}/linode/instances"))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-Filter", filter)
            .call()
            .map_err(map_api_error)?;
        let list: InstanceList = response.body_mut().read_json().map_err(map_api_error)?;
        Ok(list.data)
    }

    fn get_instance(&self, id: u64) -> Result<Instance> {
        let mut response = self
            .agent
            .get(format!("{API_BASE}/linode/instances/{id}"))
            .header("Authorization", format!("Bearer {}", self.token))
            .call()
            .map_err(map_api_error)?;
        response.body_mut().read_json().map_err(map_api_error)
    }

    /// Check for an instance labelled with the manifest id, skipping
    /// instances already on their way out.
    fn exists(&self, deadline: &Deadline) -> Result<Option<Instance>> {
        let lookup = with_retry(
            &EXISTS_RETRY,
            deadline,
            || {
                let instances = self.get_instances(&self.manifest.id)?;
                instances
                    .into_iter()
                    .find(|i| i.status != "deleting")
                    .ok_or_else(|| Error::NoInstance(self.manifest.id.clone()))
            },
            |e| matches!(e, Error::NoInstance(_)),
        );
        match lookup {
            Ok(instance) => Ok(Some(instance)),
            Err(Error::NoInstance(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create an instance from the manifest parameters, authorizing the
    /// configured public key for root.
    fn create(&self) -> Result<Instance> {
        let p = |name: &'static str| -> Result<&str> {
            self.manifest
                .parameters
                .get(name)
                .map(String::as_str)
                .ok_or(Error::MissingParameter {
                    name,
                    provider: "linode",
                })
        };

        let authorized_key = String::from_utf8_lossy(&self.public_key).trim().to_string();
        let body = serde_json::json!({
            "region": p("region")?,
            "type": p("size")?,
            "label": self.manifest.id,
            "image": p("image-id")?,
            "authorized_keys": [authorized_key],
            "booted": true,
        });

        let mut response = self
            .agent
            .post(format!("{API_BASE}/linode/instances"))
            .header("Authorization", format!("Bearer {}", self.token))
            .send_json(&body)
            .map_err(|e| Error::CreateFailed {
                id: self.manifest.id.clone(),
                reason: e.to_string(),
            })?;
        let instance: Instance = response.body_mut().read_json().map_err(map_api_error)?;
        info!(
            "created instance {} ({}) for {}",
            instance.id, instance.label, self.manifest.id
        );
        Ok(instance)
    }

    /// Poll the instance until its status is running.
    fn wait_for_running(&self, id: u64, deadline: &Deadline) -> Result<Instance> {
        with_retry(
            &RUNNING_RETRY,
            deadline,
            || {
                let instance = self.get_instance(id)?;
                info!(
                    "checking instance state, instance: {}, status: {}",
                    instance.id, instance.status
                );
                if instance.status != "running" {
                    return Err(Error::NotReachable(format!(
                        "instance {} status: {}",
                        instance.id, instance.status
                    )));
                }
                Ok(instance)
            },
            |e| e.is_retryable(),
        )
    }
}

impl ProviderBackend for LinodeBackend {
    fn run(&mut self, deadline: &Deadline) -> Result<Session> {
        let instance = match self.exists(deadline)? {
            Some(instance) => {
                info!(
                    "instance {} exists for {}",
                    instance.id, self.manifest.id
                );
                self.wait_for_running(instance.id, deadline)?
            }
            None => {
                let created = self.create()?;
                info!(
                    "waiting for instance {} to be running, {}",
                    created.id, self.manifest.id
                );
                self.wait_for_running(created.id, deadline)?
            }
        };

        let address = instance
            .ipv4
            .first()
            .ok_or_else(|| Error::NotReachable(format!("instance {} has no ipv4", instance.id)))?;

        Session::connect(&ConnectOptions {
            host: format!("{address}:22"),
            username: self.username().to_string(),
            password: None,
            private_key: Some(self.private_key.clone()),
            insecure_host_key: true,
            deadline: deadline.instant(),
        })
        .map_err(Error::from)
    }

    fn close(&mut self) {
        // cloud instances are long-lived; nothing held locally
    }

    fn username(&self) -> &'static str {
        "root"
    }
}

fn map_api_error(e: ureq::Error) -> Error {
    debug!("linode api error: {e}");
    match e {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(403) => {
            Error::AuthMissing(format!("linode api: {e}"))
        }
        _ => Error::BackendUnavailable(format!("linode api: {e}")),
    }
}
