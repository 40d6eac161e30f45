//! AWS EC2 provider backend.
//!
//! Wraps the `aws` CLI with JSON output, so credentials resolve through the
//! standard default chain (env, shared config, instance profile). Instances
//! are looked up by the `Name` tag carrying the manifest id; absent
//! instances are launched and waited on until they reach the running state.
//! Instances are not terminated on close; cleanup is a separate concern.

use std::process::Command;
use std::time::Duration;

use log::{debug, info};
use serde_json::Value;
use sshkit::{ConnectOptions, Session};

use manifest::Manifest;

use crate::backend::ProviderBackend;
use crate::error::{Error, Result};
use crate::retry::{with_retry, Deadline, RetryConfig};

/// Poll cadence while checking whether an instance exists.
const EXISTS_RETRY: RetryConfig = RetryConfig::new(Duration::from_secs(5), 2);
/// Poll cadence while waiting for a launched instance to run.
const RUNNING_RETRY: RetryConfig = RetryConfig::new(Duration::from_secs(10), 15);

/// An instance observed at the provider.
#[derive(Debug, Clone)]
struct Instance {
    id: String,
    state: String,
    public_dns_name: String,
}

/// EC2 provider backend.
pub struct Ec2Backend {
    manifest: Manifest,
    private_key: Vec<u8>,
}

impl Ec2Backend {
    /// Create the backend, loading the SSH private key named by the
    /// manifest's `private-key-path` parameter.
    pub fn new(m: &Manifest) -> Result<Self> {
        let key_path = m.parameters.get("private-key-path").ok_or(
            Error::MissingParameter {
                name: "private-key-path",
                provider: "ec2",
            },
        )?;
        let private_key = std::fs::read(key_path)
            .map_err(|e| Error::AuthMissing(format!("private key file {key_path}: {e}")))?;
        Ok(Ec2Backend {
            manifest: m.clone(),
            private_key,
        })
    }

    fn run_aws(&self, args: &[&str]) -> Result<Value> {
        debug!("aws {}", args.join(" "));
        let output = Command::new("aws")
            .args(args)
            .args(["--output", "json"])
            .output()
            .map_err(|e| Error::BackendUnavailable(format!("failed to execute aws: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("Unable to locate credentials")
                || stderr.contains("ExpiredToken")
                || stderr.contains("AuthFailure")
            {
                return Err(Error::AuthMissing(stderr));
            }
            return Err(Error::CreateFailed {
                id: self.manifest.id.clone(),
                reason: stderr,
            });
        }
        if output.stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Check for a non-terminated instance tagged with the manifest id.
    fn exists(&self, deadline: &Deadline) -> Result<Option<Instance>> {
        let filter = format!("Name=tag:Name,Values={}", self.manifest.id);
        let lookup = with_retry(
            &EXISTS_RETRY,
            deadline,
            || {
                let out = self.run_aws(&["ec2", "describe-instances", "--filters", &filter])?;
                first_instance(&out, &self.manifest.id)
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

    /// Launch a new instance from the manifest parameters.
    fn create(&self) -> Result<Instance> {
        let p = |name: &'static str| -> Result<&str> {
            self.manifest
                .parameters
                .get(name)
                .map(String::as_str)
                .ok_or(Error::MissingParameter {
                    name,
                    provider: "ec2",
                })
        };

        let tag_spec = format!(
            "ResourceType=instance,Tags=[{{Key=Name,Value={}}}]",
            self.manifest.id
        );
        // 8 GiB gp3 root volume, released with the instance
        let block_device = "DeviceName=/dev/sdh,\
             Ebs={DeleteOnTermination=true,VolumeSize=8,VolumeType=gp3}";

        let out = self.run_aws(&[
            "ec2",
            "run-instances",
            "--count",
            "1",
            "--image-id",
            p("image-id")?,
            "--instance-type",
            p("size")?,
            "--key-name",
            p("key-name")?,
            "--security-group-ids",
            p("security-group-id")?,
            "--subnet-id",
            p("subnet-id")?,
            "--instance-initiated-shutdown-behavior",
            "terminate",
            "--block-device-mappings",
            block_device,
            "--tag-specifications",
            &tag_spec,
        ])?;

        let instance_id = out["Instances"][0]["InstanceId"]
            .as_str()
            .ok_or_else(|| Error::CreateFailed {
                id: self.manifest.id.clone(),
                reason: "run-instances returned no instance id".to_string(),
            })?
            .to_string();
        info!("created instance {instance_id} for {}", self.manifest.id);
        Ok(Instance {
            id: instance_id,
            state: "pending".to_string(),
            public_dns_name: String::new(),
        })
    }

    /// Poll the instance until it reaches the running state, capturing the
    /// public DNS name assigned on the way.
    fn wait_for_running(&self, instance_id: &str, deadline: &Deadline) -> Result<Instance> {
        with_retry(
            &RUNNING_RETRY,
            deadline,
            || {
                let out =
                    self.run_aws(&["ec2", "describe-instances", "--instance-ids", instance_id])?;
                let instance = first_instance(&out, &self.manifest.id)
                    .ok_or_else(|| Error::NoInstance(self.manifest.id.clone()))?;
                info!(
                    "checking instance state, instance: {}, state: {}",
                    instance.id, instance.state
                );
                if instance.state != "running" {
                    return Err(Error::NotReachable(format!(
                        "instance {} state: {}",
                        instance.id, instance.state
                    )));
                }
                Ok(instance)
            },
            |e| e.is_retryable(),
        )
    }
}

impl ProviderBackend for Ec2Backend {
    fn run(&mut self, deadline: &Deadline) -> Result<Session> {
        let instance = match self.exists(deadline)? {
            Some(instance) => {
                info!(
                    "instance {} exists for {}, {}",
                    instance.id, self.manifest.id, instance.public_dns_name
                );
                // an attached instance may still be booting
                self.wait_for_running(&instance.id, deadline)?
            }
            None => {
                let created = self.create()?;
                info!(
                    "waiting for instance {} to be running, {}",
                    created.id, self.manifest.id
                );
                self.wait_for_running(&created.id, deadline)?
            }
        };

        Session::connect(&ConnectOptions {
            host: format!("{}:22", instance.public_dns_name),
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
        "admin"
    }
}

/// Pull the first usable instance out of a DescribeInstances response,
/// skipping terminated instances (they linger until AWS reaps them).
fn first_instance(out: &Value, id: &str) -> Option<Instance> {
    let reservations = out["Reservations"].as_array()?;
    for reservation in reservations {
        let Some(instances) = reservation["Instances"].as_array() else {
            continue;
        };
        for instance in instances {
            let state = instance["State"]["Name"].as_str().unwrap_or_default();
            if state == "terminated" {
                debug!(
                    "instance {} for {id} is terminated, skipping",
                    instance["InstanceId"].as_str().unwrap_or_default()
                );
                continue;
            }
            return Some(Instance {
                id: instance["InstanceId"].as_str().unwrap_or_default().to_string(),
                state: state.to_string(),
                public_dns_name: instance["PublicDnsName"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_instance_skips_terminated() {
        let out = json!({
            "Reservations": [{
                "Instances": [
                    {"InstanceId": "i-dead", "State": {"Name": "terminated"}, "PublicDnsName": ""},
                    {"InstanceId": "i-live", "State": {"Name": "running"},
                     "PublicDnsName": "ec2-1-2-3-4.compute.amazonaws.com"},
                ]
            }]
        });
        let instance = first_instance(&out, "web-01").unwrap();
        assert_eq!(instance.id, "i-live");
        assert_eq!(instance.state, "running");
        assert_eq!(instance.public_dns_name, "ec2-1-2-3-4.compute.amazonaws.com");
    }

    #[test]
    fn test_first_instance_empty_reservations() {
        let out = json!({"Reservations": []});
        assert!(first_instance(&out, "web-01").is_none());
    }

    #[test]
    fn test_first_instance_all_terminated() {
        let out = json!({
            "Reservations": [{
                "Instances": [
                    {"InstanceId": "i-dead", "State": {"Name": "terminated"}, "PublicDnsName": ""},
                ]
            }]
        });
        assert!(first_instance(&out, "web-01").is_none());
    }
}
