//! Provider backends.
//!
//! A backend's one job is to yield an authenticated SSH session to a host
//! that satisfies the manifest: looking the host up at the provider,
//! creating it when absent, and dialing once it is reachable. Backends own
//! any resources they provision (the Docker backend's container); `close`
//! releases them. Cloud instances are long-lived and survive `close` so
//! reconcile stays repeatable.

pub mod docker;
pub mod ec2;
pub mod linode;
pub mod slack;

use sshkit::Session;

use manifest::{Manifest, Provider};

use crate::error::Result;
use crate::retry::Deadline;

/// Backend tuning supplied at construction.
///
/// Providers read only the keys they understand; today that is the generic
/// remote host's SSH password.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Password for SSH auth on backends that support it
    pub password: Option<String>,
}

/// A provider backend that can produce an SSH session to the manifest's host.
pub trait ProviderBackend {
    /// Ensure the host exists and return an authenticated session to it.
    ///
    /// Idempotent for the cloud backends: an instance tagged/labelled with
    /// the manifest id is attached to instead of recreated. Returns only
    /// once the session is established, which implies the host is running
    /// and reachable.
    fn run(&mut self, deadline: &Deadline) -> Result<Session>;

    /// Release locally-held resources. The Docker backend also removes its
    /// container; cloud backends keep their instances.
    fn close(&mut self);

    /// User the session authenticates as.
    fn username(&self) -> &'static str;

    /// Password used for SSH auth, when the backend has one.
    fn password(&self) -> Option<&str> {
        None
    }
}

/// Construct the backend for a manifest's provider.
pub fn new(m: &Manifest, settings: &Settings) -> Result<Box<dyn ProviderBackend>> {
    match m.provider {
        Provider::Docker => Ok(Box::new(docker::DockerBackend::new(m))),
        Provider::Ec2 => Ok(Box::new(ec2::Ec2Backend::new(m)?)),
        Provider::Slack => Ok(Box::new(slack::SlackBackend::new(m, settings))),
        Provider::Linode => Ok(Box::new(linode::LinodeBackend::new(m)?)),
    }
}
