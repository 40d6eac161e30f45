//! # Manifest
//!
//! Desired-state model for caravel deployments.
//!
//! A manifest describes one host: an id (used as the provider-side tag or
//! label), the provider backend to reconcile against, provider parameters,
//! and the packages — with their templated files — that should exist on the
//! host. Manifests are loaded from two YAML documents (host and packages),
//! validated once, and immutable afterwards.
//!
//! ## Example
//!
//! ```no_run
//! use manifest::Manifest;
//!
//! let m = Manifest::from_files("manifests/web.yaml", "packages.yaml")?;
//! println!("{} on {}", m.id, m.provider);
//! for pkg in &m.packages {
//!     println!("  {} {}", pkg.name, pkg.version);
//! }
//! # Ok::<(), manifest::Error>(())
//! ```

mod error;
pub mod id;
mod types;

pub use error::{Error, Result};
pub use id::{new_id, UniqueIdFormat};
pub use types::{File, Package, PackageKind, Provider};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Desired state of one deployment host.
///
/// Compared against a provider's inventory and the host's installed packages
/// to drive a reconcile operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique id for the host. The host is tagged/labelled with this id and
    /// the id is used to determine whether the host already exists.
    pub id: String,
    /// Provider backend to reconcile against.
    pub provider: Provider,
    /// Provider-specific parameters (image ids, key paths, hostname, ...).
    /// A plain string map so each provider can define its own keys.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Desired packages, attached from the packages document.
    #[serde(skip)]
    pub packages: Vec<Package>,
}

impl Manifest {
    /// Build a manifest from raw host and packages documents.
    ///
    /// Both byte slices must be non-empty YAML. Every file mode in the
    /// packages document is validated against the octal form `[0-7]{3,4}`.
    pub fn from_bytes(host: &[u8], packages: &[u8]) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::EmptyManifest);
        }
        if packages.is_empty() {
            return Err(Error::EmptyPackages);
        }

        let mut m: Manifest = serde_yaml::from_slice(host).map_err(|source| Error::Parse {
            document: "manifest",
            source,
        })?;
        m.packages = serde_yaml::from_slice(packages).map_err(|source| Error::Parse {
            document: "packages",
            source,
        })?;

        for pkg in &m.packages {
            for f in &pkg.files {
                if !is_octal_mode(&f.mode) {
                    return Err(Error::InvalidFileMode {
                        mode: f.mode.clone(),
                        path: f.path.clone(),
                    });
                }
            }
        }

        Ok(m)
    }

    /// Read the host and packages files, then delegate to [`Manifest::from_bytes`].
    pub fn from_files(host: impl AsRef<Path>, packages: impl AsRef<Path>) -> Result<Self> {
        let host = host.as_ref();
        let packages = packages.as_ref();
        let host_bytes = std::fs::read(host).map_err(|source| Error::Io {
            path: host.to_path_buf(),
            source,
        })?;
        let packages_bytes = std::fs::read(packages).map_err(|source| Error::Io {
            path: packages.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&host_bytes, &packages_bytes)
    }

    /// Find the first package whose name starts with `prefix` and ends with
    /// `suffix`.
    pub fn find_package(&self, prefix: &str, suffix: &str) -> Result<&Package> {
        self.packages
            .iter()
            .find(|p| p.name.starts_with(prefix) && p.name.ends_with(suffix))
            .ok_or_else(|| Error::PackageNotFound {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            })
    }
}

/// Whether `mode` is 3 or 4 octal digits (`^[0-7]{3,4}$`).
fn is_octal_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_DOC: &str = "\
id: web-01
provider: docker
";

    const PACKAGES_DOC: &str = "\
- name: netcat-traditional
  version: \"1.10\"
  kind: binary
- name: dnsutils
  version: \"9.18\"
  kind: binary
- name: nginx
  version: latest
  kind: service
  parameters:
    PhpFpmVersion: \"8.2\"
  files:
    - path: /etc/nginx/sites-available/default
      mode: \"0644\"
      owner: root:root
      content: embed://templates/etc_nginx_sites_available_default
- name: php8.2-fpm
  version: \"8.2\"
  kind: service
  files:
    - path: /var/www/html/info.php
      mode: \"0644\"
      owner: www-data:www-data
      content: embed://templates/var_www_html_index_php
";

    #[test]
    fn test_from_bytes_docker_manifest() {
        let m = Manifest::from_bytes(HOST_DOC.as_bytes(), PACKAGES_DOC.as_bytes()).unwrap();
        assert_eq!(m.id, "web-01");
        assert_eq!(m.provider, Provider::Docker);
        assert_eq!(m.packages.len(), 4);
        for pkg in &m.packages {
            if pkg.kind == PackageKind::Service {
                assert!(!pkg.files.is_empty(), "services carry files");
            }
            for f in &pkg.files {
                assert!(!f.path.is_empty());
                assert!(!f.mode.is_empty());
                assert!(!f.content.is_empty());
            }
        }
    }

    #[test]
    fn test_from_bytes_ec2_parameters() {
        let host = "\
id: web-02
provider: ec2
parameters:
  image-id: test-image-id
  size: t4g.nano
  key-name: test-key-name
  security-group-id: sg-test
  subnet-id: test-subnet-id
";
        let m = Manifest::from_bytes(host.as_bytes(), PACKAGES_DOC.as_bytes()).unwrap();
        assert_eq!(m.provider, Provider::Ec2);
        for (key, expected) in [
            ("image-id", "test-image-id"),
            ("size", "t4g.nano"),
            ("key-name", "test-key-name"),
            ("security-group-id", "sg-test"),
            ("subnet-id", "test-subnet-id"),
        ] {
            assert_eq!(m.parameters.get(key).map(String::as_str), Some(expected));
        }
    }

    #[test]
    fn test_empty_host_document_rejected() {
        let err = Manifest::from_bytes(&[], PACKAGES_DOC.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::EmptyManifest));
    }

    #[test]
    fn test_empty_packages_document_rejected() {
        let err = Manifest::from_bytes(HOST_DOC.as_bytes(), &[]).unwrap_err();
        assert!(matches!(err, Error::EmptyPackages));
    }

    #[test]
    fn test_bad_file_mode_rejected() {
        let packages = "\
- name: nginx
  version: latest
  kind: service
  files:
    - path: /etc/nginx/nginx.conf
      mode: \"8\"
      owner: root
      content: server {}
";
        let err = Manifest::from_bytes(HOST_DOC.as_bytes(), packages.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid file mode"));
    }

    #[test]
    fn test_octal_mode_accepts_three_and_four_digits() {
        assert!(is_octal_mode("644"));
        assert!(is_octal_mode("0644"));
        assert!(is_octal_mode("0777"));
        assert!(!is_octal_mode("8"));
        assert!(!is_octal_mode("0888"));
        assert!(!is_octal_mode("06444"));
        assert!(!is_octal_mode(""));
        assert!(!is_octal_mode("rwxr"));
    }

    #[test]
    fn test_from_files_reads_both_documents() {
        let dir = tempfile::tempdir().unwrap();
        let host_path = dir.path().join("manifest.yaml");
        let packages_path = dir.path().join("packages.yaml");
        std::fs::write(&host_path, HOST_DOC).unwrap();
        std::fs::write(&packages_path, PACKAGES_DOC).unwrap();

        let m = Manifest::from_files(&host_path, &packages_path).unwrap();
        assert_eq!(m.id, "web-01");
        assert_eq!(m.packages.len(), 4);
    }

    #[test]
    fn test_from_files_missing_file_is_io_error() {
        let err = Manifest::from_files("/nonexistent/a.yaml", "/nonexistent/b.yaml").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_find_package_by_prefix_and_suffix() {
        let m = Manifest::from_bytes(HOST_DOC.as_bytes(), PACKAGES_DOC.as_bytes()).unwrap();
        let php = m.find_package("php", "-fpm").unwrap();
        assert_eq!(php.name, "php8.2-fpm");
        assert_eq!(php.version, "8.2");

        let err = m.find_package("zz", "-x").unwrap_err();
        assert!(matches!(err, Error::PackageNotFound { .. }));
    }
}
