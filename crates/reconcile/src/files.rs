//! File management on remote systems: render templates, transfer with
//! content-hash short-circuiting, apply ownership and modes, remove.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use log::{info, warn};
use minijinja::Environment;
use sha2::{Digest, Sha256};
use sshkit::Session;

use manifest::{File, Manifest, Package};

use crate::error::{Error, Result};
use crate::templates;

/// Template data key for the render timestamp injected by the reconciler.
pub const TEMPLATE_KEY_LAST_MODIFIED_DATE: &str = "LastModifiedDate";
/// Template data key for the owning package's version.
pub const TEMPLATE_KEY_VERSION: &str = "Version";

/// Content prefix that resolves the remainder against the bundled templates.
const EMBED_PREFIX: &str = "embed://";

/// Packages whose file content changed during a transfer pass, keyed by
/// package name. Drives service restarts.
pub type ChangedPackages = BTreeMap<String, Package>;

/// Observation of a remote file from `stat` plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    /// File name as echoed by stat
    pub name: String,
    /// File type, e.g. "regular file" or "symbolic link"
    pub file_type: String,
    /// Size in bytes, -1 when unparsable
    pub size: i64,
    /// Owning user
    pub owner: String,
    /// Owning group
    pub group: String,
    /// Last-modification time, human readable
    pub last_modified: String,
    /// Hex sha256 of the contents
    pub sha256: String,
}

/// Manages files on one remote system.
pub struct FileManager<'a> {
    session: &'a Session,
    manifest: &'a Manifest,
}

impl<'a> FileManager<'a> {
    pub fn new(manifest: &'a Manifest, session: &'a Session) -> Self {
        FileManager { session, manifest }
    }

    /// Render and transfer every file of every package, in declared order.
    ///
    /// Returns the set of packages whose content changed together with the
    /// terminal result, so partial progress stays visible when a transfer
    /// fails midway.
    pub fn render_and_transfer(
        &self,
        data: &HashMap<String, String>,
    ) -> (ChangedPackages, Result<()>) {
        let mut changed = ChangedPackages::new();
        for pkg in &self.manifest.packages {
            for f in &pkg.files {
                if f.path.is_empty() {
                    return (
                        changed,
                        Err(Error::InvalidFile {
                            package: pkg.name.clone(),
                        }),
                    );
                }
                let rendered = match render(pkg, f, data) {
                    Ok(bytes) => bytes,
                    Err(e) => return (changed, Err(e)),
                };
                match self.transfer(f, &rendered) {
                    Ok(true) => {
                        info!("differences detected for file {}, package {}", f.path, pkg.name);
                        changed.insert(pkg.name.clone(), pkg.clone());
                    }
                    Ok(false) => {}
                    Err(e) => return (changed, Err(e)),
                }
            }
        }
        (changed, Ok(()))
    }

    /// Observe a remote file. `Ok(None)` means the file does not exist.
    pub fn stat(&self, f: &File) -> Result<Option<RemoteStat>> {
        let out = match self.session.exec(&stat_command(&f.path)) {
            Ok(out) => out,
            Err(e) if e.is_not_exist() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&out);
        let mut stat = parse_stat_output(text.trim())?;

        let out = self.session.exec(&sha256_command(&f.path))?;
        stat.sha256 = String::from_utf8_lossy(&out).trim().to_string();
        if stat.sha256.is_empty() {
            warn!("empty sha256 output for {}", f.path);
        }
        info!("stat {}: {stat:?}", f.path);
        Ok(Some(stat))
    }

    /// Transfer rendered bytes to the file's target path.
    ///
    /// Skips the copy and returns false when the remote content hash equals
    /// the local one. Otherwise copies to /tmp and moves into place, which
    /// also works when the destination directory is not writable over SFTP.
    pub fn transfer(&self, f: &File, rendered: &[u8]) -> Result<bool> {
        let stat = self
            .stat(f)
            .map_err(|e| transfer_failed(&f.path, e))?;

        let local_sha = hex_sha256(rendered);
        if let Some(stat) = &stat {
            info!(
                "sha256 {}: local {local_sha}, remote {}",
                f.path, stat.sha256
            );
            if stat.sha256 == local_sha {
                info!("not transferring {}, no differences detected", f.path);
                return Ok(false);
            }
        }

        let base = f
            .path
            .rsplit('/')
            .next()
            .unwrap_or(f.path.as_str());
        let tmp = format!("/tmp/{base}");
        info!("writing {} bytes to {tmp}", rendered.len());

        let mut reader = Cursor::new(rendered);
        self.session
            .copy(&mut reader, &tmp)
            .map_err(|e| transfer_failed(&f.path, e.into()))?;

        self.session
            .exec(&move_command(&tmp, &f.path))
            .map_err(|e| transfer_failed(&f.path, e.into()))?;

        info!("moved {tmp} to {}", f.path);
        Ok(true)
    }

    /// Apply file modes and ownership to every file of every package.
    /// Empty paths are skipped; empty mode or owner skips that attribute.
    pub fn apply_permissions(&self) -> Result<()> {
        for pkg in &self.manifest.packages {
            for f in &pkg.files {
                if f.path.is_empty() {
                    info!("skipping empty file path on package {}", pkg.name);
                    continue;
                }
                if !f.mode.is_empty() {
                    let out = self.session.exec(&chmod_command(&f.mode, &f.path))?;
                    info!(
                        "chmod {} {}, out: '{}'",
                        f.mode,
                        f.path,
                        String::from_utf8_lossy(&out).trim()
                    );
                }
                if !f.owner.is_empty() {
                    let out = self.session.exec(&chown_command(&f.owner, &f.path))?;
                    info!(
                        "chown {} {}, out: '{}'",
                        f.owner,
                        f.path,
                        String::from_utf8_lossy(&out).trim()
                    );
                }
            }
        }
        Ok(())
    }

    /// Remove every file of the given packages, best effort. Missing files
    /// and failed removals are logged, never fatal.
    pub fn remove(&self, packages: &[Package]) -> Result<()> {
        for pkg in packages {
            for f in &pkg.files {
                if f.path.is_empty() {
                    return Err(Error::InvalidFile {
                        package: pkg.name.clone(),
                    });
                }
                match self.session.exec(&remove_command(&f.path)) {
                    Ok(_) => info!("removed file {}", f.path),
                    Err(e) => warn!("error removing file {}: {e}", f.path),
                }
            }
        }
        Ok(())
    }
}

/// Render one file for a package.
///
/// `embed://<name>` content resolves the remainder against the bundled
/// template set; any other content is the literal template source. The
/// render data is `data` overridden by the package parameters, overridden by
/// the package version under `Version`.
pub fn render(pkg: &Package, f: &File, data: &HashMap<String, String>) -> Result<Vec<u8>> {
    let source = match f.content.strip_prefix(EMBED_PREFIX) {
        Some(name) => {
            templates::bundled(name).ok_or_else(|| Error::TemplateNotFound(name.to_string()))?
        }
        None => f.content.as_str(),
    };

    let mut merged: HashMap<&str, &str> = HashMap::new();
    for (k, v) in data {
        merged.insert(k, v);
    }
    for (k, v) in &pkg.parameters {
        merged.insert(k, v);
    }
    merged.insert(TEMPLATE_KEY_VERSION, &pkg.version);

    let env = Environment::new();
    let rendered = env.render_str(source, &merged)?;
    Ok(rendered.into_bytes())
}

fn transfer_failed(path: &str, source: Error) -> Error {
    Error::TransferFailed {
        path: path.to_string(),
        source: Box::new(source),
    }
}

/// Hex-encoded sha256 of a byte slice, matching `sha256sum` output.
pub(crate) fn hex_sha256(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

// Remote command shapes; harnesses match on these strings.

pub(crate) fn stat_command(path: &str) -> String {
    format!("stat -c '%n,%F,%s,%U,%G,%y' {path}")
}

pub(crate) fn sha256_command(path: &str) -> String {
    format!("sha256sum {path} | awk '{{ print $1 }}'")
}

pub(crate) fn move_command(tmp: &str, path: &str) -> String {
    format!("mv {tmp} {path}")
}

pub(crate) fn chmod_command(mode: &str, path: &str) -> String {
    format!("chmod {mode} {path}")
}

pub(crate) fn chown_command(owner: &str, path: &str) -> String {
    format!("chown {owner} {path}")
}

pub(crate) fn remove_command(path: &str) -> String {
    format!("rm -f {path}")
}

/// Parse one line of `stat -c '%n,%F,%s,%U,%G,%y'` output.
pub(crate) fn parse_stat_output(line: &str) -> Result<RemoteStat> {
    let parts: Vec<&str> = line.splitn(6, ',').collect();
    if parts.len() != 6 {
        return Err(Error::Other(format!("error parsing stat output: {line}")));
    }
    Ok(RemoteStat {
        name: parts[0].to_string(),
        file_type: parts[1].to_string(),
        size: parts[2].parse().unwrap_or(-1),
        owner: parts[3].to_string(),
        group: parts[4].to_string(),
        last_modified: parts[5].to_string(),
        sha256: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifest::PackageKind;

    fn package(name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            kind: PackageKind::Service,
            files: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    fn file(path: &str, content: &str) -> File {
        File {
            path: path.to_string(),
            mode: "0644".to_string(),
            owner: "root:root".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_render_bundled_php_template() {
        let pkg = package("php8.2-fpm", "8.2");
        let f = file("/var/www/html/info.php", "embed://templates/var_www_html_index_php");
        let data = HashMap::from([(
            TEMPLATE_KEY_LAST_MODIFIED_DATE.to_string(),
            "2024-01-01T00:00:00Z".to_string(),
        )]);

        let rendered = render(&pkg, &f, &data).unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("2024-01-01T00:00:00Z"));
        assert!(text.contains("8.2"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_render_bundled_nginx_template_uses_package_parameters() {
        let mut pkg = package("nginx", "latest");
        pkg.parameters
            .insert("PhpFpmVersion".to_string(), "8.2".to_string());
        let f = file(
            "/etc/nginx/sites-available/default",
            "embed://templates/etc_nginx_sites_available_default",
        );
        let data = HashMap::from([(
            TEMPLATE_KEY_LAST_MODIFIED_DATE.to_string(),
            "2024-01-01T00:00:00Z".to_string(),
        )]);

        let text = String::from_utf8(render(&pkg, &f, &data).unwrap()).unwrap();
        assert!(text.contains("generated file 2024-01-01T00:00:00Z"));
        assert!(text.contains("fastcgi_pass unix:/run/php/php8.2-fpm.sock"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_render_literal_content() {
        let pkg = package("php8.2-fpm", "8.2");
        let f = file("/var/www/html/info.php", "<?php phpinfo();?>");
        let rendered = render(&pkg, &f, &HashMap::new()).unwrap();
        assert_eq!(rendered, b"<?php phpinfo();?>");
    }

    #[test]
    fn test_render_literal_content_is_still_templated() {
        let pkg = package("app", "1.0");
        let f = file("/etc/motd", "version {{ Version }}");
        let rendered = render(&pkg, &f, &HashMap::new()).unwrap();
        assert_eq!(rendered, b"version 1.0");
    }

    #[test]
    fn test_render_collision_rules() {
        // package parameters override caller data; Version overrides both
        let mut pkg = package("app", "2.0");
        pkg.parameters
            .insert("Region".to_string(), "us-east-1".to_string());
        pkg.parameters
            .insert("Version".to_string(), "overridden".to_string());
        let f = file("/etc/app.conf", "{{ Region }} {{ Version }}");
        let data = HashMap::from([("Region".to_string(), "eu-west-1".to_string())]);

        let rendered = render(&pkg, &f, &data).unwrap();
        assert_eq!(rendered, b"us-east-1 2.0");
    }

    #[test]
    fn test_render_unknown_embed_name_fails() {
        let pkg = package("app", "1.0");
        let f = file("/etc/app.conf", "embed://templates/missing");
        let err = render(&pkg, &f, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
    }

    #[test]
    fn test_parse_stat_output() {
        let stat = parse_stat_output(
            "/etc/os-release,regular file,386,root,root,2023-12-14 19:32:05.044939009 +0000",
        )
        .unwrap();
        assert_eq!(stat.name, "/etc/os-release");
        assert_eq!(stat.file_type, "regular file");
        assert_eq!(stat.size, 386);
        assert_eq!(stat.owner, "root");
        assert_eq!(stat.group, "root");
        assert_eq!(stat.last_modified, "2023-12-14 19:32:05.044939009 +0000");
    }

    #[test]
    fn test_parse_stat_output_unparsable_size() {
        let stat = parse_stat_output("/dev/null,character special file,?,root,root,now").unwrap();
        assert_eq!(stat.size, -1);
    }

    #[test]
    fn test_parse_stat_output_rejects_short_lines() {
        assert!(parse_stat_output("garbage").is_err());
    }

    #[test]
    fn test_hex_sha256_matches_sha256sum() {
        // printf 'hello this is a test' | sha256sum
        assert_eq!(
            hex_sha256(b"hello this is a test"),
            "46a6de6b0b1708aadbd5578b5fd1f309e0181c6eb15c021201d961f6766d9ec2"
        );
    }

    #[test]
    fn test_command_shapes() {
        assert_eq!(
            stat_command("/etc/os-release"),
            "stat -c '%n,%F,%s,%U,%G,%y' /etc/os-release"
        );
        assert_eq!(
            sha256_command("/etc/os-release"),
            "sha256sum /etc/os-release | awk '{ print $1 }'"
        );
        assert_eq!(
            move_command("/tmp/default", "/etc/nginx/sites-available/default"),
            "mv /tmp/default /etc/nginx/sites-available/default"
        );
        assert_eq!(chmod_command("0644", "/etc/a"), "chmod 0644 /etc/a");
        assert_eq!(chown_command("root:root", "/etc/a"), "chown root:root /etc/a");
        assert_eq!(remove_command("/etc/a"), "rm -f /etc/a");
    }
}
