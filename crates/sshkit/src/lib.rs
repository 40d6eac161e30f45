//! # sshkit
//!
//! Authenticated SSH sessions for caravel: one remote host, command
//! execution with combined output, and SFTP file transfer.
//!
//! Sessions authenticate with a private key first and fall back to a
//! password; only the first available method is offered. Dialing retries on
//! a constant interval to tolerate instance warm-up. When the authenticated
//! user is not root, every command is wrapped with `sudo`.

mod error;

pub use error::{Error, Result};

use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use ssh2::{CheckResult, KnownHostFileKind, OpenFlags, OpenType};

/// Interval between dial attempts.
const DIAL_INTERVAL: Duration = Duration::from_secs(3);
/// Maximum number of dial attempts.
const DIAL_ATTEMPTS: u32 = 30;
/// TCP connect timeout for a single dial attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Copy buffer size for SFTP streaming.
const COPY_BUF_SIZE: usize = 1 << 10;

/// Options for establishing a session.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Remote address as `host:port`
    pub host: String,
    /// User to authenticate as
    pub username: String,
    /// Password, offered only when no private key is present
    pub password: Option<String>,
    /// Private key material (PEM or OpenSSH format)
    pub private_key: Option<Vec<u8>>,
    /// Accept any host key instead of checking `~/.ssh/known_hosts`
    pub insecure_host_key: bool,
    /// Absolute point in time after which dialing gives up
    pub deadline: Option<Instant>,
}

/// An authenticated session to one remote host.
///
/// The underlying connection closes when the session is dropped.
pub struct Session {
    sess: ssh2::Session,
    host: String,
    use_sudo: bool,
}

impl Session {
    /// Dial, verify the host key, and authenticate.
    ///
    /// Retries the whole attempt on a constant interval (instances take a
    /// while to accept connections after provisioning), bounded by
    /// `opts.deadline` when set.
    pub fn connect(opts: &ConnectOptions) -> Result<Self> {
        info!("dialing {}@{}", opts.username, opts.host);

        let addr = resolve(&opts.host)?;
        let mut last: Option<Error> = None;
        for attempt in 0..DIAL_ATTEMPTS {
            if let Some(deadline) = opts.deadline {
                if Instant::now() >= deadline {
                    return Err(Error::DialTimeout {
                        host: opts.host.clone(),
                    });
                }
            }
            match Self::connect_once(opts, addr) {
                Ok(session) => return Ok(session),
                Err(e) => {
                    info!(
                        "error dialing {}@{}, retrying ({}/{}): {e}",
                        opts.username, opts.host, attempt + 1, DIAL_ATTEMPTS
                    );
                    last = Some(e);
                }
            }
            if attempt + 1 < DIAL_ATTEMPTS {
                std::thread::sleep(DIAL_INTERVAL);
            }
        }
        Err(Error::DialExhausted {
            host: opts.host.clone(),
            reason: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn connect_once(opts: &ConnectOptions, addr: SocketAddr) -> Result<Self> {
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        let mut sess = ssh2::Session::new()?;
        sess.set_tcp_stream(tcp);
        sess.handshake()?;

        debug!(
            "server banner {:?}",
            sess.banner().unwrap_or("<none>")
        );

        if !opts.insecure_host_key {
            check_host_key(&sess, &opts.host)?;
        }

        // Offer one auth method only: key when present, else password.
        if let Some(key) = &opts.private_key {
            let pem = std::str::from_utf8(key)
                .map_err(|e| Error::Key(format!("private key is not utf-8: {e}")))?;
            sess.userauth_pubkey_memory(&opts.username, None, pem, None)
                .map_err(Error::Ssh)?;
        } else if let Some(password) = &opts.password {
            sess.userauth_password(&opts.username, password)?;
        } else {
            return Err(Error::NoAuthMethod);
        }

        Ok(Session {
            sess,
            host: opts.host.clone(),
            use_sudo: opts.username != "root",
        })
    }

    /// The remote address this session is connected to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Execute one command in its own channel and return the combined
    /// stdout+stderr. A nonzero exit status is an error carrying the status
    /// and the output.
    pub fn exec(&self, cmd: &str) -> Result<Vec<u8>> {
        let cmd = wrap_command(cmd, self.use_sudo);
        info!("exec {cmd}");

        let mut channel = self.sess.channel_session()?;
        channel.exec(&cmd)?;

        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let mut stdout_done = false;
        let mut stderr_done = false;
        while !(stdout_done && stderr_done) {
            if !stdout_done {
                match channel.read(&mut buf)? {
                    0 => stdout_done = true,
                    n => output.extend_from_slice(&buf[..n]),
                }
            }
            if !stderr_done {
                match channel.stderr().read(&mut buf)? {
                    0 => stderr_done = true,
                    n => output.extend_from_slice(&buf[..n]),
                }
            }
        }

        channel.wait_close()?;
        let status = channel.exit_status()?;
        if status != 0 {
            return Err(Error::CommandFailed {
                command: cmd,
                status,
                output,
            });
        }
        Ok(output)
    }

    /// Copy bytes from the reader to `path` on the remote host over SFTP.
    ///
    /// The reader is rewound to the start, parent directories are created
    /// (exist-errors tolerated), and the target is truncated or created.
    pub fn copy<R: Read + Seek>(&self, reader: &mut R, path: &str) -> Result<()> {
        reader.seek(SeekFrom::Start(0))?;

        let sftp = self.sess.sftp()?;

        // mkdir -p for the parent; a failing mkdir usually means the
        // directory already exists, the open below surfaces real problems.
        if let Some(parent) = Path::new(path).parent() {
            let mut dir = PathBuf::new();
            for component in parent.components() {
                dir.push(component);
                if dir.as_os_str().is_empty() || dir == Path::new("/") {
                    continue;
                }
                if let Err(e) = sftp.mkdir(&dir, 0o755) {
                    debug!("mkdir {}: {e}", dir.display());
                }
            }
        }

        let remote = sftp.open_mode(
            Path::new(path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )?;

        let mut writer = BufWriter::new(remote);
        let mut buf = [0u8; COPY_BUF_SIZE];
        let mut written = 0usize;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            written += n;
        }
        writer.flush()?;
        debug!("copied {written} bytes to {}:{path}", self.host);
        Ok(())
    }
}

/// Prefix a command with `sudo ` when the session user is not root.
fn wrap_command(cmd: &str, use_sudo: bool) -> String {
    if use_sudo {
        format!("sudo {cmd}")
    } else {
        cmd.to_string()
    }
}

fn resolve(host: &str) -> Result<SocketAddr> {
    host.to_socket_addrs()
        .map_err(|e| Error::Address {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| Error::Address {
            host: host.to_string(),
            reason: "no addresses resolved".to_string(),
        })
}

/// Validate the server's host key against the user's known-hosts file.
fn check_host_key(sess: &ssh2::Session, host: &str) -> Result<()> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::KnownHosts("cannot determine home directory".to_string()))?;
    let path = home.join(".ssh").join("known_hosts");

    let mut known_hosts = sess.known_hosts()?;
    known_hosts
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .map_err(|e| Error::KnownHosts(format!("{}: {e}", path.display())))?;

    let (key, _key_type) = sess
        .host_key()
        .ok_or_else(|| Error::KnownHosts("server offered no host key".to_string()))?;

    let (name, port) = split_host_port(host);
    match known_hosts.check_port(name, port, key) {
        CheckResult::Match => Ok(()),
        _ => {
            warn!("host key for {host} not found or mismatched in {}", path.display());
            Err(Error::HostKeyMismatch {
                host: host.to_string(),
            })
        }
    }
}

fn split_host_port(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => (name, port.parse().unwrap_or(22)),
        None => (host, 22),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_command_for_root() {
        assert_eq!(wrap_command("apt-get update", false), "apt-get update");
    }

    #[test]
    fn test_wrap_command_for_non_root() {
        assert_eq!(
            wrap_command("apt-get update", true),
            "sudo apt-get update"
        );
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("127.0.0.1:2222"), ("127.0.0.1", 2222));
        assert_eq!(split_host_port("example.com"), ("example.com", 22));
        assert_eq!(split_host_port("example.com:bad"), ("example.com", 22));
    }

    #[test]
    fn test_command_failed_reports_status_and_output() {
        let err = Error::CommandFailed {
            command: "false".to_string(),
            status: 1,
            output: b"boom".to_vec(),
        };
        assert_eq!(err.exit_status(), Some(1));
        assert!(err.to_string().contains("exit status 1"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_is_not_exist_matches_stat_output() {
        let err = Error::CommandFailed {
            command: "stat /nope".to_string(),
            status: 1,
            output: b"stat: cannot statx '/nope': No such file or directory".to_vec(),
        };
        assert!(err.is_not_exist());
        assert!(!Error::NoAuthMethod.is_not_exist());
    }
}
