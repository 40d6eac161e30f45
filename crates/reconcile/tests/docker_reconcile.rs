//! Docker-backed end-to-end tests.
//!
//! These need a working Docker daemon and network access for apt, so they
//! are ignored by default. Run them with:
//!
//! ```text
//! cargo test -p caravel-reconcile -- --ignored
//! ```

use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use manifest::{File, Manifest, Package, PackageKind, Provider};
use reconcile::backend::{docker::DockerBackend, ProviderBackend, Settings};
use reconcile::files::FileManager;
use reconcile::{Deadline, Operation};

fn docker_manifest() -> Manifest {
    Manifest {
        id: "d496f4b1c0".to_string(),
        provider: Provider::Docker,
        parameters: HashMap::new(),
        packages: vec![
            Package {
                name: "netcat-traditional".to_string(),
                version: "latest".to_string(),
                kind: PackageKind::Binary,
                files: Vec::new(),
                parameters: HashMap::new(),
            },
            Package {
                name: "dnsutils".to_string(),
                version: "latest".to_string(),
                kind: PackageKind::Binary,
                files: Vec::new(),
                parameters: HashMap::new(),
            },
            Package {
                name: "nginx".to_string(),
                version: "latest".to_string(),
                kind: PackageKind::Service,
                parameters: HashMap::from([("PhpFpmVersion".to_string(), "8.2".to_string())]),
                files: vec![File {
                    path: "/etc/nginx/sites-available/default".to_string(),
                    mode: "0644".to_string(),
                    owner: "root:root".to_string(),
                    content: "embed://templates/etc_nginx_sites_available_default".to_string(),
                }],
            },
            Package {
                name: "php8.2-fpm".to_string(),
                version: "8.2".to_string(),
                kind: PackageKind::Service,
                parameters: HashMap::new(),
                files: vec![File {
                    path: "/var/www/html/info.php".to_string(),
                    mode: "0777".to_string(),
                    owner: "root:root".to_string(),
                    content: "<?php phpinfo();?>".to_string(),
                }],
            },
        ],
    }
}

#[test]
#[ignore = "needs a docker daemon and network access"]
fn test_docker_reconcile_happy_path() {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = docker_manifest();
    let deadline = Deadline::after(Duration::from_secs(900));
    reconcile::run(&m, Operation::Reconcile, &Settings::default(), &deadline).unwrap();
}

#[test]
#[ignore = "needs a docker daemon"]
fn test_docker_scp_roundtrip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = docker_manifest();
    let deadline = Deadline::after(Duration::from_secs(300));

    let mut backend = DockerBackend::new(&m);
    let session = backend.run(&deadline).unwrap();

    let contents = b"hello this is a test";
    session
        .copy(&mut Cursor::new(&contents[..]), "/tmp/hello.txt")
        .unwrap();

    let out = session.exec("/bin/cat /tmp/hello.txt").unwrap();
    assert_eq!(out, contents);

    backend.close();
}

#[test]
#[ignore = "needs a docker daemon"]
fn test_transfer_short_circuits_on_equal_hash() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut m = docker_manifest();
    m.packages.clear();
    let deadline = Deadline::after(Duration::from_secs(300));

    let mut backend = DockerBackend::new(&m);
    let session = backend.run(&deadline).unwrap();

    let f = File {
        path: "/tmp/motd".to_string(),
        mode: "0644".to_string(),
        owner: "root:root".to_string(),
        content: "welcome".to_string(),
    };
    let files = FileManager::new(&m, &session);

    let changed = files.transfer(&f, b"welcome").unwrap();
    assert!(changed, "first transfer writes the file");

    let changed = files.transfer(&f, b"welcome").unwrap();
    assert!(!changed, "second transfer short-circuits on equal hash");

    backend.close();
}
