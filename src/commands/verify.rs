//! Verify reconciled hosts with an HTTP GET against each one.
//!
//! Output is similar to `curl -v`: protocol and status line, headers, then
//! the body. Fan-out is bounded mostly to keep the output readable.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use log::error;
use rayon::prelude::*;
use std::sync::Mutex;

use crate::runner::clamp_concurrency;

/// Probe every hostname, printing what each returned.
pub fn run(concurrency: usize, hostnames: &[String]) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(clamp_concurrency(concurrency))
        .build()
        .context("failed to create thread pool")?;

    let agent = ureq::Agent::new_with_defaults();
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());

    pool.install(|| {
        hostnames.par_iter().for_each(|hostname| {
            if let Err(e) = probe(&agent, hostname) {
                error!("error verifying {hostname}: {e}");
                println!("{} {hostname}: {e}", "failed".red().bold());
                failures.lock().unwrap().push(hostname.clone());
            }
        });
    });

    let failures = failures.into_inner().unwrap();
    if !failures.is_empty() {
        bail!("verify failed for: {}", failures.join(", "));
    }
    Ok(())
}

fn probe(agent: &ureq::Agent, hostname: &str) -> Result<()> {
    let url = format!("http://{hostname}");
    let mut response = agent
        .get(url.clone())
        .call()
        .with_context(|| format!("error getting {url}"))?;

    println!("> {:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        println!("> {name}: {}", value.to_str().unwrap_or("<binary>"));
    }
    let body = response
        .body_mut()
        .read_to_string()
        .context("error reading response body")?;
    println!("{body}");
    Ok(())
}
