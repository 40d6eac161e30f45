//! Generate bootstrap manifests from the bundled templates.
//!
//! Renders every bundled manifest template to the writer with a freshly
//! generated unique id, one YAML document per template. Handy for getting a
//! new deployment started without writing manifests from scratch.

use std::io::Write;

use anyhow::{Context, Result};
use minijinja::{context, Environment};

use manifest::UniqueIdFormat;

/// Bundled bootstrap manifest templates, rendered in this order.
const TEMPLATES: &[(&str, &str)] = &[
    (
        "manifest_docker.yaml",
        include_str!("../../templates/manifest_docker.yaml"),
    ),
    (
        "manifest_ec2.yaml",
        include_str!("../../templates/manifest_ec2.yaml"),
    ),
    (
        "manifest_slack.yaml",
        include_str!("../../templates/manifest_slack.yaml"),
    ),
];

/// Render every bundled manifest template, blank-line separated.
pub fn run(writer: &mut impl Write, format: UniqueIdFormat) -> Result<()> {
    let env = Environment::new();
    for (name, source) in TEMPLATES {
        let id = manifest::new_id(format).context("error generating unique manifest id")?;
        let rendered = env
            .render_str(source, context! { ID => id })
            .with_context(|| format!("error rendering template {name}"))?;
        writeln!(writer, "{}", rendered.trim_end())?;
        writeln!(writer)?;
    }
    Ok(())
}
