//! Bundled configuration-file templates.
//!
//! Manifests reference these with the `embed://<name>` content sentinel, so
//! large file bodies don't have to live inline in YAML. The set is embedded
//! at build time.

/// Look up a bundled template source by name.
pub fn bundled(name: &str) -> Option<&'static str> {
    match name {
        "templates/etc_nginx_sites_available_default" => {
            Some(include_str!("../templates/etc_nginx_sites_available_default"))
        }
        "templates/var_www_html_index_php" => {
            Some(include_str!("../templates/var_www_html_index_php"))
        }
        _ => None,
    }
}

/// Names of every bundled template.
pub fn names() -> &'static [&'static str] {
    &[
        "templates/etc_nginx_sites_available_default",
        "templates/var_www_html_index_php",
    ]
}
