//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Registry, TextEncoder};
use tracing::debug;

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in `registry` in the Prometheus text exposition format.
pub fn encode_text(registry: &SharedRegistry) -> Result<String> {
    let families = registry.gather();
    let body = TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")?;
    debug!(families = families.len(), bytes = body.len(), "metrics encoded");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, Opts};

    #[test]
    fn encodes_registered_counter() {
        let registry = new_registry();
        let counter = IntCounter::with_opts(Opts::new("calls_total", "calls")).unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let body = encode_text(&registry).unwrap();
        assert!(body.contains("calls_total 3"));
    }
}
