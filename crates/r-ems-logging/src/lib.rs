//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Limiter label (configuration entry name or kind).
    pub limiter: Option<&'a str>,
    /// Primitive kind (`debounce`, `throttle`, `aggregate`).
    pub kind: Option<&'a str>,
    /// Edge that produced an execution (`leading`, `trailing`, `flush`).
    pub edge: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a limiter label.
    pub fn with_limiter(mut self, limiter: &'a str) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Attach a primitive kind.
    pub fn with_kind(mut self, kind: &'a str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Attach an execution edge.
    pub fn with_edge(mut self, edge: &'a str) -> Self {
        self.edge = Some(edge);
        self
    }
}
