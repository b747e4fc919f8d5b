//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the R-EMS flow workspace.
//! This crate exposes configuration loading, tracing setup, and time
//! helpers consumed by the flow-control crates.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{FlowConfig, LimiterConfig, LimiterKind, LoadedFlowConfig, LoggingConfig};
pub use logging::{init_tracing, LogFormat};
