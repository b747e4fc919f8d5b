//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

use crate::limiter::LimiterKind;

/// Result alias for limiter construction.
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Configuration errors raised eagerly when a limiter is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The delay or window was zero.
    #[error("{kind} period must be greater than zero")]
    InvalidPeriod {
        /// Limiter that rejected the period.
        kind: LimiterKind,
    },
    /// No tokio runtime was reachable to host the limiter's timer.
    #[error("no tokio runtime available to host {kind} timers")]
    NoRuntime {
        /// Limiter that could not find a runtime.
        kind: LimiterKind,
    },
    /// Trailing-edge execution was requested for a limiter without one.
    #[error("trailing-edge execution is not supported by {kind} limiters")]
    TrailingUnsupported {
        /// Limiter that rejected the option.
        kind: LimiterKind,
    },
    /// A configuration entry describes a different limiter kind.
    #[error("limiter '{name}' is configured as {found}, expected {expected}")]
    KindMismatch {
        /// Configuration entry name.
        name: String,
        /// Kind being constructed.
        expected: LimiterKind,
        /// Kind declared in configuration.
        found: LimiterKind,
    },
}
