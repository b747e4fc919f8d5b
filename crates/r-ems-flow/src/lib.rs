//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Flow-control primitives used by R-EMS runtimes.
//!
//! * [`aggregate`] fans in a fixed set of [`Operation`]s into a single
//!   fail-fast result.
//! * [`Debouncer`] collapses a burst of calls into one execution once the
//!   caller has been quiet for the configured delay.
//! * [`Throttle`] executes at most once per window, using the call that opened
//!   the window.
//!
//! The three primitives are independent. Timers run on the tokio runtime that
//! was current when a limiter was constructed.
#![warn(missing_docs)]

pub mod aggregate;
pub mod debounce;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod operation;
pub mod throttle;

pub use aggregate::{aggregate, Aggregate};
pub use debounce::Debouncer;
pub use error::LimiterError;
pub use limiter::{Invocation, InvocationEdge, LimiterKind, LimiterOptions};
pub use metrics::FlowMetrics;
pub use operation::{Completer, Operation};
pub use throttle::Throttle;

/// Crate prelude collecting the most commonly used entry points.
pub mod prelude {
    pub use super::aggregate::{aggregate, Aggregate};
    pub use super::debounce::Debouncer;
    pub use super::limiter::{Invocation, LimiterOptions};
    pub use super::operation::{Completer, Operation};
    pub use super::throttle::Throttle;
}
