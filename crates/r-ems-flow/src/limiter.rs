//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Building blocks shared by [`Debouncer`](crate::Debouncer) and
//! [`Throttle`](crate::Throttle).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use r_ems_common::config::LimiterConfig;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LimiterError, Result};
use crate::metrics::FlowMetrics;

pub use r_ems_common::config::LimiterKind;

/// Calling context captured when a limited function is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<C, A> {
    /// Target the call was made on behalf of.
    pub target: C,
    /// Arguments supplied with the call.
    pub args: A,
    /// When the call was requested.
    pub requested_at: Instant,
}

impl<C, A> Invocation<C, A> {
    /// Capture a call made now.
    pub fn new(target: C, args: A) -> Self {
        Self {
            target,
            args,
            requested_at: Instant::now(),
        }
    }
}

/// Which edge of a limiter produced an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationEdge {
    /// Executed immediately in the caller's context.
    Leading,
    /// Executed by the limiter's timer.
    Trailing,
    /// Executed early through an explicit flush.
    Flush,
}

impl InvocationEdge {
    /// Static label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationEdge::Leading => "leading",
            InvocationEdge::Trailing => "trailing",
            InvocationEdge::Flush => "flush",
        }
    }
}

impl fmt::Display for InvocationEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional settings applied when constructing a limiter.
#[derive(Debug, Clone, Default)]
pub struct LimiterOptions {
    /// Label used in logs and metrics. Defaults to the limiter kind.
    pub name: Option<String>,
    /// Metrics sink for call and execution counters.
    pub metrics: Option<FlowMetrics>,
    /// Run the last call seen while a throttle window was closed once the window ends.
    pub trailing: bool,
}

impl LimiterOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a label.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a metrics sink.
    pub fn with_metrics(mut self, metrics: FlowMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enable or disable trailing-edge execution.
    pub fn trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }

    /// Options derived from a named configuration entry.
    pub fn from_config(name: &str, config: &LimiterConfig) -> Self {
        Self::new().named(name).trailing(config.trailing)
    }
}

// Deadline used when a period does not fit in the clock; the timer never fires.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Validated construction parameters common to both limiters.
#[derive(Debug)]
pub(crate) struct Binding {
    pub(crate) name: String,
    pub(crate) period: Duration,
    pub(crate) runtime: Handle,
    pub(crate) metrics: Option<FlowMetrics>,
}

impl Binding {
    pub(crate) fn new(kind: LimiterKind, period: Duration, options: LimiterOptions) -> Result<Self> {
        if period.is_zero() {
            return Err(LimiterError::InvalidPeriod { kind });
        }
        if options.trailing && kind == LimiterKind::Debounce {
            return Err(LimiterError::TrailingUnsupported { kind });
        }
        let runtime = Handle::try_current().map_err(|_| LimiterError::NoRuntime { kind })?;
        Ok(Self {
            name: options.name.unwrap_or_else(|| kind.as_str().to_owned()),
            period,
            runtime,
            metrics: options.metrics,
        })
    }

    /// End of a period starting at `start`, saturated for very long periods.
    pub(crate) fn deadline_after(&self, start: Instant) -> Instant {
        start
            .checked_add(self.period)
            .unwrap_or_else(|| start + FAR_FUTURE)
    }
}

/// Reject configuration entries of the wrong kind.
pub(crate) fn expect_kind(name: &str, config: &LimiterConfig, expected: LimiterKind) -> Result<()> {
    if config.kind != expected {
        return Err(LimiterError::KindMismatch {
            name: name.to_owned(),
            expected,
            found: config.kind,
        });
    }
    Ok(())
}

/// The single timer a limiter binding may have armed.
///
/// Every arm or disarm bumps the generation, so a timer task that already woke
/// up but lost the race for the state lock finds a stale generation and does
/// nothing.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the armed timer, if any. Returns whether one was armed.
    pub(crate) fn disarm(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Replace any armed timer with the task built by `timer`.
    pub(crate) fn arm<F, Fut>(&mut self, runtime: &Handle, timer: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        let generation = self.generation;
        self.handle = Some(runtime.spawn(timer(generation)));
    }

    /// Called by a firing timer task. Empties the slot when `generation` is
    /// still current and reports whether the timer may act.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_rejects_zero_period() {
        let err = Binding::new(LimiterKind::Throttle, Duration::ZERO, LimiterOptions::new())
            .unwrap_err();
        assert_eq!(
            err,
            LimiterError::InvalidPeriod {
                kind: LimiterKind::Throttle
            }
        );
    }

    #[tokio::test]
    async fn binding_defaults_name_to_kind() {
        let binding = Binding::new(
            LimiterKind::Debounce,
            Duration::from_millis(10),
            LimiterOptions::new(),
        )
        .unwrap();
        assert_eq!(binding.name, "debounce");
    }

    #[test]
    fn binding_requires_runtime() {
        let err = Binding::new(
            LimiterKind::Debounce,
            Duration::from_millis(10),
            LimiterOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LimiterError::NoRuntime { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_saturates_for_unbounded_period() {
        let binding =
            Binding::new(LimiterKind::Throttle, Duration::MAX, LimiterOptions::new()).unwrap();
        let start = Instant::now();
        assert_eq!(binding.deadline_after(start), start + FAR_FUTURE);

        let short = Binding::new(
            LimiterKind::Throttle,
            Duration::from_millis(5),
            LimiterOptions::new(),
        )
        .unwrap();
        assert_eq!(short.deadline_after(start), start + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn stale_generation_cannot_claim() {
        let runtime = Handle::current();
        let mut slot = TimerSlot::default();
        slot.arm(&runtime, |_| async {});
        let first = slot.generation();
        slot.arm(&runtime, |_| async {});
        assert!(!slot.claim(first));
        assert!(slot.claim(slot.generation()));
        assert!(!slot.is_armed());
    }
}
