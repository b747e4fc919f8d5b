//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Quiet-period limiter.
//!
//! ```text
//! IDLE --call--> ARMED(pending = call)
//! ARMED --call--> ARMED(pending = latest call, timer restarted)
//! ARMED --timer fires--> IDLE, wrapped function invoked once
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_ems_common::config::LimiterConfig;
use r_ems_common::time::{duration_to_micros, jitter_us};
use r_ems_logging::{ems_debug, LogContext};
use tokio::time::sleep_until;
use tracing::trace;

use crate::error::Result;
use crate::limiter::{
    expect_kind, Binding, Invocation, InvocationEdge, LimiterKind, LimiterOptions, TimerSlot,
};

const KIND: LimiterKind = LimiterKind::Debounce;

type Callback<C, A> = Box<dyn Fn(C, A) + Send + Sync>;

struct DebounceState<C, A> {
    pending: Option<Invocation<C, A>>,
    timer: TimerSlot,
}

struct Shared<C, A> {
    binding: Binding,
    callback: Callback<C, A>,
    state: Mutex<DebounceState<C, A>>,
}

/// Wraps a function so that a burst of calls runs it once, `delay` after the
/// last call, with the last call's target and arguments.
///
/// Dropping the debouncer cancels any armed timer.
pub struct Debouncer<C, A> {
    shared: Arc<Shared<C, A>>,
}

impl<C, A> Debouncer<C, A>
where
    C: Send + 'static,
    A: Send + 'static,
{
    /// Wrap `callback` with the given quiet period.
    pub fn new<F>(delay: Duration, callback: F) -> Result<Self>
    where
        F: Fn(C, A) + Send + Sync + 'static,
    {
        Self::with_options(delay, LimiterOptions::default(), callback)
    }

    /// Wrap `callback` with a quiet period and explicit options.
    ///
    /// Fails when `delay` is zero, when trailing execution is requested, or
    /// when no tokio runtime is current.
    pub fn with_options<F>(delay: Duration, options: LimiterOptions, callback: F) -> Result<Self>
    where
        F: Fn(C, A) + Send + Sync + 'static,
    {
        let binding = Binding::new(KIND, delay, options)?;
        Ok(Self {
            shared: Arc::new(Shared {
                binding,
                callback: Box::new(callback),
                state: Mutex::new(DebounceState {
                    pending: None,
                    timer: TimerSlot::default(),
                }),
            }),
        })
    }

    /// Build from a named configuration entry.
    pub fn from_config<F>(name: &str, config: &LimiterConfig, callback: F) -> Result<Self>
    where
        F: Fn(C, A) + Send + Sync + 'static,
    {
        expect_kind(name, config, KIND)?;
        Self::with_options(
            config.period,
            LimiterOptions::from_config(name, config),
            callback,
        )
    }

    /// Request an invocation. Replaces any pending call and restarts the timer.
    pub fn call(&self, target: C, args: A) {
        let invocation = Invocation::new(target, args);
        let deadline = self.shared.binding.deadline_after(invocation.requested_at);
        let mut state = self.shared.state.lock();
        let replaced = state.pending.replace(invocation).is_some();
        let shared = Arc::clone(&self.shared);
        state
            .timer
            .arm(&self.shared.binding.runtime, move |generation| async move {
                sleep_until(deadline).await;
                Shared::fire(&shared, generation);
            });
        let generation = state.timer.generation();
        drop(state);

        trace!(
            target: "r_ems::flow::debounce",
            limiter = %self.shared.binding.name,
            generation,
            replaced,
            "debounce timer armed",
        );
        if let Some(metrics) = &self.shared.binding.metrics {
            metrics.record_call(&self.shared.binding.name, KIND);
        }
    }

    /// Drop the pending call without running it. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let had_pending = {
            let mut state = self.shared.state.lock();
            state.timer.disarm();
            state.pending.take().is_some()
        };
        if had_pending {
            self.shared.record_cancellation();
        }
        had_pending
    }

    /// Run the pending call now, in the caller's context, instead of waiting
    /// for the quiet period. Returns whether a call ran.
    pub fn flush(&self) -> bool {
        let pending = {
            let mut state = self.shared.state.lock();
            state.timer.disarm();
            state.pending.take()
        };
        match pending {
            Some(invocation) => {
                self.shared.invoke(invocation, InvocationEdge::Flush);
                true
            }
            None => false,
        }
    }
}

impl<C, A> Debouncer<C, A> {
    /// Whether a call is waiting for the quiet period to elapse.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Configured quiet period.
    pub fn delay(&self) -> Duration {
        self.shared.binding.period
    }

    /// Label used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.shared.binding.name
    }
}

impl<C, A> Shared<C, A> {
    fn fire(shared: &Arc<Self>, generation: u64) {
        let pending = {
            let mut state = shared.state.lock();
            if !state.timer.claim(generation) {
                return;
            }
            state.pending.take()
        };
        if let Some(invocation) = pending {
            shared.invoke(invocation, InvocationEdge::Trailing);
        }
    }

    fn invoke(&self, invocation: Invocation<C, A>, edge: InvocationEdge) {
        let waited = invocation.requested_at.elapsed();
        let context = LogContext::new()
            .with_limiter(&self.binding.name)
            .with_kind(KIND.as_str())
            .with_edge(edge.as_str());
        ems_debug!(
            context = context,
            "debounced call executing after {}us (lateness {}us)",
            duration_to_micros(waited),
            jitter_us(waited, self.binding.period),
        );
        if let Some(metrics) = &self.binding.metrics {
            metrics.record_invocation(&self.binding.name, KIND, edge);
        }
        (self.callback)(invocation.target, invocation.args);
    }

    fn record_cancellation(&self) {
        trace!(
            target: "r_ems::flow::debounce",
            limiter = %self.binding.name,
            "pending debounce call cancelled",
        );
        if let Some(metrics) = &self.binding.metrics {
            metrics.record_cancellation(&self.binding.name, KIND);
        }
    }
}

impl<C, A> Drop for Debouncer<C, A> {
    fn drop(&mut self) {
        let had_pending = {
            let mut state = self.shared.state.lock();
            state.timer.disarm();
            state.pending.take().is_some()
        };
        if had_pending {
            self.shared.record_cancellation();
        }
    }
}

impl<C, A> std::fmt::Debug for Debouncer<C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("name", &self.shared.binding.name)
            .field("delay", &self.shared.binding.period)
            .field("pending", &self.is_pending())
            .finish()
    }
}
