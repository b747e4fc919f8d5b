//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Window limiter.
//!
//! ```text
//! OPEN   --call--> invoke now, arm window timer, CLOSED
//! CLOSED --call--> ignored (recorded when trailing is enabled)
//! CLOSED --timer fires--> OPEN, or run the recorded call and stay CLOSED
//!                         for a fresh window
//! ```
//!
//! The window timer is armed once per window and never rearmed by calls that
//! arrive while the window is closed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_ems_common::config::LimiterConfig;
use r_ems_logging::{ems_debug, LogContext};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::error::Result;
use crate::limiter::{
    expect_kind, Binding, Invocation, InvocationEdge, LimiterKind, LimiterOptions, TimerSlot,
};

const KIND: LimiterKind = LimiterKind::Throttle;

type Callback<C, A, R> = Box<dyn Fn(C, A) -> R + Send + Sync>;

struct ThrottleState<C, A> {
    timer: TimerSlot,
    trailing: Option<Invocation<C, A>>,
}

struct Shared<C, A, R> {
    binding: Binding,
    trailing: bool,
    callback: Callback<C, A, R>,
    state: Mutex<ThrottleState<C, A>>,
}

/// Wraps a function so that it runs at most once per window, with the target
/// and arguments of the call that opened the window.
///
/// With [`LimiterOptions::trailing`] enabled, the last call seen while the
/// window was closed runs once when the window ends. Dropping the throttle
/// cancels the window timer and any trailing call.
pub struct Throttle<C, A, R = ()> {
    shared: Arc<Shared<C, A, R>>,
}

impl<C, A, R> Throttle<C, A, R>
where
    C: Send + 'static,
    A: Send + 'static,
    R: 'static,
{
    /// Wrap `callback` with the given window, leading edge only.
    pub fn new<F>(window: Duration, callback: F) -> Result<Self>
    where
        F: Fn(C, A) -> R + Send + Sync + 'static,
    {
        Self::with_options(window, LimiterOptions::default(), callback)
    }

    /// Wrap `callback` with a window and explicit options.
    pub fn with_options<F>(window: Duration, options: LimiterOptions, callback: F) -> Result<Self>
    where
        F: Fn(C, A) -> R + Send + Sync + 'static,
    {
        let trailing = options.trailing;
        let binding = Binding::new(KIND, window, options)?;
        Ok(Self {
            shared: Arc::new(Shared {
                binding,
                trailing,
                callback: Box::new(callback),
                state: Mutex::new(ThrottleState {
                    timer: TimerSlot::default(),
                    trailing: None,
                }),
            }),
        })
    }

    /// Build from a named configuration entry.
    pub fn from_config<F>(name: &str, config: &LimiterConfig, callback: F) -> Result<Self>
    where
        F: Fn(C, A) -> R + Send + Sync + 'static,
    {
        expect_kind(name, config, KIND)?;
        Self::with_options(
            config.period,
            LimiterOptions::from_config(name, config),
            callback,
        )
    }

    /// Request an invocation.
    ///
    /// Runs the wrapped function immediately and returns its result when the
    /// window is open; otherwise returns `None` without running it.
    pub fn call(&self, target: C, args: A) -> Option<R> {
        if let Some(metrics) = &self.shared.binding.metrics {
            metrics.record_call(&self.shared.binding.name, KIND);
        }
        {
            let mut state = self.shared.state.lock();
            if state.timer.is_armed() {
                let replaced = if self.shared.trailing {
                    state.trailing.replace(Invocation::new(target, args)).is_some()
                } else {
                    false
                };
                trace!(
                    target: "r_ems::flow::throttle",
                    limiter = %self.shared.binding.name,
                    recorded = self.shared.trailing,
                    replaced,
                    "call inside closed window",
                );
                return None;
            }
            Shared::open_window(&self.shared, &mut state, Instant::now());
        }
        Some(
            self.shared
                .invoke(Invocation::new(target, args), InvocationEdge::Leading),
        )
    }

    /// Reopen the window immediately and drop any recorded trailing call.
    /// Returns whether the window was closed.
    pub fn cancel(&self) -> bool {
        let was_closed = {
            let mut state = self.shared.state.lock();
            state.trailing = None;
            state.timer.disarm()
        };
        if was_closed {
            trace!(
                target: "r_ems::flow::throttle",
                limiter = %self.shared.binding.name,
                "throttle window cancelled",
            );
            if let Some(metrics) = &self.shared.binding.metrics {
                metrics.record_cancellation(&self.shared.binding.name, KIND);
            }
        }
        was_closed
    }
}

impl<C, A, R> Throttle<C, A, R> {
    /// Whether the next call will run immediately.
    pub fn is_open(&self) -> bool {
        !self.shared.state.lock().timer.is_armed()
    }

    /// Whether a trailing call is waiting for the window to end.
    pub fn has_trailing(&self) -> bool {
        self.shared.state.lock().trailing.is_some()
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.shared.binding.period
    }

    /// Label used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.shared.binding.name
    }
}

impl<C, A, R> Shared<C, A, R>
where
    C: Send + 'static,
    A: Send + 'static,
    R: 'static,
{
    fn open_window(shared: &Arc<Self>, state: &mut ThrottleState<C, A>, opened_at: Instant) {
        let deadline = shared.binding.deadline_after(opened_at);
        let timer_shared = Arc::clone(shared);
        state
            .timer
            .arm(&shared.binding.runtime, move |generation| async move {
                sleep_until(deadline).await;
                Shared::close_window(&timer_shared, generation, deadline);
            });
        trace!(
            target: "r_ems::flow::throttle",
            limiter = %shared.binding.name,
            generation = state.timer.generation(),
            "throttle window opened",
        );
    }

    fn close_window(shared: &Arc<Self>, generation: u64, closed_at: Instant) {
        let trailing = {
            let mut state = shared.state.lock();
            if !state.timer.claim(generation) {
                return;
            }
            let trailing = state.trailing.take();
            if trailing.is_some() {
                // The trailing execution starts the next window.
                Shared::open_window(shared, &mut state, closed_at);
            }
            trailing
        };
        match trailing {
            Some(invocation) => {
                shared.invoke(invocation, InvocationEdge::Trailing);
            }
            None => debug!(
                target: "r_ems::flow::throttle",
                limiter = %shared.binding.name,
                "throttle window elapsed",
            ),
        }
    }
}

impl<C, A, R> Shared<C, A, R> {
    fn invoke(&self, invocation: Invocation<C, A>, edge: InvocationEdge) -> R {
        let context = LogContext::new()
            .with_limiter(&self.binding.name)
            .with_kind(KIND.as_str())
            .with_edge(edge.as_str());
        ems_debug!(context = context, "throttled call executing");
        if let Some(metrics) = &self.binding.metrics {
            metrics.record_invocation(&self.binding.name, KIND, edge);
        }
        (self.callback)(invocation.target, invocation.args)
    }
}

impl<C, A, R> Drop for Throttle<C, A, R> {
    fn drop(&mut self) {
        let was_closed = {
            let mut state = self.shared.state.lock();
            state.trailing = None;
            state.timer.disarm()
        };
        if was_closed {
            if let Some(metrics) = &self.shared.binding.metrics {
                metrics.record_cancellation(&self.shared.binding.name, KIND);
            }
        }
    }
}

impl<C, A, R> std::fmt::Debug for Throttle<C, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("name", &self.shared.binding.name)
            .field("window", &self.shared.binding.period)
            .field("trailing", &self.shared.trailing)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FlowMetrics;
    use r_ems_metrics::new_registry;
    use r_ems_testharness::CallRecorder;
    use tokio::time::sleep;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn leading_call_runs_immediately_and_closes_window() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::new(ms(100), move |_: (), n: u32| {
            sink.record(n);
            n * 10
        })
        .unwrap();

        assert_eq!(throttle.call((), 1), Some(10));
        sleep(ms(30)).await;
        assert_eq!(throttle.call((), 2), None);
        sleep(ms(30)).await;
        assert_eq!(throttle.call((), 3), None);
        assert!(!throttle.is_open());

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].value, 1);
        assert_eq!(calls[0].at, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn call_after_window_reopens() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::new(ms(100), move |_: (), n: u32| sink.record(n)).unwrap();

        throttle.call((), 1);
        sleep(ms(50)).await;
        throttle.call((), 2);
        sleep(ms(51)).await;
        assert!(throttle.is_open());
        throttle.call((), 3);

        let calls = recorder.calls();
        assert_eq!(recorder.values(), vec![1, 3]);
        assert_eq!(calls[1].at, ms(101));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_calls_do_not_extend_window() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::new(ms(100), move |_: (), n: u32| sink.record(n)).unwrap();

        throttle.call((), 1);
        for n in 2..10 {
            sleep(ms(10)).await;
            throttle.call((), n);
        }
        // Window opened at t=0 closes at t=100 regardless of the calls above.
        sleep(ms(19)).await;
        assert!(!throttle.is_open());
        sleep(ms(2)).await;
        assert!(throttle.is_open());
        assert_eq!(recorder.values(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_runs_last_closed_call_at_boundary() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new().trailing(true),
            move |target: &'static str, n: u32| sink.record((target, n)),
        )
        .unwrap();

        throttle.call("a", 1);
        sleep(ms(20)).await;
        throttle.call("b", 2);
        sleep(ms(20)).await;
        throttle.call("c", 3);
        assert!(throttle.has_trailing());

        sleep(ms(70)).await;
        let calls = recorder.calls();
        assert_eq!(recorder.values(), vec![("a", 1), ("c", 3)]);
        assert_eq!(calls[1].at, ms(100));

        // The trailing execution opened a new window.
        assert_eq!(throttle.call("d", 4), None);
        sleep(ms(100)).await;
        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.values()[2], ("d", 4));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_does_not_fire_without_closed_calls() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new().trailing(true),
            move |_: (), n: u32| sink.record(n),
        )
        .unwrap();

        throttle.call((), 1);
        sleep(ms(300)).await;
        assert_eq!(recorder.values(), vec![1]);
        assert!(throttle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_throttle_discards_trailing_call() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new().trailing(true),
            move |_: (), n: u32| sink.record(n),
        )
        .unwrap();

        throttle.call((), 1);
        throttle.call((), 2);
        drop(throttle);
        sleep(ms(300)).await;
        assert_eq!(recorder.values(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reopens_window() {
        let registry = new_registry();
        let metrics = FlowMetrics::new(registry).unwrap();
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new()
                .named("scroll")
                .with_metrics(metrics.clone()),
            move |_: (), n: u32| sink.record(n),
        )
        .unwrap();

        throttle.call((), 1);
        assert!(throttle.cancel());
        assert!(!throttle.cancel());
        throttle.call((), 2);
        assert_eq!(recorder.values(), vec![1, 2]);
        assert_eq!(
            metrics.invocations("scroll", KIND, InvocationEdge::Leading),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_recorded_trailing_call() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new().trailing(true),
            move |_: (), n: u32| sink.record(n),
        )
        .unwrap();

        throttle.call((), 1);
        sleep(ms(20)).await;
        throttle.call((), 2);
        assert!(throttle.has_trailing());

        assert!(throttle.cancel());
        assert!(!throttle.has_trailing());
        assert!(throttle.is_open());

        sleep(ms(300)).await;
        assert_eq!(recorder.values(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_closed_throttle_counts_cancellation() {
        let metrics = FlowMetrics::new(new_registry()).unwrap();
        let throttle = Throttle::with_options(
            ms(100),
            LimiterOptions::new()
                .named("resize")
                .with_metrics(metrics.clone()),
            |_: (), _: u32| {},
        )
        .unwrap();

        throttle.call((), 1);
        drop(throttle);
        assert_eq!(metrics.cancellations("resize", KIND), 1);

        let idle = Throttle::with_options(
            ms(100),
            LimiterOptions::new()
                .named("idle")
                .with_metrics(metrics.clone()),
            |_: (), _: u32| {},
        )
        .unwrap();
        drop(idle);
        assert_eq!(metrics.cancellations("idle", KIND), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_window_stays_closed() {
        let recorder = CallRecorder::new();
        let sink = recorder.clone();
        let throttle = Throttle::new(Duration::MAX, move |_: (), n: u32| {
            sink.record(n);
            n
        })
        .unwrap();

        assert_eq!(throttle.call((), 1), Some(1));
        assert_eq!(throttle.call((), 2), None);
        sleep(Duration::from_secs(3_600)).await;
        assert!(!throttle.is_open());
        assert_eq!(recorder.values(), vec![1]);

        assert!(throttle.cancel());
        assert_eq!(throttle.call((), 3), Some(3));
    }
}
