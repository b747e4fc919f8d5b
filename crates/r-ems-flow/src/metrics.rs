//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{self, Histogram, HistogramOpts, IntCounterVec, Opts};
use r_ems_metrics::SharedRegistry;

use crate::limiter::{InvocationEdge, LimiterKind};

/// Metrics published by the flow-control primitives.
#[derive(Clone)]
pub struct FlowMetrics {
    aggregates_total: IntCounterVec,
    aggregate_members: Histogram,
    limiter_calls_total: IntCounterVec,
    limiter_invocations_total: IntCounterVec,
    limiter_cancellations_total: IntCounterVec,
}

impl FlowMetrics {
    /// Register the flow metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let aggregates_total = IntCounterVec::new(
            Opts::new(
                "r_ems_flow_aggregates_total",
                "Aggregate requests settled, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(aggregates_total.clone()))?;

        let aggregate_members = Histogram::with_opts(
            HistogramOpts::new(
                "r_ems_flow_aggregate_members",
                "Number of member operations per settled aggregate request",
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 12)?),
        )?;
        registry.register(Box::new(aggregate_members.clone()))?;

        let limiter_calls_total = IntCounterVec::new(
            Opts::new(
                "r_ems_flow_limiter_calls_total",
                "Calls received by debounce and throttle wrappers",
            ),
            &["limiter", "kind"],
        )?;
        registry.register(Box::new(limiter_calls_total.clone()))?;

        let limiter_invocations_total = IntCounterVec::new(
            Opts::new(
                "r_ems_flow_limiter_invocations_total",
                "Executions of wrapped functions, by edge",
            ),
            &["limiter", "kind", "edge"],
        )?;
        registry.register(Box::new(limiter_invocations_total.clone()))?;

        let limiter_cancellations_total = IntCounterVec::new(
            Opts::new(
                "r_ems_flow_limiter_cancellations_total",
                "Armed limiter timers cancelled before firing",
            ),
            &["limiter", "kind"],
        )?;
        registry.register(Box::new(limiter_cancellations_total.clone()))?;

        Ok(Self {
            aggregates_total,
            aggregate_members,
            limiter_calls_total,
            limiter_invocations_total,
            limiter_cancellations_total,
        })
    }

    /// Record a settled aggregate request.
    pub fn record_aggregate(&self, succeeded: bool, members: usize) {
        let outcome = if succeeded { "success" } else { "failure" };
        self.aggregates_total.with_label_values(&[outcome]).inc();
        self.aggregate_members.observe(members as f64);
    }

    /// Count a call to a limited function.
    pub fn record_call(&self, limiter: &str, kind: LimiterKind) {
        self.limiter_calls_total
            .with_label_values(&[limiter, kind.as_str()])
            .inc();
    }

    /// Count an execution of a limited function.
    pub fn record_invocation(&self, limiter: &str, kind: LimiterKind, edge: InvocationEdge) {
        self.limiter_invocations_total
            .with_label_values(&[limiter, kind.as_str(), edge.as_str()])
            .inc();
    }

    /// Count a timer cancelled before it fired.
    pub fn record_cancellation(&self, limiter: &str, kind: LimiterKind) {
        self.limiter_cancellations_total
            .with_label_values(&[limiter, kind.as_str()])
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn cancellations(&self, limiter: &str, kind: LimiterKind) -> u64 {
        self.limiter_cancellations_total
            .with_label_values(&[limiter, kind.as_str()])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn invocations(&self, limiter: &str, kind: LimiterKind, edge: InvocationEdge) -> u64 {
        self.limiter_invocations_total
            .with_label_values(&[limiter, kind.as_str(), edge.as_str()])
            .get()
    }
}

impl std::fmt::Debug for FlowMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowMetrics").finish_non_exhaustive()
    }
}
