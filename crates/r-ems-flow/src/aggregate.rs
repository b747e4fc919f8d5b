//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Fail-fast fan-in over a fixed set of operations.
//!
//! `aggregate([a, b, c])` resolves to `Ok(vec![a, b, c])` in input order once
//! every member succeeded, or to the failure reason of the first member that
//! failed. The result is produced once; members settling afterwards have no
//! effect on it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::FusedFuture;
use tracing::debug;

use crate::metrics::FlowMetrics;
use crate::operation::Operation;

/// Combine `operations` into a single fail-fast result.
///
/// The number of members is fixed at call time. An empty input resolves to an
/// empty vector on the first poll.
pub fn aggregate<T, E, I>(operations: I) -> Aggregate<T, E>
where
    I: IntoIterator<Item = Operation<T, E>>,
{
    let members: Vec<_> = operations.into_iter().map(Some).collect();
    let values = std::iter::repeat_with(|| None)
        .take(members.len())
        .collect();
    Aggregate {
        members,
        values,
        succeeded: 0,
        settled: false,
        metrics: None,
    }
}

/// Future returned by [`aggregate`].
#[must_use = "an aggregate does nothing unless polled"]
pub struct Aggregate<T, E> {
    // `None` once the member settled or was detached.
    members: Vec<Option<Operation<T, E>>>,
    values: Vec<Option<T>>,
    succeeded: usize,
    settled: bool,
    metrics: Option<FlowMetrics>,
}

impl<T, E> Unpin for Aggregate<T, E> {}

impl<T, E> Aggregate<T, E> {
    /// Report the settled outcome to `metrics`.
    pub fn with_metrics(mut self, metrics: FlowMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of member operations.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the request has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn fail(&mut self, index: usize, reason: E) -> E {
        self.settled = true;
        let detached = self.members.iter().filter(|member| member.is_some()).count();
        // Detaching never cancels the underlying work.
        self.members.iter_mut().for_each(|member| *member = None);
        self.values.clear();
        debug!(
            target: "r_ems::flow::aggregate",
            members = self.members.len(),
            failed_index = index,
            detached,
            "aggregate failed",
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_aggregate(false, self.members.len());
        }
        reason
    }

    fn succeed(&mut self) -> Vec<T> {
        self.settled = true;
        let values: Vec<T> = std::mem::take(&mut self.values)
            .into_iter()
            .flatten()
            .collect();
        debug_assert_eq!(values.len(), self.members.len());
        debug!(
            target: "r_ems::flow::aggregate",
            members = self.members.len(),
            "aggregate succeeded",
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_aggregate(true, self.members.len());
        }
        values
    }
}

impl<T, E> Future for Aggregate<T, E> {
    type Output = Result<Vec<T>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.settled {
            return Poll::Pending;
        }

        // Several members may have failed since the last poll; the lowest
        // settlement sequence is the one that failed first.
        let mut first_failure: Option<(usize, u64, E)> = None;
        for (index, slot) in this.members.iter_mut().enumerate() {
            let Some(member) = slot else {
                continue;
            };
            let Poll::Ready(settlement) = member.poll_settlement(cx) else {
                continue;
            };
            *slot = None;
            let sequence = settlement.sequence;
            match settlement.outcome {
                Ok(value) => {
                    this.values[index] = Some(value);
                    this.succeeded += 1;
                }
                Err(reason) => {
                    let earlier = first_failure
                        .as_ref()
                        .map_or(true, |(_, current, _)| sequence < *current);
                    if earlier {
                        first_failure = Some((index, sequence, reason));
                    }
                }
            }
        }

        if let Some((index, _, reason)) = first_failure {
            return Poll::Ready(Err(this.fail(index, reason)));
        }
        if this.succeeded == this.members.len() {
            return Poll::Ready(Ok(this.succeed()));
        }
        Poll::Pending
    }
}

impl<T, E> FusedFuture for Aggregate<T, E> {
    fn is_terminated(&self) -> bool {
        self.settled
    }
}

impl<T, E> std::fmt::Debug for Aggregate<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("members", &self.members.len())
            .field("succeeded", &self.succeeded)
            .field("settled", &self.settled)
            .finish()
    }
}
