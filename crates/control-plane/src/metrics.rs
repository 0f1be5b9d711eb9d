//! Prometheus metrics for run dispatch.
//!
//! # Metrics
//!
//! ## Counters
//! - `runhub_runs_submitted_total` - Submissions received by the dispatcher
//! - `runhub_run_transitions_total` - Runs entering a state, labelled by `state`
//! - `runhub_illegal_transitions_total` - Events rejected by the state machine, labelled by `event`
//! - `runhub_queue_rejections_total` - Signals refused because the queue was full
//!
//! Every [`Metrics`] owns its registry, so dispatchers in one process (tests
//! included) never share counts.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use runhub_core::{RunEvent, RunState};

/// Counters updated by the dispatcher, the workers and the lifecycle hub.
pub struct Metrics {
    registry: Registry,
    submitted: IntCounter,
    transitions: IntCounterVec,
    illegal_transitions: IntCounterVec,
    queue_rejections: IntCounter,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub stopped: u64,
    pub illegal_transitions: u64,
    pub queue_rejections: u64,
}

impl Metrics {
    /// Create the counters and register them on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submitted = IntCounter::new(
            "runhub_runs_submitted_total",
            "Total number of run submissions",
        )?;
        let transitions = IntCounterVec::new(
            Opts::new(
                "runhub_run_transitions_total",
                "Total number of runs entering each state",
            ),
            &["state"],
        )?;
        let illegal_transitions = IntCounterVec::new(
            Opts::new(
                "runhub_illegal_transitions_total",
                "Total number of lifecycle events rejected by the run state",
            ),
            &["event"],
        )?;
        let queue_rejections = IntCounter::new(
            "runhub_queue_rejections_total",
            "Total number of execution signals refused by a full queue",
        )?;

        registry.register(Box::new(submitted.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(illegal_transitions.clone()))?;
        registry.register(Box::new(queue_rejections.clone()))?;

        Ok(Self {
            registry,
            submitted,
            transitions,
            illegal_transitions,
            queue_rejections,
        })
    }

    pub fn record_submitted(&self) {
        self.submitted.inc();
    }

    /// Count a run entering `state`.
    pub fn record_state(&self, state: RunState) {
        self.transitions.with_label_values(&[state.as_str()]).inc();
    }

    pub fn record_illegal_transition(&self, event: RunEvent) {
        self.illegal_transitions
            .with_label_values(&[event.as_str()])
            .inc();
    }

    pub fn record_queue_rejection(&self) {
        self.queue_rejections.inc();
    }

    fn entered(&self, state: RunState) -> u64 {
        self.transitions.with_label_values(&[state.as_str()]).get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.get(),
            dispatched: self.entered(RunState::Running),
            completed: self.entered(RunState::Completed),
            failed: self.entered(RunState::Error),
            stopped: self.entered(RunState::Stopped),
            illegal_transitions: RunEvent::ALL
                .iter()
                .map(|event| self.illegal_transitions.with_label_values(&[event.as_str()]).get())
                .sum(),
            queue_rejections: self.queue_rejections.get(),
        }
    }

    /// Registered metrics in the Prometheus text format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_state() {
        let metrics = Metrics::new().unwrap();
        metrics.record_state(RunState::Ready);
        metrics.record_state(RunState::Running);
        metrics.record_state(RunState::Completed);
        metrics.record_state(RunState::Error);
        metrics.record_illegal_transition(RunEvent::SubstrateDone);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dispatched, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.stopped, 0);
        assert_eq!(snapshot.illegal_transitions, 1);
    }

    #[test]
    fn test_instances_do_not_share_counts() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_submitted();
        first.record_queue_rejection();

        assert_eq!(first.snapshot().submitted, 1);
        assert_eq!(second.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_gather_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_submitted();
        metrics.record_state(RunState::Stopped);
        metrics.record_illegal_transition(RunEvent::Dispatched);

        let text = metrics.gather().unwrap();
        assert!(text.contains("runhub_runs_submitted_total 1"));
        assert!(text.contains("runhub_run_transitions_total{state=\"STOPPED\"} 1"));
        assert!(text.contains("runhub_illegal_transitions_total{event="));
        assert!(text.contains("# TYPE runhub_queue_rejections_total counter"));
    }
}
