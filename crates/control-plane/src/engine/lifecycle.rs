//! Lifecycle hub shared by the dispatcher, the workers and the frameworks.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use runhub_core::{PluginCatalog, Run, RunEvent, RunState, StatusReporter};

use super::lanes::{Delivery, Lane, LaneHub, Ticket};
use crate::error::AppResult;
use crate::metrics::Metrics;
use crate::result_ext::ResultExt;
use crate::store::RunStore;

/// Routes lifecycle events into run lanes and reacts to their outcome:
/// counts transitions, logs rejected events and forwards accepted stop
/// requests to the framework running the run.
pub struct RunLifecycle {
    hub: LaneHub,
    catalog: Arc<PluginCatalog>,
    metrics: Arc<Metrics>,
}

impl RunLifecycle {
    pub fn new(store: Arc<dyn RunStore>, catalog: Arc<PluginCatalog>, metrics: Arc<Metrics>) -> Self {
        Self {
            hub: LaneHub::new(store),
            catalog,
            metrics,
        }
    }

    pub fn hub(&self) -> &LaneHub {
        &self.hub
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn open(&self, run: &Run) -> AppResult<Arc<Lane>> {
        self.hub.open(run).await
    }

    /// Current state of a run, from its lane or the store.
    pub async fn state(&self, run_id: &str) -> AppResult<RunState> {
        Ok(self.hub.attach(run_id).await?.state().await)
    }

    /// Deliver a reserved event and process its outcome.
    pub async fn deliver(&self, ticket: Ticket, event: RunEvent, context: Map<String, Value>) -> Delivery {
        let lane = ticket.lane().clone();
        let delivery = self.hub.deliver(ticket, event, context).await;
        self.observe(&lane, &delivery).await;
        delivery
    }

    /// Release a reserved position without an event.
    pub async fn skip(&self, ticket: Ticket) -> Delivery {
        let lane = ticket.lane().clone();
        let delivery = self.hub.skip(ticket).await;
        self.observe(&lane, &delivery).await;
        delivery
    }

    /// Reserve and deliver in one go, for events whose order is the order
    /// they are raised in.
    pub async fn fire(&self, run_id: &str, event: RunEvent, context: Map<String, Value>) -> AppResult<Delivery> {
        let lane = self.hub.attach(run_id).await?;
        let ticket = lane.reserve().await;
        Ok(self.deliver(ticket, event, context).await)
    }

    async fn observe(&self, lane: &Arc<Lane>, delivery: &Delivery) {
        for step in delivery.steps() {
            match &step.result {
                Ok(state) => {
                    self.metrics.record_state(*state);
                    if step.event == RunEvent::StopRequested {
                        self.cancel(lane).await;
                    }
                }
                Err(e) if e.is_illegal_transition() => {
                    self.metrics.record_illegal_transition(step.event);
                    tracing::warn!(
                        run_id = %lane.run_id(),
                        event = %step.event,
                        error = %e,
                        "Event rejected"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        run_id = %lane.run_id(),
                        event = %step.event,
                        error = %e,
                        "Failed to apply event"
                    );
                }
            }
        }
    }

    /// Ask the run's framework to cancel its substrate work. Does not wait.
    async fn cancel(&self, lane: &Arc<Lane>) {
        let Some(name) = lane.framework().await else {
            tracing::debug!(run_id = %lane.run_id(), "Run has no framework to cancel");
            return;
        };

        let Ok(framework) = self.catalog.frameworks.lookup(&name).log("resolving framework to cancel")
        else {
            return;
        };

        let run_id = lane.run_id().to_string();
        tokio::spawn(async move {
            tracing::info!(run_id = %run_id, framework = %name, "Cancelling substrate work");
            let _ = framework.stop(&run_id).await.log("cancelling substrate work");
        });
    }
}

#[async_trait]
impl StatusReporter for RunLifecycle {
    async fn report(&self, run_id: &str, event: RunEvent, context: Map<String, Value>) {
        tracing::debug!(run_id = %run_id, event = %event, "Substrate report");
        let _ = self.fire(run_id, event, context).await.log_warn("applying substrate report");
    }
}
