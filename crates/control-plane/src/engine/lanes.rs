//! Per-run event lanes.
//!
//! Each run id owns one lane: its state machine plus a sequence counter.
//! Producers reserve a [`Ticket`] when they know the order an event belongs
//! in and deliver it whenever the event is ready. Events are applied
//! strictly in ticket order; early ones wait in the lane until the gap
//! fills, and tickets already applied are dropped as stale.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;

use runhub_core::{Run, RunEvent, RunState};

use super::machine::RunStateMachine;
use crate::error::{AppError, AppResult};
use crate::store::RunStore;

type Entry = Option<(RunEvent, Map<String, Value>)>;

struct LaneState {
    machine: RunStateMachine,
    /// Next sequence number to hand out.
    issued: u64,
    /// Next sequence number to apply.
    next: u64,
    pending: BTreeMap<u64, Entry>,
}

/// Serialized event lane of one run.
pub struct Lane {
    run_id: String,
    inner: Mutex<LaneState>,
}

impl Lane {
    fn new(machine: RunStateMachine) -> Self {
        Self {
            run_id: machine.run().id.clone(),
            inner: Mutex::new(LaneState {
                machine,
                issued: 0,
                next: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn state(&self) -> RunState {
        self.inner.lock().await.machine.state()
    }

    /// Copy of the run as last persisted.
    pub async fn snapshot(&self) -> Run {
        self.inner.lock().await.machine.run().clone()
    }

    pub async fn framework(&self) -> Option<String> {
        self.inner.lock().await.machine.framework().map(str::to_string)
    }

    pub async fn bind_framework(&self, name: &str) {
        self.inner.lock().await.machine.bind_framework(name);
    }

    /// Reserve the next position in this lane.
    pub async fn reserve(self: &Arc<Self>) -> Ticket {
        let mut state = self.inner.lock().await;
        let seq = state.issued;
        state.issued += 1;
        Ticket {
            seq,
            lane: self.clone(),
        }
    }

    /// Reserve the next position only if the run is in `expected` and no
    /// earlier ticket is outstanding.
    ///
    /// The check and the reservation happen under one lock, so concurrent
    /// submissions of the same run get a single ticket.
    pub async fn claim(self: &Arc<Self>, expected: RunState) -> Option<Ticket> {
        let mut state = self.inner.lock().await;
        if state.machine.state() != expected || state.issued != state.next {
            return None;
        }
        let seq = state.issued;
        state.issued += 1;
        Some(Ticket {
            seq,
            lane: self.clone(),
        })
    }

    /// Number of events waiting for an earlier ticket.
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

/// Reserved position in a lane.
#[derive(Clone)]
pub struct Ticket {
    seq: u64,
    lane: Arc<Lane>,
}

impl Ticket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn run_id(&self) -> &str {
        self.lane.run_id()
    }

    pub fn lane(&self) -> &Arc<Lane> {
        &self.lane
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("run_id", &self.lane.run_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// One event applied (or rejected) by a delivery.
#[derive(Debug)]
pub struct Step {
    pub seq: u64,
    pub event: RunEvent,
    pub result: AppResult<RunState>,
}

/// What happened to a delivered ticket.
#[derive(Debug)]
pub enum Delivery {
    /// The ticket was next in line. Holds every event applied in order,
    /// including buffered ones the delivery released.
    Applied(Vec<Step>),
    /// Waiting for an earlier ticket.
    Buffered,
    /// The ticket was already delivered.
    Stale,
}

impl Delivery {
    pub fn steps(&self) -> &[Step] {
        match self {
            Delivery::Applied(steps) => steps,
            _ => &[],
        }
    }

    /// Result of the step for `seq`, if this delivery applied it.
    pub fn result_of(&self, seq: u64) -> Option<&AppResult<RunState>> {
        self.steps().iter().find(|s| s.seq == seq).map(|s| &s.result)
    }

    /// Owned variant of [`Delivery::result_of`].
    pub fn into_result(self, seq: u64) -> Option<AppResult<RunState>> {
        match self {
            Delivery::Applied(steps) => steps.into_iter().find(|s| s.seq == seq).map(|s| s.result),
            _ => None,
        }
    }
}

/// Lanes of all live runs.
///
/// A lane is dropped once its run is terminal and no ticket is outstanding;
/// later events reopen it from the store.
pub struct LaneHub {
    lanes: StdMutex<HashMap<String, Arc<Lane>>>,
    store: Arc<dyn RunStore>,
}

impl LaneHub {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            lanes: StdMutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Map guard. Every map operation is a single call, so a poisoned lock
    /// still guards a consistent map and is recovered.
    fn lanes(&self) -> MutexGuard<'_, HashMap<String, Arc<Lane>>> {
        self.lanes.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Lane map lock was poisoned, recovering");
            self.lanes.clear_poison();
            poisoned.into_inner()
        })
    }

    fn get(&self, run_id: &str) -> Option<Arc<Lane>> {
        self.lanes().get(run_id).cloned()
    }

    fn insert(&self, lane: Lane) -> Arc<Lane> {
        let lane = Arc::new(lane);
        self.lanes()
            .entry(lane.run_id.clone())
            .or_insert_with(|| lane.clone())
            .clone()
    }

    /// Lane for `run`. The stored copy, if any, is authoritative; otherwise
    /// the lane starts from `run` as given.
    pub async fn open(&self, run: &Run) -> AppResult<Arc<Lane>> {
        if let Some(lane) = self.get(&run.id) {
            return Ok(lane);
        }

        let initial = self.store.load(&run.id).await?.unwrap_or_else(|| run.clone());
        Ok(self.insert(Lane::new(RunStateMachine::new(initial, self.store.clone()))))
    }

    /// Lane of a run that must already exist.
    pub async fn attach(&self, run_id: &str) -> AppResult<Arc<Lane>> {
        if let Some(lane) = self.get(run_id) {
            return Ok(lane);
        }

        let run = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))?;
        Ok(self.insert(Lane::new(RunStateMachine::new(run, self.store.clone()))))
    }

    /// Deliver the event reserved by `ticket`.
    pub async fn deliver(&self, ticket: Ticket, event: RunEvent, context: Map<String, Value>) -> Delivery {
        self.settle(ticket, Some((event, context))).await
    }

    /// Give up a reserved position without applying anything.
    pub async fn skip(&self, ticket: Ticket) -> Delivery {
        self.settle(ticket, None).await
    }

    async fn settle(&self, ticket: Ticket, entry: Entry) -> Delivery {
        let lane = ticket.lane;
        let mut guard = lane.inner.lock().await;
        let state = &mut *guard;

        if ticket.seq < state.next || state.pending.contains_key(&ticket.seq) {
            tracing::debug!(run_id = %lane.run_id, seq = ticket.seq, "Stale event dropped");
            return Delivery::Stale;
        }

        state.pending.insert(ticket.seq, entry);
        if ticket.seq != state.next {
            tracing::debug!(
                run_id = %lane.run_id,
                seq = ticket.seq,
                waiting_for = state.next,
                "Event buffered"
            );
            return Delivery::Buffered;
        }

        let mut steps = Vec::new();
        while let Some(entry) = state.pending.remove(&state.next) {
            let seq = state.next;
            state.next += 1;
            if let Some((event, context)) = entry {
                let result = state.machine.apply(event, context).await;
                steps.push(Step { seq, event, result });
            }
        }

        let idle = state.machine.state().is_terminal() && state.next == state.issued;
        drop(guard);

        if idle {
            self.evict(&lane);
        }

        Delivery::Applied(steps)
    }

    fn evict(&self, lane: &Arc<Lane>) {
        let mut lanes = self.lanes();
        if lanes
            .get(&lane.run_id)
            .is_some_and(|current| Arc::ptr_eq(current, lane))
        {
            lanes.remove(&lane.run_id);
            tracing::debug!(run_id = %lane.run_id, "Lane closed");
        }
    }

    /// Number of open lanes.
    pub fn len(&self) -> usize {
        self.lanes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
