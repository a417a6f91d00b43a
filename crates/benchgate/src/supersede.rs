//! Concurrency groups and cancel-on-supersede.
//!
//! At most one gate execution is useful per concurrency group at a time: a
//! newer execution measures a newer candidate, so the older in-flight run is
//! stale the moment the newer one enters the group. The registry hands out
//! one cancellation ticket per execution and cancels the previous holder
//! synchronously, before the new ticket is returned. The engine checks its
//! ticket at every operation boundary; cancellation is coarse (whole
//! execution), never per-step.
//!
//! Group scope follows the branch when the event has one, so repeated pushes
//! to the same review branch coalesce, and falls back to the unique run id
//! otherwise, so trunk and queue runs never cancel each other.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::trigger::TriggerEvent;

/// Component name recorded in registry events.
pub const SUPERSEDE_COMPONENT: &str = "supersede_registry";

// ---------------------------------------------------------------------------
// CancellationToken
// ---------------------------------------------------------------------------

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyGroup
// ---------------------------------------------------------------------------

/// Discriminator within a workflow: branch when the event has one, unique
/// run id otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "snake_case")]
pub enum GroupScope {
    Branch(String),
    Run(String),
}

/// Identity of one concurrency group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConcurrencyGroup {
    pub workflow: String,
    pub scope: GroupScope,
}

impl ConcurrencyGroup {
    /// Derive the group for an event within a workflow.
    pub fn derive(workflow: &str, event: &TriggerEvent, run_id: &str) -> Self {
        let branch = event.branch();
        let scope = if branch.is_empty() {
            GroupScope::Run(run_id.to_string())
        } else {
            GroupScope::Branch(branch.to_string())
        };
        Self {
            workflow: workflow.to_string(),
            scope,
        }
    }

    pub fn key(&self) -> String {
        match &self.scope {
            GroupScope::Branch(branch) => format!("{}/{branch}", self.workflow),
            GroupScope::Run(run_id) => format!("{}/run-{run_id}", self.workflow),
        }
    }
}

impl fmt::Display for ConcurrencyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ---------------------------------------------------------------------------
// ExecutionTicket
// ---------------------------------------------------------------------------

/// Handle the engine polls between operations.
#[derive(Debug, Clone)]
pub struct ExecutionTicket {
    pub execution_id: String,
    token: CancellationToken,
}

impl ExecutionTicket {
    /// Ticket outside any registry, for single-execution contexts.
    pub fn standalone(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            token: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

// ---------------------------------------------------------------------------
// SupersedeRegistry
// ---------------------------------------------------------------------------

/// Structured record of one registry action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersedeEvent {
    pub component: String,
    pub event: String,
    pub group_key: String,
    pub execution_id: String,
    pub superseded_execution_id: Option<String>,
}

#[derive(Debug, Clone)]
struct ActiveExecution {
    execution_id: String,
    token: CancellationToken,
}

/// Tracks the in-flight execution per group key.
#[derive(Debug, Clone, Default)]
pub struct SupersedeRegistry {
    active: BTreeMap<String, ActiveExecution>,
    events: Vec<SupersedeEvent>,
    event_counts: BTreeMap<String, u64>,
}

impl SupersedeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a group. Any previous in-flight execution in the same group is
    /// cancelled before the new ticket is returned.
    pub fn begin(&mut self, group: &ConcurrencyGroup, execution_id: &str) -> ExecutionTicket {
        let key = group.key();
        let token = CancellationToken::new();
        let previous = self.active.insert(
            key.clone(),
            ActiveExecution {
                execution_id: execution_id.to_string(),
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            self.record(SupersedeEvent {
                component: SUPERSEDE_COMPONENT.to_string(),
                event: "execution_superseded".to_string(),
                group_key: key.clone(),
                execution_id: execution_id.to_string(),
                superseded_execution_id: Some(previous.execution_id),
            });
        }
        self.record(SupersedeEvent {
            component: SUPERSEDE_COMPONENT.to_string(),
            event: "execution_begun".to_string(),
            group_key: key,
            execution_id: execution_id.to_string(),
            superseded_execution_id: None,
        });
        ExecutionTicket {
            execution_id: execution_id.to_string(),
            token,
        }
    }

    /// Retire an execution. A superseded execution completing late must not
    /// evict the current holder, so only the matching id is removed.
    pub fn complete(&mut self, group: &ConcurrencyGroup, execution_id: &str) {
        let key = group.key();
        let is_current = self
            .active
            .get(&key)
            .is_some_and(|active| active.execution_id == execution_id);
        let event = if is_current {
            self.active.remove(&key);
            "execution_completed"
        } else {
            "stale_completion_ignored"
        };
        self.record(SupersedeEvent {
            component: SUPERSEDE_COMPONENT.to_string(),
            event: event.to_string(),
            group_key: key,
            execution_id: execution_id.to_string(),
            superseded_execution_id: None,
        });
    }

    pub fn in_flight(&self, group: &ConcurrencyGroup) -> Option<&str> {
        self.active
            .get(&group.key())
            .map(|active| active.execution_id.as_str())
    }

    pub fn events(&self) -> &[SupersedeEvent] {
        &self.events
    }

    pub fn event_counts(&self) -> &BTreeMap<String, u64> {
        &self.event_counts
    }

    fn record(&mut self, event: SupersedeEvent) {
        *self.event_counts.entry(event.event.clone()).or_insert(0) += 1;
        self.events.push(event);
    }
}
