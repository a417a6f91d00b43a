//! Trigger taxonomy and the execute-or-skip policy.
//!
//! Benchmark measurement is expensive, so it runs where a wrong answer is
//! costly: integrations into the trunk branch and merge-queue validations.
//! Review-update events (pushes to a change under review) never trigger the
//! measurement protocol; neither do pushes to branches other than the trunk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Trunk branch assumed when a policy is not configured explicitly.
pub const DEFAULT_TRUNK_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// TriggerEvent
// ---------------------------------------------------------------------------

/// Events the CI platform can hand to the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// A push landed on a branch.
    TrunkPush { branch: String },
    /// A merge-queue entry is being validated on its transient queue branch.
    MergeQueue { queue_branch: String },
    /// A change under review was created or updated.
    ReviewUpdate { source_branch: String },
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::TrunkPush { .. } => TriggerKind::TrunkPush,
            Self::MergeQueue { .. } => TriggerKind::MergeQueue,
            Self::ReviewUpdate { .. } => TriggerKind::ReviewUpdate,
        }
    }

    /// Branch the event is about, used for concurrency grouping.
    pub fn branch(&self) -> &str {
        match self {
            Self::TrunkPush { branch } => branch,
            Self::MergeQueue { queue_branch } => queue_branch,
            Self::ReviewUpdate { source_branch } => source_branch,
        }
    }
}

/// Event kind without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    TrunkPush,
    MergeQueue,
    ReviewUpdate,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrunkPush => "trunk_push",
            Self::MergeQueue => "merge_queue",
            Self::ReviewUpdate => "review_update",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TriggerPolicy
// ---------------------------------------------------------------------------

/// Why an execution proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteReason {
    TrunkIntegration,
    MergeQueueValidation,
}

impl ExecuteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrunkIntegration => "trunk_integration",
            Self::MergeQueueValidation => "merge_queue_validation",
        }
    }
}

/// Why an execution is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ReviewEvent,
    NonTrunkBranch,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReviewEvent => "review_event",
            Self::NonTrunkBranch => "non_trunk_branch",
        }
    }
}

/// Outcome of the trigger policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriggerDecision {
    Execute { reason: ExecuteReason },
    Skip { reason: SkipReason },
}

impl TriggerDecision {
    pub fn should_execute(&self) -> bool {
        matches!(self, Self::Execute { .. })
    }
}

/// Decides whether an event warrants a measurement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    pub trunk_branch: String,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            trunk_branch: DEFAULT_TRUNK_BRANCH.to_string(),
        }
    }
}

impl TriggerPolicy {
    pub fn new(trunk_branch: impl Into<String>) -> Self {
        Self {
            trunk_branch: trunk_branch.into(),
        }
    }

    pub fn decide(&self, event: &TriggerEvent) -> TriggerDecision {
        match event {
            TriggerEvent::TrunkPush { branch } if branch == &self.trunk_branch => {
                TriggerDecision::Execute {
                    reason: ExecuteReason::TrunkIntegration,
                }
            }
            TriggerEvent::TrunkPush { .. } => TriggerDecision::Skip {
                reason: SkipReason::NonTrunkBranch,
            },
            TriggerEvent::MergeQueue { .. } => TriggerDecision::Execute {
                reason: ExecuteReason::MergeQueueValidation,
            },
            TriggerEvent::ReviewUpdate { .. } => TriggerDecision::Skip {
                reason: SkipReason::ReviewEvent,
            },
        }
    }
}
