use benchgate::trigger::{
    DEFAULT_TRUNK_BRANCH, ExecuteReason, SkipReason, TriggerDecision, TriggerEvent, TriggerKind,
    TriggerPolicy,
};

// ===========================================================================
// Execute decisions
// ===========================================================================

#[test]
fn trunk_push_to_trunk_executes() {
    let policy = TriggerPolicy::default();
    let decision = policy.decide(&TriggerEvent::TrunkPush {
        branch: "main".to_string(),
    });
    assert_eq!(
        decision,
        TriggerDecision::Execute {
            reason: ExecuteReason::TrunkIntegration
        }
    );
    assert!(decision.should_execute());
}

#[test]
fn merge_queue_always_executes() {
    let policy = TriggerPolicy::default();
    for queue_branch in ["gh-readonly-queue/main/pr-42", "queue/anything"] {
        let decision = policy.decide(&TriggerEvent::MergeQueue {
            queue_branch: queue_branch.to_string(),
        });
        assert_eq!(
            decision,
            TriggerDecision::Execute {
                reason: ExecuteReason::MergeQueueValidation
            }
        );
    }
}

#[test]
fn custom_trunk_branch_is_honored() {
    let policy = TriggerPolicy::new("develop");
    assert!(
        policy
            .decide(&TriggerEvent::TrunkPush {
                branch: "develop".to_string()
            })
            .should_execute()
    );
    assert!(
        !policy
            .decide(&TriggerEvent::TrunkPush {
                branch: "main".to_string()
            })
            .should_execute()
    );
}

// ===========================================================================
// Skip decisions
// ===========================================================================

#[test]
fn review_updates_never_execute() {
    let policy = TriggerPolicy::default();
    // Even a review branch named like trunk skips.
    for source_branch in ["feature/fast-path", "main"] {
        let decision = policy.decide(&TriggerEvent::ReviewUpdate {
            source_branch: source_branch.to_string(),
        });
        assert_eq!(
            decision,
            TriggerDecision::Skip {
                reason: SkipReason::ReviewEvent
            }
        );
        assert!(!decision.should_execute());
    }
}

#[test]
fn pushes_to_other_branches_skip() {
    let policy = TriggerPolicy::default();
    let decision = policy.decide(&TriggerEvent::TrunkPush {
        branch: "release/2.0".to_string(),
    });
    assert_eq!(
        decision,
        TriggerDecision::Skip {
            reason: SkipReason::NonTrunkBranch
        }
    );
}

// ===========================================================================
// Event metadata and serialization
// ===========================================================================

#[test]
fn events_expose_kind_and_branch() {
    let event = TriggerEvent::MergeQueue {
        queue_branch: "gh-readonly-queue/main/pr-7".to_string(),
    };
    assert_eq!(event.kind(), TriggerKind::MergeQueue);
    assert_eq!(event.branch(), "gh-readonly-queue/main/pr-7");
    assert_eq!(event.kind().as_str(), "merge_queue");
}

#[test]
fn default_trunk_branch_is_main() {
    assert_eq!(DEFAULT_TRUNK_BRANCH, "main");
    assert_eq!(TriggerPolicy::default().trunk_branch, "main");
}

#[test]
fn decisions_serialize_with_a_decision_tag() {
    let execute = TriggerDecision::Execute {
        reason: ExecuteReason::TrunkIntegration,
    };
    let json = serde_json::to_value(&execute).unwrap();
    assert_eq!(json["decision"], "execute");
    assert_eq!(json["reason"], "trunk_integration");

    let skip = TriggerDecision::Skip {
        reason: SkipReason::ReviewEvent,
    };
    let json = serde_json::to_value(&skip).unwrap();
    assert_eq!(json["decision"], "skip");
    assert_eq!(json["reason"], "review_event");

    let parsed: TriggerDecision = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, skip);
}

#[test]
fn events_serialize_with_a_kind_tag() {
    let event = TriggerEvent::TrunkPush {
        branch: "main".to_string(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"], "trunk_push");
    assert_eq!(json["branch"], "main");
    let parsed: TriggerEvent = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, event);
}
