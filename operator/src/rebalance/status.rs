use rebalance_types::{ConditionStatus, KafkaRebalanceStatus, RebalanceCondition};

use super::state_machine::Desired;

/// Builds the `type=<state>` condition for `desired`, reusing the existing
/// condition's `lastTransitionTime` when the state and reason are unchanged
/// (§4.3: "`lastTransitionTime` only advances when the condition actually
/// changes"), and stamping `now` otherwise.
fn condition(existing: &[RebalanceCondition], desired: &Desired, now: &str) -> RebalanceCondition {
    let type_ = desired.state.to_string();
    let last_transition_time = existing
        .iter()
        .find(|c| c.type_ == type_ && c.reason.as_deref() == Some(desired.reason.as_str()))
        .and_then(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.to_string());

    RebalanceCondition {
        type_,
        status: ConditionStatus::True,
        reason: Some(desired.reason.clone()),
        message: Some(desired.message.clone()),
        last_transition_time: Some(last_transition_time),
    }
}

/// Recovers the `(reason, message)` pairs of the `Warning` conditions
/// already on `status`, so a caller that isn't re-running validation (the
/// poll timer, between reconciler passes) can carry them forward instead of
/// silently dropping them on its next status write.
pub fn existing_warnings(status: &KafkaRebalanceStatus) -> Vec<(String, String)> {
    status
        .conditions
        .iter()
        .filter(|c| c.type_ == rebalance_types::WARNING)
        .map(|c| {
            (
                c.reason.clone().unwrap_or_default(),
                c.message.clone().unwrap_or_default(),
            )
        })
        .collect()
}

/// Builds the full status document for a normally-reconciled resource: the
/// state condition plus any non-fatal `Warning` conditions collected by
/// [`super::validation::collect_warnings`] (§4.3, §5).
pub fn build_active_status(
    existing: &KafkaRebalanceStatus,
    desired: &Desired,
    warnings: &[(String, String)],
    observed_generation: Option<i64>,
    now: &str,
) -> KafkaRebalanceStatus {
    let mut conditions = vec![condition(&existing.conditions, desired, now)];

    for (reason, message) in warnings {
        let existing_warning = existing
            .conditions
            .iter()
            .find(|c| c.type_ == rebalance_types::WARNING && c.reason.as_deref() == Some(reason.as_str()));
        conditions.push(RebalanceCondition {
            type_: rebalance_types::WARNING.to_string(),
            status: ConditionStatus::True,
            reason: Some(reason.clone()),
            message: Some(message.clone()),
            last_transition_time: Some(
                existing_warning
                    .and_then(|c| c.last_transition_time.clone())
                    .unwrap_or_else(|| now.to_string()),
            ),
        });
    }

    KafkaRebalanceStatus {
        observed_generation,
        session_id: desired.session_id.clone(),
        optimization_result: desired.optimization_result.clone(),
        conditions,
    }
}

/// Builds the status document written while reconciliation is paused
/// (§4.1): a `ReconciliationPaused` condition plus validation warnings,
/// with the state condition (if any) carried over untouched. The state
/// machine is not run while paused, but its condition has to survive the
/// pause — `RebalanceState`'s names never collide with
/// `ReconciliationPaused`/`Warning` (§3), so `current_state` still resolves
/// it correctly once the pause annotation is lifted, resuming the prior
/// state instead of restarting from `New` and abandoning any in-flight
/// Cruise Control session recorded in `sessionId`.
pub fn build_paused_status(
    existing: &KafkaRebalanceStatus,
    warnings: &[(String, String)],
    observed_generation: Option<i64>,
    now: &str,
) -> KafkaRebalanceStatus {
    let already_paused = existing
        .conditions
        .iter()
        .find(|c| c.type_ == rebalance_types::RECONCILIATION_PAUSED);

    let mut conditions: Vec<RebalanceCondition> = existing
        .conditions
        .iter()
        .filter(|c| c.type_ != rebalance_types::RECONCILIATION_PAUSED && c.type_ != rebalance_types::WARNING)
        .cloned()
        .collect();

    conditions.push(RebalanceCondition {
        type_: rebalance_types::RECONCILIATION_PAUSED.to_string(),
        status: ConditionStatus::True,
        reason: Some("Paused".to_string()),
        message: Some(crate::util::messages::PAUSED.to_string()),
        last_transition_time: Some(
            already_paused
                .and_then(|c| c.last_transition_time.clone())
                .unwrap_or_else(|| now.to_string()),
        ),
    });

    for (reason, message) in warnings {
        let existing_warning = existing
            .conditions
            .iter()
            .find(|c| c.type_ == rebalance_types::WARNING && c.reason.as_deref() == Some(reason.as_str()));
        conditions.push(RebalanceCondition {
            type_: rebalance_types::WARNING.to_string(),
            status: ConditionStatus::True,
            reason: Some(reason.clone()),
            message: Some(message.clone()),
            last_transition_time: Some(
                existing_warning
                    .and_then(|c| c.last_transition_time.clone())
                    .unwrap_or_else(|| now.to_string()),
            ),
        });
    }

    KafkaRebalanceStatus {
        conditions,
        observed_generation,
        ..existing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalance_types::RebalanceState;

    fn desired(state: RebalanceState, reason: &str) -> Desired {
        Desired {
            state,
            session_id: None,
            optimization_result: None,
            reason: reason.to_string(),
            message: "message".to_string(),
        }
    }

    #[test]
    fn fresh_condition_is_stamped_with_now() {
        let existing = KafkaRebalanceStatus::default();
        let status = build_active_status(&existing, &desired(RebalanceState::New, "New"), &[], None, "t0");
        assert_eq!(status.conditions[0].last_transition_time.as_deref(), Some("t0"));
    }

    #[test]
    fn unchanged_state_and_reason_reuses_the_transition_time() {
        let existing = KafkaRebalanceStatus {
            conditions: vec![RebalanceCondition {
                type_: "ProposalReady".to_string(),
                status: ConditionStatus::True,
                reason: Some("ProposalReady".to_string()),
                message: Some("old message".to_string()),
                last_transition_time: Some("t0".to_string()),
            }],
            ..Default::default()
        };
        let status = build_active_status(
            &existing,
            &desired(RebalanceState::ProposalReady, "ProposalReady"),
            &[],
            None,
            "t1",
        );
        assert_eq!(status.conditions[0].last_transition_time.as_deref(), Some("t0"));
    }

    #[test]
    fn a_changed_reason_bumps_the_transition_time() {
        let existing = KafkaRebalanceStatus {
            conditions: vec![RebalanceCondition {
                type_: "Rebalancing".to_string(),
                status: ConditionStatus::True,
                reason: Some("Active".to_string()),
                message: Some("old".to_string()),
                last_transition_time: Some("t0".to_string()),
            }],
            ..Default::default()
        };
        let status = build_active_status(
            &existing,
            &desired(RebalanceState::Rebalancing, "InExecution"),
            &[],
            None,
            "t1",
        );
        assert_eq!(status.conditions[0].last_transition_time.as_deref(), Some("t1"));
    }

    #[test]
    fn paused_status_keeps_the_prior_state_condition_and_the_session() {
        let existing = KafkaRebalanceStatus {
            session_id: Some("t-1".to_string()),
            conditions: vec![RebalanceCondition {
                type_: "Rebalancing".to_string(),
                status: ConditionStatus::True,
                reason: Some("Active".to_string()),
                message: None,
                last_transition_time: Some("t0".to_string()),
            }],
            ..Default::default()
        };
        let status = build_paused_status(&existing, &[], None, "t1");
        assert_eq!(status.session_id.as_deref(), Some("t-1"));
        assert_eq!(status.conditions.len(), 2);
        assert!(status.conditions.iter().any(|c| c.type_ == "ReconciliationPaused"));
        let rebalancing = status.conditions.iter().find(|c| c.type_ == "Rebalancing").unwrap();
        assert_eq!(rebalancing.last_transition_time.as_deref(), Some("t0"));
        assert_eq!(
            super::state_machine::current_state(&status.conditions).unwrap(),
            RebalanceState::Rebalancing
        );
    }

    #[test]
    fn paused_status_carries_validation_warnings() {
        let existing = KafkaRebalanceStatus::default();
        let status = build_paused_status(
            &existing,
            &[("InvalidExcludedTopics".to_string(), "bad regex".to_string())],
            None,
            "t1",
        );
        assert_eq!(status.conditions.len(), 2);
        assert!(status.conditions.iter().any(|c| c.type_ == "Warning"));
    }

    #[test]
    fn reapplying_pause_reuses_the_transition_time() {
        let existing = KafkaRebalanceStatus {
            conditions: vec![RebalanceCondition {
                type_: "ReconciliationPaused".to_string(),
                status: ConditionStatus::True,
                reason: Some("Paused".to_string()),
                message: None,
                last_transition_time: Some("t0".to_string()),
            }],
            ..Default::default()
        };
        let status = build_paused_status(&existing, &[], None, "t1");
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time.as_deref(), Some("t0"));
    }
}
