use rebalance_types::{Annotation, KafkaRebalanceSpec, KafkaRebalanceStatus, RebalanceState};
use serde_json::Value;

use super::client::{OptimizationClient, ProposalResponse, TaskExecutionStatus, TaskStatusResponse};
use crate::util::Error;

/// The next desired status, as computed by a single branch of the
/// transition table (§4.1). Carries everything [`super::status`] needs to
/// build the written status document, besides the warnings, which are
/// orthogonal to the state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Desired {
    pub state: RebalanceState,
    pub session_id: Option<String>,
    pub optimization_result: Option<Value>,
    pub reason: String,
    pub message: String,
}

impl Desired {
    /// Projects an [`Error`] into a terminal `NotReady` status (§7: "errors
    /// never cross the reconciler boundary; they are always projected into
    /// a status condition").
    pub fn not_ready_from_error(
        error: &Error,
        session_id: Option<String>,
        optimization_result: Option<Value>,
    ) -> Desired {
        Desired {
            state: RebalanceState::NotReady,
            session_id,
            optimization_result,
            reason: error.reason().to_string(),
            message: error.to_string(),
        }
    }
}

/// The decision the transition table of §4.1 makes for a given `(state,
/// annotation)` pair, stripped of the I/O a caller performs to realize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `⊥`: nothing changes. The reconciler still ensures a poll timer is
    /// running if the current state is `PendingProposal`/`Rebalancing`.
    Stay,
    /// §4.1.a: request a dry-run proposal.
    RequestDryRun,
    /// §4.1.c: request a non-dry-run execution.
    Execute,
    /// `PendingProposal` + `stop`: cancel the poll timer, no remote call.
    CancelPolling,
    /// `Rebalancing` + `stop`: call `stopExecution`, then cancel the timer.
    StopExecution,
}

/// The transition table of §4.1, as a pure function of the observed state
/// and the decoded control annotation.
pub fn decide(current: RebalanceState, annotation: Annotation) -> Decision {
    use Annotation::*;
    use RebalanceState::*;
    match (current, annotation) {
        (New, Stop) => Decision::Stay,
        (New, _) => Decision::RequestDryRun,

        (PendingProposal, Stop) => Decision::CancelPolling,
        (PendingProposal, _) => Decision::Stay,

        (ProposalReady, Approve) => Decision::Execute,
        (ProposalReady, Refresh) => Decision::RequestDryRun,
        (ProposalReady, _) => Decision::Stay,

        (Rebalancing, Stop) => Decision::StopExecution,
        (Rebalancing, _) => Decision::Stay,

        (Stopped, Refresh) => Decision::RequestDryRun,
        (Stopped, _) => Decision::Stay,

        (Ready, Refresh) => Decision::RequestDryRun,
        (Ready, _) => Decision::Stay,

        (NotReady, Refresh) => Decision::RequestDryRun,
        (NotReady, _) => Decision::Stay,
    }
}

/// Whether a successful or failed transition driven by `annotation` should
/// strip it from the resource's metadata (§4.1: "Any annotation consumed by
/// the transition... is stripped... unknown annotations are kept"). Cells
/// marked "ignored" in the table never change [`Decision::Stay`], which is
/// exactly the condition under which nothing was consumed.
pub fn consumes_annotation(annotation: Annotation, decision: Decision) -> bool {
    annotation.is_consumable() && decision != Decision::Stay
}

/// Reconstructs the current state from the observed condition list (§3, §4.3).
/// More than one condition whose `type` matches a state name is a data-model
/// error (§3's invariant) and surfaces as [`Error::AmbiguousState`].
pub fn current_state(conditions: &[rebalance_types::RebalanceCondition]) -> Result<RebalanceState, Error> {
    let mut found = None;
    for condition in conditions {
        if let Ok(state) = condition.type_.parse::<RebalanceState>() {
            if found.is_some() {
                return Err(Error::AmbiguousState);
            }
            found = Some(state);
        }
    }
    Ok(found.unwrap_or(RebalanceState::New))
}

/// Reconstructs the `Desired` status for [`Decision::Stay`]: identical to
/// the status already observed, so [`super::status::build_active_status`]
/// reuses the existing condition's `lastTransitionTime` and
/// `util::patch::patch_status` elides the write entirely.
pub fn stay(current: RebalanceState, existing: &KafkaRebalanceStatus) -> Desired {
    let type_str = current.to_string();
    let existing_condition = existing.conditions.iter().find(|c| c.type_ == type_str);
    Desired {
        state: current,
        session_id: existing.session_id.clone(),
        optimization_result: existing.optimization_result.clone(),
        reason: existing_condition
            .and_then(|c| c.reason.clone())
            .unwrap_or_else(|| current.to_string()),
        message: existing_condition.and_then(|c| c.message.clone()).unwrap_or_default(),
    }
}

/// §4.1.a: request a dry-run proposal for a resource with no prior session.
pub async fn request_dry_run(
    client: &dyn OptimizationClient,
    spec: &KafkaRebalanceSpec,
) -> Result<Desired, Error> {
    client.proposal(spec, true, None).await.map(interpret_dryrun_response)
}

/// §4.1.b: re-issue the dry-run proposal for an already-running session.
pub async fn poll_pending_proposal(
    client: &dyn OptimizationClient,
    spec: &KafkaRebalanceSpec,
    session_id: &str,
) -> Result<Desired, Error> {
    client
        .proposal(spec, true, Some(session_id))
        .await
        .map(interpret_dryrun_response)
}

/// §4.1.c: request a non-dry-run execution.
pub async fn execute(client: &dyn OptimizationClient, spec: &KafkaRebalanceSpec) -> Result<Desired, Error> {
    client.proposal(spec, false, None).await.map(interpret_execute_response)
}

fn interpret_dryrun_response(response: ProposalResponse) -> Desired {
    match response {
        ProposalResponse::NotEnoughData => Desired {
            state: RebalanceState::PendingProposal,
            session_id: None,
            optimization_result: None,
            reason: "NotEnoughData".to_string(),
            message: "The optimization service does not yet have enough cluster metrics to \
                      compute a proposal."
                .to_string(),
        },
        ProposalResponse::StillCalculating { user_task_id } => Desired {
            state: RebalanceState::PendingProposal,
            session_id: Some(user_task_id),
            optimization_result: None,
            reason: "StillCalculating".to_string(),
            message: "Waiting for the optimization service to finish computing the proposal."
                .to_string(),
        },
        ProposalResponse::Summary { user_task_id, summary } => Desired {
            state: RebalanceState::ProposalReady,
            session_id: Some(user_task_id),
            optimization_result: Some(summary),
            reason: "ProposalReady".to_string(),
            message: "A rebalance proposal is ready and awaiting approval.".to_string(),
        },
    }
}

fn interpret_execute_response(response: ProposalResponse) -> Desired {
    match response {
        ProposalResponse::NotEnoughData => Desired {
            state: RebalanceState::PendingProposal,
            session_id: None,
            optimization_result: None,
            reason: "NotEnoughData".to_string(),
            message: "The optimization service does not yet have enough cluster metrics to \
                      execute a rebalance."
                .to_string(),
        },
        ProposalResponse::StillCalculating { user_task_id } => Desired {
            state: RebalanceState::Rebalancing,
            session_id: Some(user_task_id),
            optimization_result: None,
            reason: "StillCalculating".to_string(),
            message: "The optimization service is still computing the execution plan.".to_string(),
        },
        ProposalResponse::Summary { user_task_id, summary } => Desired {
            state: RebalanceState::Rebalancing,
            session_id: Some(user_task_id),
            optimization_result: Some(summary),
            reason: "Rebalancing".to_string(),
            message: "The rebalance is in progress.".to_string(),
        },
    }
}

/// §4.1.d: poll task status for a run in progress. The second element of
/// the tuple is true when the poll timer should stop itself so the
/// reconciler can observe the update (§4.1.d's "cancel the polling timer on
/// the first successful merge" note for `IN_EXECUTION`, and true whenever
/// the resource reaches a terminal state).
pub async fn poll_task_status(
    client: &dyn OptimizationClient,
    session_id: &str,
    existing_result: Option<&Value>,
) -> Result<(Desired, bool), Error> {
    client
        .task_status(session_id)
        .await
        .map(|response| interpret_task_status(response, session_id, existing_result))
}

fn interpret_task_status(
    response: TaskStatusResponse,
    session_id: &str,
    existing_result: Option<&Value>,
) -> (Desired, bool) {
    match response.status {
        TaskExecutionStatus::Active => (
            Desired {
                state: RebalanceState::Rebalancing,
                session_id: Some(session_id.to_string()),
                optimization_result: existing_result.cloned(),
                reason: "Active".to_string(),
                message: "The rebalance is actively executing.".to_string(),
            },
            false,
        ),
        TaskExecutionStatus::InExecution => match response.summary {
            Some(summary) => (
                Desired {
                    state: RebalanceState::Rebalancing,
                    session_id: Some(session_id.to_string()),
                    optimization_result: Some(summary),
                    reason: "InExecution".to_string(),
                    message: "The rebalance is executing; progress summary updated.".to_string(),
                },
                true,
            ),
            None => (
                Desired {
                    state: RebalanceState::Rebalancing,
                    session_id: Some(session_id.to_string()),
                    optimization_result: existing_result.cloned(),
                    reason: "InExecution".to_string(),
                    message: "The rebalance is executing.".to_string(),
                },
                false,
            ),
        },
        TaskExecutionStatus::Completed => (
            Desired {
                state: RebalanceState::Ready,
                session_id: None,
                optimization_result: response.summary.or_else(|| existing_result.cloned()),
                reason: "Ready".to_string(),
                message: "The rebalance completed successfully.".to_string(),
            },
            true,
        ),
        TaskExecutionStatus::CompletedWithError => (
            Desired {
                state: RebalanceState::NotReady,
                // Preserved per §9's open question: operators can correlate
                // with the optimization service's own logs by task id.
                session_id: Some(session_id.to_string()),
                optimization_result: existing_result.cloned(),
                reason: "CompletedWithError".to_string(),
                message: format!(
                    "The rebalance execution completed with an error. See the optimization \
                     service's task '{session_id}' for details."
                ),
            },
            true,
        ),
    }
}

/// `PendingProposal` + `stop`: no remote call, the proposal was never
/// executing — just stop polling and record that the user cancelled it.
pub fn cancel_polling() -> Desired {
    Desired {
        state: RebalanceState::Stopped,
        session_id: None,
        optimization_result: None,
        reason: "Stopped".to_string(),
        message: "The pending proposal was cancelled by user request.".to_string(),
    }
}

/// `Rebalancing` + `stop`: ask the optimization service to stop the
/// in-progress execution.
pub async fn stop_execution(client: &dyn OptimizationClient, session_id: &str) -> Result<Desired, Error> {
    client.stop_execution(session_id).await?;
    Ok(Desired {
        state: RebalanceState::Stopped,
        session_id: None,
        optimization_result: None,
        reason: "Stopped".to_string(),
        message: "The rebalance execution was stopped by user request.".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rebalance_types::Annotation::*;
    use rebalance_types::RebalanceState::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn transition_table_matches_section_4_1() {
        let cases = [
            (New, None, Decision::RequestDryRun),
            (New, Approve, Decision::RequestDryRun),
            (New, Refresh, Decision::RequestDryRun),
            (New, Stop, Decision::Stay),
            (New, Unknown, Decision::RequestDryRun),
            (PendingProposal, None, Decision::Stay),
            (PendingProposal, Approve, Decision::Stay),
            (PendingProposal, Refresh, Decision::Stay),
            (PendingProposal, Stop, Decision::CancelPolling),
            (PendingProposal, Unknown, Decision::Stay),
            (ProposalReady, None, Decision::Stay),
            (ProposalReady, Approve, Decision::Execute),
            (ProposalReady, Refresh, Decision::RequestDryRun),
            (ProposalReady, Stop, Decision::Stay),
            (ProposalReady, Unknown, Decision::Stay),
            (Rebalancing, None, Decision::Stay),
            (Rebalancing, Approve, Decision::Stay),
            (Rebalancing, Refresh, Decision::Stay),
            (Rebalancing, Stop, Decision::StopExecution),
            (Rebalancing, Unknown, Decision::Stay),
            (Stopped, None, Decision::Stay),
            (Stopped, Approve, Decision::Stay),
            (Stopped, Refresh, Decision::RequestDryRun),
            (Stopped, Stop, Decision::Stay),
            (Stopped, Unknown, Decision::Stay),
            (Ready, None, Decision::Stay),
            (Ready, Approve, Decision::Stay),
            (Ready, Refresh, Decision::RequestDryRun),
            (Ready, Stop, Decision::Stay),
            (Ready, Unknown, Decision::Stay),
            (NotReady, None, Decision::Stay),
            (NotReady, Approve, Decision::Stay),
            (NotReady, Refresh, Decision::RequestDryRun),
            (NotReady, Stop, Decision::Stay),
            (NotReady, Unknown, Decision::Stay),
        ];
        for (state, annotation, expected) in cases {
            assert_eq!(
                decide(state, annotation),
                expected,
                "state={state:?} annotation={annotation:?}"
            );
        }
    }

    #[test]
    fn only_decisions_other_than_stay_consume_the_annotation() {
        assert!(!consumes_annotation(Approve, Decision::Stay));
        assert!(consumes_annotation(Approve, Decision::Execute));
        assert!(consumes_annotation(Refresh, Decision::RequestDryRun));
        assert!(consumes_annotation(Stop, Decision::StopExecution));
        assert!(consumes_annotation(Stop, Decision::CancelPolling));
        assert!(!consumes_annotation(Unknown, Decision::RequestDryRun));
        assert!(!consumes_annotation(None, Decision::RequestDryRun));
    }

    #[test]
    fn current_state_defaults_to_new_when_no_condition_matches() {
        assert_eq!(current_state(&[]).unwrap(), RebalanceState::New);
    }

    #[test]
    fn current_state_rejects_two_state_conditions() {
        use rebalance_types::{ConditionStatus, RebalanceCondition};
        let conditions = vec![
            RebalanceCondition {
                type_: "ProposalReady".to_string(),
                status: ConditionStatus::True,
                reason: None,
                message: None,
                last_transition_time: None,
            },
            RebalanceCondition {
                type_: "Rebalancing".to_string(),
                status: ConditionStatus::True,
                reason: None,
                message: None,
                last_transition_time: None,
            },
        ];
        assert!(matches!(current_state(&conditions), Err(Error::AmbiguousState)));
    }

    struct FakeClient {
        proposals: Mutex<VecDeque<Result<ProposalResponse, Error>>>,
        task_statuses: Mutex<VecDeque<Result<TaskStatusResponse, Error>>>,
        stop_calls: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn new() -> Self {
            FakeClient {
                proposals: Mutex::new(VecDeque::new()),
                task_statuses: Mutex::new(VecDeque::new()),
                stop_calls: Mutex::new(Vec::new()),
            }
        }

        fn with_proposals(responses: Vec<Result<ProposalResponse, Error>>) -> Self {
            let client = Self::new();
            *client.proposals.lock().unwrap() = responses.into();
            client
        }

        fn with_task_statuses(responses: Vec<Result<TaskStatusResponse, Error>>) -> Self {
            let client = Self::new();
            *client.task_statuses.lock().unwrap() = responses.into();
            client
        }
    }

    #[async_trait]
    impl OptimizationClient for FakeClient {
        async fn proposal(
            &self,
            _spec: &KafkaRebalanceSpec,
            _dryrun: bool,
            _user_task_id: Option<&str>,
        ) -> Result<ProposalResponse, Error> {
            self.proposals
                .lock()
                .unwrap()
                .pop_front()
                .expect("no more scripted proposal responses")
        }

        async fn task_status(&self, _user_task_id: &str) -> Result<TaskStatusResponse, Error> {
            self.task_statuses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no more scripted task status responses")
        }

        async fn stop_execution(&self, user_task_id: &str) -> Result<(), Error> {
            self.stop_calls.lock().unwrap().push(user_task_id.to_string());
            Ok(())
        }
    }

    fn spec() -> KafkaRebalanceSpec {
        KafkaRebalanceSpec::default()
    }

    /// Scenario 1 (§8): happy path, summary present immediately.
    #[tokio::test]
    async fn scenario_happy_path_proposal_ready_immediately() {
        let client = FakeClient::with_proposals(vec![Ok(ProposalResponse::Summary {
            user_task_id: "t-1".to_string(),
            summary: serde_json::json!({"numIntraBrokerReplicaMovements": 0}),
        })]);
        let desired = request_dry_run(&client, &spec()).await.unwrap();
        assert_eq!(desired.state, RebalanceState::ProposalReady);
        assert_eq!(desired.session_id.as_deref(), Some("t-1"));
        assert!(desired.optimization_result.is_some());
    }

    /// Scenario 2 (§8): deferred proposal, then approve, then execution completes.
    #[tokio::test]
    async fn scenario_deferred_proposal_then_approve_then_completion() {
        let client = FakeClient::with_proposals(vec![Ok(ProposalResponse::StillCalculating {
            user_task_id: "t-2".to_string(),
        })]);
        let desired = request_dry_run(&client, &spec()).await.unwrap();
        assert_eq!(desired.state, RebalanceState::PendingProposal);

        let client = FakeClient::with_proposals(vec![Ok(ProposalResponse::Summary {
            user_task_id: "t-2".to_string(),
            summary: serde_json::json!({"goal": "done"}),
        })]);
        let desired = poll_pending_proposal(&client, &spec(), "t-2").await.unwrap();
        assert_eq!(desired.state, RebalanceState::ProposalReady);

        let client = FakeClient::with_proposals(vec![Ok(ProposalResponse::StillCalculating {
            user_task_id: "t-2".to_string(),
        })]);
        let desired = execute(&client, &spec()).await.unwrap();
        assert_eq!(desired.state, RebalanceState::Rebalancing);
        assert_eq!(desired.session_id.as_deref(), Some("t-2"));

        let client = FakeClient::with_task_statuses(vec![
            Ok(TaskStatusResponse {
                status: TaskExecutionStatus::Active,
                summary: None,
            }),
            Ok(TaskStatusResponse {
                status: TaskExecutionStatus::InExecution,
                summary: Some(serde_json::json!({"progress": 50})),
            }),
            Ok(TaskStatusResponse {
                status: TaskExecutionStatus::Completed,
                summary: None,
            }),
        ]);
        let (desired, stop) = poll_task_status(&client, "t-2", None).await.unwrap();
        assert_eq!(desired.state, RebalanceState::Rebalancing);
        assert!(!stop);
        let (desired, stop) = poll_task_status(&client, "t-2", desired.optimization_result.as_ref())
            .await
            .unwrap();
        assert_eq!(desired.state, RebalanceState::Rebalancing);
        assert!(stop);
        let (desired, stop) = poll_task_status(&client, "t-2", desired.optimization_result.as_ref())
            .await
            .unwrap();
        assert_eq!(desired.state, RebalanceState::Ready);
        assert_eq!(desired.session_id, None);
        assert!(stop);
    }

    /// Scenario 3 (§8): stop during rebalance.
    #[tokio::test]
    async fn scenario_stop_during_rebalance() {
        let client = FakeClient::new();
        let decision = decide(RebalanceState::Rebalancing, Stop);
        assert_eq!(decision, Decision::StopExecution);
        let desired = stop_execution(&client, "t-3").await.unwrap();
        assert_eq!(desired.state, RebalanceState::Stopped);
        assert_eq!(desired.session_id, None);
        assert_eq!(client.stop_calls.lock().unwrap().as_slice(), ["t-3"]);
    }

    /// Scenario 4 (§8): refresh from Stopped.
    #[tokio::test]
    async fn scenario_refresh_from_stopped() {
        assert_eq!(decide(RebalanceState::Stopped, Refresh), Decision::RequestDryRun);
        let client = FakeClient::with_proposals(vec![Ok(ProposalResponse::Summary {
            user_task_id: "t-4".to_string(),
            summary: serde_json::json!({}),
        })]);
        let desired = request_dry_run(&client, &spec()).await.unwrap();
        assert_eq!(desired.state, RebalanceState::ProposalReady);
    }

    /// Scenario 6 (§8): five consecutive transport errors while Rebalancing.
    #[tokio::test]
    async fn scenario_five_consecutive_transport_errors() {
        let client = FakeClient::with_task_statuses(vec![
            Err(Error::Transport("timeout".to_string())),
            Err(Error::Transport("timeout".to_string())),
            Err(Error::Transport("timeout".to_string())),
            Err(Error::Transport("timeout".to_string())),
            Err(Error::Transport("timeout".to_string())),
        ]);
        let mut consecutive_errors = 0;
        let max_retries = 5;
        let mut final_desired = None;
        for _ in 0..max_retries {
            match poll_task_status(&client, "t-6", None).await {
                Ok(_) => unreachable!("scripted client only returns errors"),
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= max_retries {
                        final_desired = Some(Desired::not_ready_from_error(&e, Some("t-6".to_string()), None));
                    }
                }
            }
        }
        let desired = final_desired.expect("should fail after max retries");
        assert_eq!(desired.state, RebalanceState::NotReady);
    }
}
