use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Key of the annotation users set to drive [`KafkaRebalance`] transitions.
pub const REBALANCE_ANNOTATION: &str = "strimzi.io/rebalance";

/// Key of the annotation that short-circuits reconciliation entirely.
pub const PAUSE_ANNOTATION: &str = "strimzi.io/pause-reconciliation";

/// Key of the label binding a [`KafkaRebalance`] to its target cluster.
pub const CLUSTER_LABEL: &str = "strimzi.io/cluster";

/// `type` of the auxiliary condition written when reconciliation is paused.
pub const RECONCILIATION_PAUSED: &str = "ReconciliationPaused";

/// `type` of the auxiliary condition carrying validation/deprecation warnings.
pub const WARNING: &str = "Warning";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
        }
    }
}

/// One entry of `status.conditions`. Shape is the bit-exact surface that
/// operators and `kubectl describe` expect, so this is a plain struct
/// rather than `k8s_openapi`'s generic meta/v1 `Condition`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct RebalanceCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(
        rename = "lastTransitionTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

/// The state-machine states of §4.1. Each variant's [`Display`] form is the
/// exact `type` string written to `status.conditions`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RebalanceState {
    New,
    PendingProposal,
    ProposalReady,
    Rebalancing,
    Ready,
    Stopped,
    NotReady,
}

impl FromStr for RebalanceState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(RebalanceState::New),
            "PendingProposal" => Ok(RebalanceState::PendingProposal),
            "ProposalReady" => Ok(RebalanceState::ProposalReady),
            "Rebalancing" => Ok(RebalanceState::Rebalancing),
            "Ready" => Ok(RebalanceState::Ready),
            "Stopped" => Ok(RebalanceState::Stopped),
            "NotReady" => Ok(RebalanceState::NotReady),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RebalanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceState::New => write!(f, "New"),
            RebalanceState::PendingProposal => write!(f, "PendingProposal"),
            RebalanceState::ProposalReady => write!(f, "ProposalReady"),
            RebalanceState::Rebalancing => write!(f, "Rebalancing"),
            RebalanceState::Ready => write!(f, "Ready"),
            RebalanceState::Stopped => write!(f, "Stopped"),
            RebalanceState::NotReady => write!(f, "NotReady"),
        }
    }
}

/// The annotation alphabet of §4.1, already decoded from the raw string
/// value of [`REBALANCE_ANNOTATION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    None,
    Approve,
    Refresh,
    Stop,
    Unknown,
}

impl Annotation {
    /// Whether a successful transition driven by this annotation should
    /// strip it from the resource's metadata afterwards (§4.1).
    pub fn is_consumable(&self) -> bool {
        matches!(self, Annotation::Approve | Annotation::Refresh | Annotation::Stop)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::None => write!(f, "none"),
            Annotation::Approve => write!(f, "approve"),
            Annotation::Refresh => write!(f, "refresh"),
            Annotation::Stop => write!(f, "stop"),
            Annotation::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status object for the [`KafkaRebalance`] resource — the sole durable
/// state of the rebalance-orchestration state machine.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct KafkaRebalanceStatus {
    #[serde(rename = "observedGeneration", default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(
        rename = "optimizationResult",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub optimization_result: Option<serde_json::Value>,

    #[serde(default)]
    pub conditions: Vec<RebalanceCondition>,
}

/// Spec and CRD definition of a user-declared rebalance intent.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaRebalance",
    plural = "kafkarebalances",
    derive = "PartialEq",
    status = "KafkaRebalanceStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.conditions[-1:].type\", \"name\": \"STATE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.sessionId\", \"name\": \"SESSION\", \"type\": \"string\" }"
)]
pub struct KafkaRebalanceSpec {
    /// Ordered list of Cruise Control goal class names. Empty means "use
    /// the optimization service's configured default goals".
    #[serde(default)]
    pub goals: Vec<String>,

    #[serde(rename = "skipHardGoalCheck", default)]
    pub skip_hard_goal_check: bool,

    /// Regular expression of topic names to exclude from the proposal.
    #[serde(rename = "excludedTopics", default, skip_serializing_if = "Option::is_none")]
    pub excluded_topics: Option<String>,

    #[serde(
        rename = "concurrentPartitionMovementsPerBroker",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrent_partition_movements_per_broker: Option<u32>,

    #[serde(
        rename = "concurrentIntraBrokerPartitionMovements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrent_intra_broker_partition_movements: Option<u32>,

    #[serde(
        rename = "concurrentLeaderMovements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrent_leader_movements: Option<u32>,

    #[serde(rename = "replicationThrottle", default, skip_serializing_if = "Option::is_none")]
    pub replication_throttle: Option<u32>,

    #[serde(rename = "replicaMovementStrategies", default)]
    pub replica_movement_strategies: Vec<String>,
}

/// Minimal view of the external `KafkaCluster` entity (§3): enough to
/// confirm it exists in the namespace and declares the optimization
/// service. The full Kafka CRD is out of scope (§1).
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "Kafka",
    plural = "kafkas",
    derive = "PartialEq",
    namespaced
)]
pub struct KafkaSpec {
    #[serde(rename = "cruiseControl", default, skip_serializing_if = "Option::is_none")]
    pub cruise_control: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_display_and_from_str() {
        for state in [
            RebalanceState::New,
            RebalanceState::PendingProposal,
            RebalanceState::ProposalReady,
            RebalanceState::Rebalancing,
            RebalanceState::Ready,
            RebalanceState::Stopped,
            RebalanceState::NotReady,
        ] {
            let parsed: RebalanceState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn unknown_condition_type_does_not_parse_as_a_state() {
        assert!("ReconciliationPaused".parse::<RebalanceState>().is_err());
        assert!("Warning".parse::<RebalanceState>().is_err());
    }

    #[test]
    fn only_approve_refresh_stop_are_consumable() {
        assert!(!Annotation::None.is_consumable());
        assert!(Annotation::Approve.is_consumable());
        assert!(Annotation::Refresh.is_consumable());
        assert!(Annotation::Stop.is_consumable());
        assert!(!Annotation::Unknown.is_consumable());
    }
}
