use async_trait::async_trait;
use rebalance_types::KafkaRebalanceSpec;
use serde::Deserialize;
use std::time::Duration;

use crate::util::Error;

/// Outcome of a `proposal` call (§4.6), as distinguished by the optimization
/// service's response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalResponse {
    /// The service does not yet have enough cluster metrics to compute a
    /// proposal.
    NotEnoughData,
    /// The proposal (or execution) is still being computed.
    StillCalculating { user_task_id: String },
    /// A summary is available.
    Summary {
        user_task_id: String,
        summary: serde_json::Value,
    },
}

/// Execution status returned by `/user_tasks` (§4.6, §4.1.d).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStatus {
    Active,
    InExecution,
    Completed,
    CompletedWithError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusResponse {
    pub status: TaskExecutionStatus,
    pub summary: Option<serde_json::Value>,
}

/// Transport over the external optimization ("Cruise Control") REST service
/// (§4.6). Abstracted behind a trait so the state machine can be exercised
/// against a fake implementation in tests, without a live service.
#[async_trait]
pub trait OptimizationClient: Send + Sync {
    async fn proposal(
        &self,
        spec: &KafkaRebalanceSpec,
        dryrun: bool,
        user_task_id: Option<&str>,
    ) -> Result<ProposalResponse, Error>;

    async fn task_status(&self, user_task_id: &str) -> Result<TaskStatusResponse, Error>;

    async fn stop_execution(&self, user_task_id: &str) -> Result<(), Error>;
}

/// `reqwest`-backed client for a single Cruise Control deployment.
pub struct CruiseControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl CruiseControlClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn goals_query(spec: &KafkaRebalanceSpec) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !spec.goals.is_empty() {
            params.push(("goals", spec.goals.join(",")));
        }
        params.push(("skip_hard_goal_check", spec.skip_hard_goal_check.to_string()));
        if let Some(excluded) = &spec.excluded_topics {
            params.push(("excluded_topics", excluded.clone()));
        }
        if let Some(v) = spec.concurrent_partition_movements_per_broker {
            params.push(("concurrent_partition_movements_per_broker", v.to_string()));
        }
        if let Some(v) = spec.concurrent_intra_broker_partition_movements {
            params.push((
                "concurrent_intra_broker_partition_movements",
                v.to_string(),
            ));
        }
        if let Some(v) = spec.concurrent_leader_movements {
            params.push(("concurrent_leader_movements", v.to_string()));
        }
        if let Some(v) = spec.replication_throttle {
            params.push(("replication_throttle", v.to_string()));
        }
        if !spec.replica_movement_strategies.is_empty() {
            params.push((
                "replica_movement_strategies",
                spec.replica_movement_strategies.join(","),
            ));
        }
        params
    }
}

#[async_trait]
impl OptimizationClient for CruiseControlClient {
    async fn proposal(
        &self,
        spec: &KafkaRebalanceSpec,
        dryrun: bool,
        user_task_id: Option<&str>,
    ) -> Result<ProposalResponse, Error> {
        let url = format!("{}/rebalance", self.base_url);
        let mut query = Self::goals_query(spec);
        query.push(("dryrun", dryrun.to_string()));
        if let Some(id) = user_task_id {
            query.push(("user_task_id", id.to_string()));
        }

        let resp = self
            .http
            .post(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let task_id = resp
            .headers()
            .get("User-Task-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if resp.status() == reqwest::StatusCode::ACCEPTED {
            let task_id = task_id
                .or(user_task_id.map(str::to_owned))
                .ok_or_else(|| Error::Protocol("missing User-Task-Id header".into()))?;
            return Ok(ProposalResponse::StillCalculating {
                user_task_id: task_id,
            });
        }

        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "proposal request failed with status {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;

        if body
            .get("notEnoughData")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(ProposalResponse::NotEnoughData);
        }

        let task_id = task_id
            .or(user_task_id.map(str::to_owned))
            .ok_or_else(|| Error::Protocol("missing User-Task-Id header".into()))?;

        match body.get("summary") {
            Some(summary) => Ok(ProposalResponse::Summary {
                user_task_id: task_id,
                summary: summary.clone(),
            }),
            None => Ok(ProposalResponse::StillCalculating {
                user_task_id: task_id,
            }),
        }
    }

    async fn task_status(&self, user_task_id: &str) -> Result<TaskStatusResponse, Error> {
        let url = format!("{}/user_tasks", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("user_task_ids", user_task_id)])
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "user_tasks request failed with status {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;

        let status = body
            .get("Status")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Protocol("missing Status field".into()))?;

        let status = match status {
            "ACTIVE" => TaskExecutionStatus::Active,
            "IN_EXECUTION" => TaskExecutionStatus::InExecution,
            "COMPLETED" => TaskExecutionStatus::Completed,
            "COMPLETED_WITH_ERROR" => TaskExecutionStatus::CompletedWithError,
            other => {
                return Err(Error::Protocol(format!("unrecognized task status {other}")));
            }
        };

        Ok(TaskStatusResponse {
            status,
            summary: body.get("summary").cloned(),
        })
    }

    async fn stop_execution(&self, user_task_id: &str) -> Result<(), Error> {
        let url = format!("{}/stop_proposal_execution", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("user_task_id", user_task_id)])
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "stop_proposal_execution failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
