use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kube::{Client, Resource, ResourceExt};
use owo_colors::OwoColorize;
use rebalance_types::{KafkaRebalance, PAUSE_ANNOTATION, RebalanceState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::client::OptimizationClient;
use super::key::ResourceKey;
use super::lock::LockRegistry;
use super::state_machine::{self, Desired};
use super::status;
use crate::util::colors::{FG1, FG2};
use crate::util::{self, Error};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Drives the periodic re-check of a `KafkaRebalance` while it sits in
/// `PendingProposal` or `Rebalancing` (§4.2): one timer task per resource,
/// re-reading the resource fresh on every tick rather than threading state
/// through closures, so a concurrent watch-triggered reconcile always wins
/// the race (§9's design note).
pub struct PollController {
    client: Client,
    optimization_client: Arc<dyn OptimizationClient>,
    locks: Arc<LockRegistry>,
    period: Duration,
    max_retries: u32,
    lock_timeout: Duration,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<ControllerMetrics>>,
    timers: Mutex<HashMap<ResourceKey, CancellationToken>>,
}

impl PollController {
    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    pub fn new(
        client: Client,
        optimization_client: Arc<dyn OptimizationClient>,
        locks: Arc<LockRegistry>,
        period: Duration,
        max_retries: u32,
        lock_timeout: Duration,
        #[cfg(feature = "metrics")] metrics: Option<Arc<ControllerMetrics>>,
    ) -> Self {
        PollController {
            client,
            optimization_client,
            locks,
            period,
            max_retries,
            lock_timeout,
            #[cfg(feature = "metrics")]
            metrics,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures a timer task is running for `key`. A no-op if one already is.
    pub async fn ensure_started(self: &Arc<Self>, key: ResourceKey) {
        let mut timers = self.timers.lock().await;
        if timers.contains_key(&key) {
            return;
        }
        let token = CancellationToken::new();
        timers.insert(key.clone(), token.clone());
        let controller = self.clone();
        tokio::spawn(async move { controller.run_timer(key, token).await });
    }

    /// Cancels the timer task for `key`, if any.
    pub async fn cancel(&self, key: &ResourceKey) {
        if let Some(token) = self.timers.lock().await.remove(key) {
            token.cancel();
        }
    }

    /// Cancels every running timer task. Used on controller shutdown.
    pub async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, token) in timers.drain() {
            token.cancel();
        }
    }

    async fn forget(&self, key: &ResourceKey) {
        self.timers.lock().await.remove(key);
    }

    async fn run_timer(self: Arc<Self>, key: ResourceKey, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.tick().await; // the first tick fires immediately; skip it
        let mut consecutive_errors: u32 = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {}
            }
            match self.tick(&key, &mut consecutive_errors).await {
                TickOutcome::Continue => {}
                TickOutcome::Done => {
                    self.forget(&key).await;
                    return;
                }
            }
        }
    }

    async fn tick(&self, key: &ResourceKey, consecutive_errors: &mut u32) -> TickOutcome {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics
                .poll_tick_counter
                .with_label_values(&[&key.name, &key.namespace])
                .inc();
        }

        let instance: KafkaRebalance = match util::get_optional(self.client.clone(), &key.namespace, &key.name).await
        {
            Ok(Some(instance)) => instance,
            Ok(None) => return TickOutcome::Done,
            Err(e) => {
                eprintln!("{}", format!("poll tick failed to re-read {key}: {e}").red());
                return TickOutcome::Continue;
            }
        };

        if instance.annotations().contains_key(PAUSE_ANNOTATION) {
            return TickOutcome::Continue;
        }

        let lock = match self.locks.acquire(key.clone(), self.lock_timeout).await {
            Ok(lock) => lock,
            Err(_) => {
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.metrics {
                    metrics
                        .lock_timeout_counter
                        .with_label_values(&[&key.name, &key.namespace])
                        .inc();
                }
                return TickOutcome::Continue;
            }
        };

        let outcome = self.tick_locked(&instance, consecutive_errors).await;
        drop(lock);
        outcome
    }

    async fn tick_locked(&self, instance: &KafkaRebalance, consecutive_errors: &mut u32) -> TickOutcome {
        let existing_status = instance.status.clone().unwrap_or_default();
        let current_state = match state_machine::current_state(&existing_status.conditions) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("{}", format!("poll tick: {e}").red());
                return TickOutcome::Done;
            }
        };

        let result: Result<(Desired, bool), Error> = match current_state {
            RebalanceState::PendingProposal => match &existing_status.session_id {
                Some(session_id) => state_machine::poll_pending_proposal(
                    self.optimization_client.as_ref(),
                    &instance.spec,
                    session_id,
                )
                .await
                .map(|desired| {
                    let done = desired.state != RebalanceState::PendingProposal;
                    (desired, done)
                }),
                None => state_machine::request_dry_run(self.optimization_client.as_ref(), &instance.spec)
                    .await
                    .map(|desired| {
                        let done = desired.state != RebalanceState::PendingProposal;
                        (desired, done)
                    }),
            },
            RebalanceState::Rebalancing => match &existing_status.session_id {
                Some(session_id) => state_machine::poll_task_status(
                    self.optimization_client.as_ref(),
                    session_id,
                    existing_status.optimization_result.as_ref(),
                )
                .await,
                None => return TickOutcome::Done,
            },
            // The resource already left a polled state (a concurrent
            // reconcile won the race); stop this timer.
            _ => return TickOutcome::Done,
        };

        match result {
            Ok((desired, stop)) => {
                *consecutive_errors = 0;
                let now = chrono::Utc::now().to_rfc3339();
                let warnings = status::existing_warnings(&existing_status);
                let status = status::build_active_status(
                    &existing_status,
                    &desired,
                    &warnings,
                    instance.meta().generation,
                    &now,
                );
                #[cfg(feature = "metrics")]
                let write_timer = self.metrics.as_ref().map(|metrics| {
                    metrics
                        .write_histogram
                        .with_label_values(&[
                            &instance.name_any(),
                            &instance.namespace().unwrap_or_default(),
                            &desired.state.to_string(),
                        ])
                        .start_timer()
                });
                if let Err(e) = util::patch::patch_status(self.client.clone(), instance, status).await {
                    eprintln!("{}", format!("poll tick: failed to write status: {e}").red());
                }
                #[cfg(feature = "metrics")]
                if let Some(timer) = write_timer {
                    timer.observe_duration();
                }
                println!(
                    "{}{}{}{}{}",
                    instance.namespace().unwrap_or_default().color(FG2),
                    "/".color(FG1),
                    instance.name_any().color(FG2),
                    " POLL: ".color(FG1),
                    desired.state.to_string().color(FG2),
                );
                if stop {
                    TickOutcome::Done
                } else {
                    TickOutcome::Continue
                }
            }
            Err(e) => {
                *consecutive_errors += 1;
                if *consecutive_errors >= self.max_retries {
                    let desired = Desired::not_ready_from_error(
                        &e,
                        existing_status.session_id.clone(),
                        existing_status.optimization_result.clone(),
                    );
                    let now = chrono::Utc::now().to_rfc3339();
                    let warnings = status::existing_warnings(&existing_status);
                    let status = status::build_active_status(
                        &existing_status,
                        &desired,
                        &warnings,
                        instance.meta().generation,
                        &now,
                    );
                    #[cfg(feature = "metrics")]
                    let write_timer = self.metrics.as_ref().map(|metrics| {
                        metrics
                            .write_histogram
                            .with_label_values(&[
                                &instance.name_any(),
                                &instance.namespace().unwrap_or_default(),
                                &desired.state.to_string(),
                            ])
                            .start_timer()
                    });
                    if let Err(e) = util::patch::patch_status(self.client.clone(), instance, status).await {
                        eprintln!("{}", format!("poll tick: failed to write status: {e}").red());
                    }
                    #[cfg(feature = "metrics")]
                    if let Some(timer) = write_timer {
                        timer.observe_duration();
                    }
                    TickOutcome::Done
                } else {
                    eprintln!(
                        "{}",
                        format!(
                            "poll tick against the optimization service failed ({}/{}): {e}",
                            consecutive_errors, self.max_retries
                        )
                        .red()
                    );
                    TickOutcome::Continue
                }
            }
        }
    }
}

enum TickOutcome {
    Continue,
    Done,
}
