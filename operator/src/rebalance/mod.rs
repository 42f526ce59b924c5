use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{Controller, controller::Action, watcher},
};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use owo_colors::OwoColorize;
use rebalance_common::args::RebalanceArgs;
use rebalance_types::{KafkaRebalance, PAUSE_ANNOTATION, REBALANCE_ANNOTATION};

mod annotation;
mod client;
mod key;
mod lock;
mod poll;
mod state_machine;
mod status;
mod validation;

use client::CruiseControlClient;
use key::ResourceKey;
use lock::LockRegistry;
use poll::PollController;
use state_machine::Decision;

use crate::util::colors::{FG1, FG2};
use crate::util::{self, Error, PROBE_INTERVAL, messages};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the rebalance-orchestration controller.
pub async fn run(client: Client, args: RebalanceArgs) -> Result<(), Error> {
    println!("{}", "Starting KafkaRebalance controller...".green());

    let context: Arc<ReconcilerContext> = Arc::new(ReconcilerContext::new(client.clone(), &args)?);

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("rebalance-controller-{}", uuid::Uuid::new_v4()));
    let lease_name = "rebalance-controller-lock".to_string();
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        rebalance_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    rebalance_common::signal_ready();
    println!("{}", "🌱 Starting KafkaRebalance controller...".green());

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                context.polls.cancel_all().await;
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting controller");
                let context_for_controller = context.clone();
                let crd_api: Api<KafkaRebalance> = Api::all(client.clone());
                let watcher_config = match &args.label_selector {
                    Some(selector) => watcher::Config::default().labels(selector),
                    None => watcher::Config::default(),
                };
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 KafkaRebalance controller started.".green());
                    Controller::new(crd_api, watcher_config)
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

/// Context injected with each `reconcile` and `on_error` call.
struct ReconcilerContext {
    client: Client,
    optimization_client: Arc<dyn client::OptimizationClient>,
    locks: Arc<LockRegistry>,
    polls: Arc<PollController>,
    lock_timeout: Duration,
    #[cfg(feature = "metrics")]
    metrics: Arc<ControllerMetrics>,
}

impl ReconcilerContext {
    fn new(client: Client, args: &RebalanceArgs) -> Result<Self, Error> {
        let optimization_client: Arc<dyn client::OptimizationClient> = Arc::new(CruiseControlClient::new(
            args.cruise_control_url.clone(),
            Duration::from_millis(args.cruise_control_timeout_ms),
        )?);
        let locks = Arc::new(LockRegistry::new());
        let lock_timeout = Duration::from_millis(args.lock_timeout_ms);

        #[cfg(feature = "metrics")]
        let metrics = Arc::new(ControllerMetrics::new("rebalance"));

        let polls = Arc::new(PollController::new(
            client.clone(),
            optimization_client.clone(),
            locks.clone(),
            Duration::from_millis(args.polling_timer_ms),
            args.max_api_retries,
            lock_timeout,
            #[cfg(feature = "metrics")]
            Some(metrics.clone()),
        ));

        Ok(ReconcilerContext {
            client,
            optimization_client,
            locks,
            polls,
            lock_timeout,
            #[cfg(feature = "metrics")]
            metrics,
        })
    }
}

/// Reconciliation function for the `KafkaRebalance` resource (§4).
async fn reconcile(instance: Arc<KafkaRebalance>, context: Arc<ReconcilerContext>) -> Result<Action, Error> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::Validation("KafkaRebalance resources must be namespaced".to_string()))?;
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    let key = ResourceKey {
        namespace: namespace.clone(),
        name: name.clone(),
    };

    let lock = match context.locks.acquire(key.clone(), context.lock_timeout).await {
        Ok(lock) => lock,
        Err(e) => {
            #[cfg(feature = "metrics")]
            context
                .metrics
                .lock_timeout_counter
                .with_label_values(&[&name, &namespace])
                .inc();
            eprintln!("{}", format!("{key}: {e}").red());
            // Drop the event; a later watch resync or the poll timer retries.
            return Ok(Action::requeue(Duration::from_secs(1)));
        }
    };

    let result = reconcile_locked(&instance, &key, &context).await;
    drop(lock);
    result
}

async fn reconcile_locked(
    instance: &Arc<KafkaRebalance>,
    key: &ResourceKey,
    context: &ReconcilerContext,
) -> Result<Action, Error> {
    // Re-read the resource so we act on the freshest copy, not a possibly
    // stale watch event (§9).
    let instance: KafkaRebalance =
        match util::get_optional(context.client.clone(), &key.namespace, &key.name).await? {
            Some(instance) => instance,
            None => {
                println!("{}", format!("{key}: {}", messages::STALE_RESOURCE).yellow());
                context.polls.cancel(key).await;
                return Ok(Action::await_change());
            }
        };

    if instance.annotations().contains_key(PAUSE_ANNOTATION) {
        context.polls.cancel(key).await;
        let existing_status = instance.status.clone().unwrap_or_default();
        let warnings = validation::collect_warnings(&instance);
        let now = chrono::Utc::now().to_rfc3339();
        let desired_status =
            status::build_paused_status(&existing_status, &warnings, instance.meta().generation, &now);
        let _ = util::patch::patch_status(context.client.clone(), &instance, desired_status).await?;
        println!("{}", format!("{key}: {}", messages::PAUSED).yellow());
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    let current_state = state_machine::current_state(&instance.status.clone().unwrap_or_default().conditions)?;
    let annotation_value = annotation::decode(Some(instance.annotations()));
    let decision = state_machine::decide(current_state, annotation_value);

    let warnings = validation::collect_warnings(&instance);

    let existing_status = instance.status.clone().unwrap_or_default();

    #[cfg(feature = "metrics")]
    let read_timer = std::time::Instant::now();

    let desired = match decision {
        Decision::Stay => state_machine::stay(current_state, &existing_status),
        Decision::CancelPolling => state_machine::cancel_polling(),
        Decision::RequestDryRun | Decision::Execute => {
            match validation::verify_cluster(context.client.clone(), &instance).await {
                Ok(()) => match run_decision(&decision, &instance, &existing_status, context).await {
                    Ok(desired) => desired,
                    Err(e) => state_machine::Desired::not_ready_from_error(
                        &e,
                        existing_status.session_id.clone(),
                        existing_status.optimization_result.clone(),
                    ),
                },
                Err(e) => state_machine::Desired::not_ready_from_error(
                    &e,
                    existing_status.session_id.clone(),
                    existing_status.optimization_result.clone(),
                ),
            }
        }
        Decision::StopExecution => {
            let session_id = existing_status.session_id.clone().ok_or(Error::StaleResource)?;
            match run_decision(&decision, &instance, &existing_status, context).await {
                Ok(desired) => desired,
                Err(e) => state_machine::Desired::not_ready_from_error(
                    &e,
                    Some(session_id),
                    existing_status.optimization_result.clone(),
                ),
            }
        }
    };

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&key.name, &key.namespace, decision_label(decision)])
        .observe(read_timer.elapsed().as_secs_f64());

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&key.name, &key.namespace, decision_label(decision)])
        .inc();

    if desired.state != current_state {
        println!(
            "🔧 {}{}{}{}{}",
            key.namespace.color(FG2),
            "/".color(FG1),
            key.name.color(FG2),
            " STATE: ".color(FG1),
            desired.state.to_string().color(FG2),
        );
    }

    // Benchmark the write phase of reconciliation. No timer for `Stay`: there
    // is nothing to write beyond a possible no-op status diff.
    #[cfg(feature = "metrics")]
    let write_timer = match decision {
        Decision::Stay => None,
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&key.name, &key.namespace, decision_label(decision)])
                .start_timer(),
        ),
    };

    let now = chrono::Utc::now().to_rfc3339();
    let status = status::build_active_status(
        &existing_status,
        &desired,
        &warnings,
        instance.meta().generation,
        &now,
    );
    let _ = util::patch::patch_status(context.client.clone(), &instance, status).await?;

    if state_machine::consumes_annotation(annotation_value, decision) {
        util::patch::remove_annotation(context.client.clone(), &instance, REBALANCE_ANNOTATION).await?;
    }

    #[cfg(feature = "metrics")]
    if let Some(timer) = write_timer {
        timer.observe_duration();
    }

    match desired.state {
        rebalance_types::RebalanceState::PendingProposal | rebalance_types::RebalanceState::Rebalancing => {
            context.polls.ensure_started(key.clone()).await;
            Ok(Action::await_change())
        }
        _ => {
            context.polls.cancel(key).await;
            Ok(Action::requeue(PROBE_INTERVAL))
        }
    }
}

async fn run_decision(
    decision: &Decision,
    instance: &KafkaRebalance,
    existing_status: &rebalance_types::KafkaRebalanceStatus,
    context: &ReconcilerContext,
) -> Result<state_machine::Desired, Error> {
    match decision {
        Decision::RequestDryRun => {
            state_machine::request_dry_run(context.optimization_client.as_ref(), &instance.spec).await
        }
        Decision::Execute => state_machine::execute(context.optimization_client.as_ref(), &instance.spec).await,
        Decision::StopExecution => {
            let session_id = existing_status.session_id.as_deref().ok_or(Error::StaleResource)?;
            state_machine::stop_execution(context.optimization_client.as_ref(), session_id).await
        }
        Decision::Stay | Decision::CancelPolling => unreachable!("handled by the caller"),
    }
}

#[cfg(feature = "metrics")]
fn decision_label(decision: Decision) -> &'static str {
    match decision {
        Decision::Stay => "Stay",
        Decision::RequestDryRun => "RequestDryRun",
        Decision::Execute => "Execute",
        Decision::CancelPolling => "CancelPolling",
        Decision::StopExecution => "StopExecution",
    }
}

/// Error policy for the controller: logs and requeues shortly after.
fn on_error(instance: Arc<KafkaRebalance>, error: &Error, _context: Arc<ReconcilerContext>) -> Action {
    eprintln!(
        "{}",
        format!("Reconciliation error: {:?} {:?}", error, instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}
