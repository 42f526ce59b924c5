use hyper::{
    Body, Request, Response, Server,
    service::{make_service_fn, service_fn},
};
use lazy_static::lazy_static;
use owo_colors::OwoColorize;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

/// Per-controller Prometheus collectors, labeled the way
/// `rebalance::reconcile` logs its own action-change lines: by resource
/// name, namespace, and (where relevant) the action taken.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
    pub poll_tick_counter: IntCounterVec,
    pub lock_timeout_counter: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let reconcile_counter = IntCounterVec::new(
            Opts::new("reconcile_total", "Total reconciliations").subsystem(subsystem),
            &["name", "namespace"],
        )
        .unwrap();
        let action_counter = IntCounterVec::new(
            Opts::new("reconcile_action_total", "Reconciliation actions taken")
                .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let read_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "reconcile_read_seconds",
                "Time spent determining the next action",
            )
            .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let write_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "reconcile_write_seconds",
                "Time spent performing an action",
            )
            .subsystem(subsystem),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let poll_tick_counter = IntCounterVec::new(
            Opts::new("poll_ticks_total", "Poll timer ticks against the optimization service")
                .subsystem(subsystem),
            &["name", "namespace"],
        )
        .unwrap();
        let lock_timeout_counter = IntCounterVec::new(
            Opts::new("lock_timeouts_total", "Per-resource lock acquisition timeouts")
                .subsystem(subsystem),
            &["name", "namespace"],
        )
        .unwrap();

        for collector in [
            Box::new(reconcile_counter.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(action_counter.clone()),
            Box::new(read_histogram.clone()),
            Box::new(write_histogram.clone()),
            Box::new(poll_tick_counter.clone()),
            Box::new(lock_timeout_counter.clone()),
        ] {
            REGISTRY.register(collector).ok();
        }

        ControllerMetrics {
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
            poll_tick_counter,
            lock_timeout_counter,
        }
    }
}

async fn serve(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .unwrap();
    Ok(Response::new(Body::from(buffer)))
}

/// Runs the `/metrics` scrape endpoint until the process exits. Intended to
/// be spawned once from `main` when `--metrics-port` is set.
pub async fn run_server(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        port.to_string().green().dimmed(),
    );
    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve)) });
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        eprintln!("{}", format!("metrics server error: {e}").red());
    }
}
