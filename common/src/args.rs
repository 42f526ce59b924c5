use clap::Parser;

/// Tunables of the rebalance-orchestration subsystem (§6). All of them have
/// sane defaults so the operator runs out of the box; every one can also be
/// set via environment variable, which is how the Helm chart wires them up.
#[derive(Parser, Debug, Clone)]
pub struct RebalanceArgs {
    /// Base URL of the Cruise Control REST API.
    #[arg(
        long,
        env = "CRUISE_CONTROL_URL",
        default_value = "http://cruise-control:9090"
    )]
    pub cruise_control_url: String,

    /// Per-request timeout against the optimization service.
    #[arg(long, env = "CRUISE_CONTROL_TIMEOUT_MS", default_value_t = 30_000)]
    pub cruise_control_timeout_ms: u64,

    /// Period of the polling timer that re-checks a pending proposal or an
    /// in-progress rebalance (§4.2). Fixed at 5000ms by the spec, but kept
    /// configurable for tests.
    #[arg(long, env = "REBALANCE_POLLING_TIMER_MS", default_value_t = 5_000)]
    pub polling_timer_ms: u64,

    /// Consecutive transport-error cap before a poll sequence fails with
    /// `NotReady` (§4.1, §7).
    #[arg(long, env = "REBALANCE_MAX_API_RETRIES", default_value_t = 5)]
    pub max_api_retries: u32,

    /// Timeout for acquiring the per-resource lock before an event is
    /// dropped (§4.4).
    #[arg(long, env = "REBALANCE_LOCK_TIMEOUT_MS", default_value_t = 10_000)]
    pub lock_timeout_ms: u64,

    /// Label selector restricting which `KafkaRebalance` resources this
    /// controller watches (§4.5). Unset means "watch every namespace".
    #[arg(long, env = "REBALANCE_LABEL_SELECTOR")]
    pub label_selector: Option<String>,
}
