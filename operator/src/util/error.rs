/// Taxonomy of error kinds (§7). Every variant that can arise inside a
/// reconciliation is folded into a status condition before it ever reaches
/// the `Controller`'s error policy — see [`crate::rebalance::reconcile`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    /// ValidationError (§7): missing cluster label, missing cluster, or a
    /// cluster that does not declare the optimization service.
    #[error("Invalid user input: {0}")]
    Validation(String),

    /// TransportError (§7): network failure or timeout talking to the
    /// optimization service.
    #[error("Transport error talking to the optimization service: {0}")]
    Transport(String),

    /// ProtocolError (§7): the optimization service returned a malformed or
    /// unexpected response body.
    #[error("Malformed response from the optimization service: {0}")]
    Protocol(String),

    /// ConcurrencyError (§7): the per-resource lock could not be acquired
    /// within `LOCK_TIMEOUT_MS`.
    #[error("Timed out acquiring the per-resource lock after {0:?}")]
    Concurrency(std::time::Duration),

    /// StaleResourceError (§7): the resource disappeared mid-reconcile.
    #[error("Resource disappeared mid-reconciliation")]
    StaleResource,

    /// Internal data-model violation (§3): more than one status condition
    /// carries a state-name `type`.
    #[error("Resource status carries more than one state condition")]
    AmbiguousState,

    #[error("Failed to parse DateTime: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },
}

impl Error {
    /// A short machine-readable reason string, used as `condition.reason`
    /// when this error becomes a `NotReady` status.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "KubernetesError",
            Error::Validation(_) => "ValidationError",
            Error::Transport(_) => "TransportError",
            Error::Protocol(_) => "ProtocolError",
            Error::Concurrency(_) => "ConcurrencyError",
            Error::StaleResource => "StaleResource",
            Error::AmbiguousState => "AmbiguousState",
            Error::Chrono { .. } => "TimestampError",
            Error::Json { .. } => "SerializationError",
            Error::ParseDuration { .. } => "ConfigError",
        }
    }
}
