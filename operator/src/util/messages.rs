/// User-friendly message written whenever reconciliation is paused by the
/// pause annotation (§4.1).
pub const PAUSED: &str = "Reconciliation is paused by the pause-reconciliation annotation.";

/// User-friendly message used on [`crate::util::Error::StaleResource`] — this
/// is logged only, never written to status, since the resource no longer
/// exists to write to.
pub const STALE_RESOURCE: &str = "Resource disappeared mid-reconciliation; no-op.";
