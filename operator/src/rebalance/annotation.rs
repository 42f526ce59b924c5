use rebalance_types::{Annotation, REBALANCE_ANNOTATION};
use std::collections::BTreeMap;

/// Decodes the control annotation (§6) into the alphabet consumed by the
/// state machine.
pub fn decode(annotations: Option<&BTreeMap<String, String>>) -> Annotation {
    match annotations.and_then(|a| a.get(REBALANCE_ANNOTATION)) {
        None => Annotation::None,
        Some(value) => match value.as_str() {
            "approve" => Annotation::Approve,
            "refresh" => Annotation::Refresh,
            "stop" => Annotation::Stop,
            _ => Annotation::Unknown,
        },
    }
}
