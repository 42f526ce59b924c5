use kube::{Client, ResourceExt};
use rebalance_types::{CLUSTER_LABEL, Kafka, KafkaRebalance};
use regex::Regex;

use crate::util::{self, Error};

/// Annotation keys that used to drive rebalance behavior in older Strimzi
/// releases and are now silently ignored. Flagged as a warning rather than
/// an error so upgrades don't fail a resource outright.
const DEPRECATED_SILENCE_ANNOTATION: &str = "strimzi.io/silent-rebalance";

/// Non-fatal checks surfaced as `Warning` conditions (§5's validation note):
/// a malformed `excludedTopics` regex, or use of a deprecated annotation.
/// Returns `(reason, message)` pairs.
pub fn collect_warnings(instance: &KafkaRebalance) -> Vec<(String, String)> {
    let mut warnings = Vec::new();

    if let Some(pattern) = &instance.spec.excluded_topics {
        if let Err(e) = Regex::new(pattern) {
            warnings.push((
                "InvalidExcludedTopics".to_string(),
                format!("spec.excludedTopics is not a valid regular expression: {e}"),
            ));
        }
    }

    if instance.annotations().contains_key(DEPRECATED_SILENCE_ANNOTATION) {
        warnings.push((
            "DeprecatedAnnotation".to_string(),
            format!("the '{DEPRECATED_SILENCE_ANNOTATION}' annotation is deprecated and has no effect"),
        ));
    }

    warnings
}

/// Fatal pre-flight checks (§4.1, §7's ValidationError): the resource must
/// carry the cluster label, the referenced `Kafka` cluster must exist in
/// the same namespace, and it must declare the optimization service.
/// Gated to decisions that actually reach the optimization service
/// ([`super::state_machine::Decision::RequestDryRun`] and `Execute`) — a
/// `stop` against a resource whose cluster reference has since broken must
/// still be allowed to succeed.
pub async fn verify_cluster(client: Client, instance: &KafkaRebalance) -> Result<(), Error> {
    let namespace = instance.namespace().ok_or(Error::StaleResource)?;
    let cluster_name = instance
        .labels()
        .get(CLUSTER_LABEL)
        .ok_or_else(|| Error::Validation(format!("missing required label '{CLUSTER_LABEL}'")))?;

    let cluster: Kafka = util::get_optional(client, &namespace, cluster_name)
        .await?
        .ok_or_else(|| {
            Error::Validation(format!(
                "referenced Kafka cluster '{cluster_name}' does not exist in namespace '{namespace}'"
            ))
        })?;

    if cluster.spec.cruise_control.is_none() {
        return Err(Error::Validation(format!(
            "Kafka cluster '{cluster_name}' does not declare the optimization service (spec.cruiseControl)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use rebalance_types::KafkaRebalanceSpec;
    use std::collections::BTreeMap;

    fn instance_with_excluded_topics(pattern: Option<&str>) -> KafkaRebalance {
        KafkaRebalance {
            metadata: ObjectMeta::default(),
            spec: KafkaRebalanceSpec {
                excluded_topics: pattern.map(str::to_string),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn no_warnings_for_a_clean_resource() {
        let instance = instance_with_excluded_topics(None);
        assert!(collect_warnings(&instance).is_empty());
    }

    #[test]
    fn valid_regex_produces_no_warning() {
        let instance = instance_with_excluded_topics(Some("^__.*"));
        assert!(collect_warnings(&instance).is_empty());
    }

    #[test]
    fn invalid_regex_produces_a_warning() {
        let instance = instance_with_excluded_topics(Some("("));
        let warnings = collect_warnings(&instance);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, "InvalidExcludedTopics");
    }

    #[test]
    fn deprecated_annotation_produces_a_warning() {
        let mut instance = instance_with_excluded_topics(None);
        let mut annotations = BTreeMap::new();
        annotations.insert(DEPRECATED_SILENCE_ANNOTATION.to_string(), "true".to_string());
        instance.metadata.annotations = Some(annotations);
        let warnings = collect_warnings(&instance);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, "DeprecatedAnnotation");
    }
}
