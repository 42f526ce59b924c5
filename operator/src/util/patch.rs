use super::{Error, MANAGER_NAME};
use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use rebalance_types::KafkaRebalance;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use std::{clone::Clone, fmt::Debug};

/// Writes the desired `status` document for a [`KafkaRebalance`] via a JSON
/// patch, eliding the API call entirely when `desired` is byte-identical to
/// the resource's current status (§4.3: "a diff check elides the write").
///
/// Returns `Ok(None)` when no write was necessary.
pub async fn patch_status(
    client: Client,
    instance: &KafkaRebalance,
    desired: rebalance_types::KafkaRebalanceStatus,
) -> Result<Option<KafkaRebalance>, Error> {
    if instance.status.as_ref() == Some(&desired) {
        return Ok(None);
    }
    let mut modified = instance.clone();
    modified.status = Some(desired);
    let patch = Patch::Json::<KafkaRebalance>(json_patch::diff(
        &serde_json::to_value(instance).unwrap(),
        &serde_json::to_value(&modified).unwrap(),
    ));
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<KafkaRebalance> = Api::namespaced(client, namespace);
    let result = api
        .patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await?;
    Ok(Some(result))
}

/// Removes a single metadata annotation with a JSON merge patch. Not atomic
/// with `patch_status` — see §9's note on why this is safe.
pub async fn remove_annotation<T>(client: Client, instance: &T, key: &str) -> Result<(), Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug,
{
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let patch = json!({
        "metadata": {
            "annotations": {
                key: serde_json::Value::Null,
            }
        }
    });
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
