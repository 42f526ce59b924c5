use std::time::Duration;

use kube::{Api, Client, api::Resource, core::NamespaceResourceScope};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

pub(crate) mod colors;
pub(crate) mod messages;

mod error;

pub use error::*;

/// Default interval for requeuing a [`rebalance_types::KafkaRebalance`] that
/// requires no further action right now.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager used for server-side apply.
pub(crate) const MANAGER_NAME: &str = "rebalance-operator";

/// Re-reads a namespaced resource by name, folding a 404 into `Ok(None)`
/// instead of an error, since a watch event can easily race a delete.
pub async fn get_optional<T>(client: Client, namespace: &str, name: &str) -> Result<Option<T>, Error>
where
    T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    match api.get(name).await {
        Ok(resource) => Ok(Some(resource)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}
