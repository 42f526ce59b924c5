use std::fmt;

/// Identity of a [`rebalance_types::KafkaRebalance`] resource (§3), used as
/// the key for the [`super::lock::LockRegistry`] and the
/// [`super::poll::PollController`]'s timer table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
