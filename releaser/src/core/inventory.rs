//! Role → host mapping supplied by configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("no hosts left after resolving roles [{}]", .0.join(", "))]
    NoHosts(Vec<String>),
}

/// Static role membership. Never mutated by lifecycle operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl Inventory {
    pub fn new(roles: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { roles }
    }

    /// Union of the hosts in `roles`, minus every host in `exclude`.
    ///
    /// Hosts come back sorted and deduplicated so fan-out reports are stable.
    pub fn hosts_in_roles<S: AsRef<str>>(
        &self,
        roles: &[S],
        exclude: &[S],
    ) -> Result<Vec<String>, InventoryError> {
        let included = self.union(roles)?;
        let excluded = self.union(exclude)?;
        let hosts: Vec<String> = included.difference(&excluded).cloned().collect();
        if hosts.is_empty() {
            let names = roles.iter().map(|r| r.as_ref().to_string()).collect();
            return Err(InventoryError::NoHosts(names));
        }
        Ok(hosts)
    }

    fn union<S: AsRef<str>>(&self, roles: &[S]) -> Result<BTreeSet<String>, InventoryError> {
        let mut hosts = BTreeSet::new();
        for role in roles.iter().map(AsRef::<str>::as_ref) {
            let members = self
                .roles
                .get(role)
                .ok_or_else(|| InventoryError::UnknownRole(role.to_string()))?;
            hosts.extend(members.iter().cloned());
        }
        Ok(hosts)
    }
}
