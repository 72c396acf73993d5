use crate::CoreError;
use rootshare_store::{StoreError, StoreTx};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a container is in its life.
///
/// `Destroyed` containers no longer run but keep a placeholder row because
/// other containers still use their shared root. `Purged` is terminal: no
/// row exists in either table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Active,
    Destroyed,
    Purged,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Active => write!(f, "active"),
            ContainerState::Destroyed => write!(f, "destroyed"),
            ContainerState::Purged => write!(f, "purged"),
        }
    }
}

pub fn validate_transition(from: ContainerState, to: ContainerState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ContainerState::Active, ContainerState::Destroyed | ContainerState::Purged)
            | (ContainerState::Destroyed, ContainerState::Purged)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Current state of `name` as recorded in the store.
pub fn state_of(tx: &StoreTx<'_>, name: &str) -> Result<ContainerState, StoreError> {
    if tx.get_container(name)?.is_some() {
        Ok(ContainerState::Active)
    } else if tx.get_destroyed(name)?.is_some() {
        Ok(ContainerState::Destroyed)
    } else {
        Ok(ContainerState::Purged)
    }
}
