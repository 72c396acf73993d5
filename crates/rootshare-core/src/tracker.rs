use rootshare_store::{RootScope, StoreError, StoreTx};

/// Read-only liveness queries over one open transaction.
///
/// Liveness is recomputed from the two container tables on every call; no
/// counter is cached anywhere.
pub struct RootTracker<'a, 'conn> {
    tx: &'a StoreTx<'conn>,
}

impl<'a, 'conn> RootTracker<'a, 'conn> {
    pub fn new(tx: &'a StoreTx<'conn>) -> Self {
        Self { tx }
    }

    /// Whether any container or placeholder still references `scope`.
    pub fn is_root_live(&self, scope: &RootScope) -> Result<bool, StoreError> {
        Ok(self.reference_count(scope)? > 0)
    }

    /// Rows across both container tables referencing `scope`.
    pub fn reference_count(&self, scope: &RootScope) -> Result<usize, StoreError> {
        let (active, destroyed) = self.tx.scope_members(scope)?;
        Ok(active.len() + destroyed.len())
    }

    /// Active containers only. Placeholders are kept exactly while this is non-zero.
    pub fn active_count(&self, scope: &RootScope) -> Result<usize, StoreError> {
        let (active, _) = self.tx.scope_members(scope)?;
        Ok(active.len())
    }
}
