use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const DB_FILE: &str = "state.db";

/// Directory layout of a rootshare data directory.
///
/// ```text
/// <root>/state.db        SQLite bookkeeping database
/// <root>/journal/        pending external-call intents
/// <root>/locks/          one lock file per root scope
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Lock file guarding every mutation on one root scope. The file name is
    /// derived from the scope key so arbitrary root paths map onto flat names.
    pub fn root_lock_file(&self, scope_key: &str) -> PathBuf {
        let hash = blake3::hash(scope_key.as_bytes()).to_hex();
        self.locks_dir().join(format!("{}.lock", &hash[..32]))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.journal_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();

        assert!(layout.journal_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert_eq!(layout.db_path(), dir.path().join("state.db"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("data"));
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.root().is_dir());
    }

    #[test]
    fn lock_files_are_per_scope() {
        let layout = StoreLayout::new("/tmp/rootshare");
        let a = layout.root_lock_file("root:/srv/roots/arch");
        let b = layout.root_lock_file("root:/srv/roots/fedora");
        assert_ne!(a, b);
        assert_eq!(a, layout.root_lock_file("root:/srv/roots/arch"));
        assert!(a.starts_with(layout.locks_dir()));
        assert_eq!(a.extension().unwrap(), "lock");
    }
}
