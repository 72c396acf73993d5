use crate::layout::StoreLayout;
use crate::migration::{self, MigrationResult};
use crate::StoreError;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::PathBuf;
use tracing::{debug, info};

/// SQLite-backed bookkeeping store.
///
/// The connection sits behind a `parking_lot::Mutex`; all reads and writes go
/// through [`Store::transaction`] or [`Store::read`], which hand out a
/// [`StoreTx`] carrying the typed query operations. Dropping a `StoreTx`
/// without committing rolls back, so an error anywhere inside the closure
/// leaves the database untouched.
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

/// An open transaction. Query operations are defined per table in the
/// `containers`, `dependencies` and `packages` modules.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl StoreTx<'_> {
    #[inline]
    pub(crate) fn conn(&self) -> &Connection {
        &self.tx
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=FULL;
        PRAGMA busy_timeout=5000;
        ",
    )?;
    Ok(())
}

impl Store {
    /// Open the database under `layout`, creating it on first use.
    ///
    /// A fresh database gets every migration applied. A database recorded at
    /// any other version than the current one is refused with
    /// [`StoreError::SchemaVersionMismatch`] until [`Store::migrate`] runs.
    pub fn open(layout: &StoreLayout) -> Result<Self, StoreError> {
        let store = Self::open_unchecked(layout)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Open without the version gate; used by `migrate` and diagnostics.
    pub fn open_unchecked(layout: &StoreLayout) -> Result<Self, StoreError> {
        layout.initialize()?;
        let path = layout.db_path();
        let conn = Connection::open(&path)?;
        configure(&conn)?;
        debug!("opened state database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// In-memory database at the current schema version.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        match migration::read_version(&conn)? {
            None => {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
                migration::apply_pending(&tx, None)?;
                tx.commit()?;
                info!(
                    "initialized state database at schema version {}",
                    migration::latest_version()
                );
                Ok(())
            }
            Some(found) => migration::ensure_current(&found),
        }
    }

    /// Version recorded in the singleton row, if any.
    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        migration::read_version(&conn)
    }

    /// Bring the database to the current schema version.
    ///
    /// Returns `Ok(None)` when nothing had to be done. File-backed databases
    /// are first copied to `state.db.backup.<timestamp>`.
    pub fn migrate(&self) -> Result<Option<MigrationResult>, StoreError> {
        let mut conn = self.conn.lock();
        let from = migration::read_version(&conn)?;
        if from
            .as_deref()
            .is_some_and(|v| migration::ensure_current(v).is_ok())
        {
            return Ok(None);
        }
        if let Some(found) = from.as_deref() {
            if migration::compare_versions(found, migration::latest_version()).is_gt() {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: migration::latest_version().to_owned(),
                    found: found.to_owned(),
                });
            }
        }

        let backup_path = match (&self.path, &from) {
            (Some(path), Some(_)) => {
                let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
                let backup = path.with_extension(format!("db.backup.{timestamp}"));
                conn.execute(
                    "VACUUM INTO ?1",
                    [backup.to_string_lossy().as_ref()],
                )?;
                info!("backed up state database to {}", backup.display());
                Some(backup)
            }
            _ => None,
        };

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let applied = migration::apply_pending(&tx, from.as_deref())?;
        tx.commit()?;

        let to_version = migration::latest_version().to_owned();
        info!(
            "migrated state database from {} to {to_version} ({} steps)",
            from.as_deref().unwrap_or("<none>"),
            applied.len()
        );
        Ok(Some(MigrationResult {
            from_version: from,
            to_version,
            applied,
            backup_path,
        }))
    }

    /// Run `f` inside a write transaction (`BEGIN IMMEDIATE`). The transaction
    /// commits only if `f` returns `Ok`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a read transaction, giving it a consistent snapshot.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn run<T, E, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StoreError::from)?;
        let store_tx = StoreTx { tx };
        let value = f(&store_tx)?;
        store_tx.tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_current_schema() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let store = Store::open(&layout).unwrap();
        assert_eq!(
            store.schema_version().unwrap().as_deref(),
            Some(migration::latest_version())
        );
        assert!(layout.db_path().exists());
    }

    #[test]
    fn reopen_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        drop(Store::open(&layout).unwrap());
        let store = Store::open(&layout).unwrap();
        assert_eq!(store.schema_version().unwrap().as_deref(), Some("3"));
        assert!(store.migrate().unwrap().is_none());
    }

    #[test]
    fn failed_closure_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.transaction(|tx| {
            tx.conn().execute(
                "INSERT INTO containers (name, distribution, shared_root, configuration)
                 VALUES ('a', 'arch', '', '{}')",
                [],
            )?;
            Err(StoreError::UnknownContainer("boom".to_owned()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .read(|tx| {
                tx.conn()
                    .query_row("SELECT COUNT(*) FROM containers", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn schema_version_singleton() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<usize, StoreError> = store.transaction(|tx| {
            Ok(tx.conn().execute(
                "INSERT INTO schema_version (id, version, updated_at) VALUES (2, '9', 'now')",
                [],
            )?)
        });
        assert!(result.is_err());
    }
}
