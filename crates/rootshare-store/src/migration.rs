//! Named, additive schema migrations.
//!
//! Each [`Migration`] is identified by a dotted numeric version string and is
//! applied in ascending order. The singleton `schema_version` row records the
//! last applied version; a migration whose version is not greater than the
//! recorded one is skipped, so re-running detection is always safe.

use crate::schema;
use crate::StoreError;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "1",
        name: "container-tables",
        sql: schema::CONTAINER_TABLES,
    },
    Migration {
        version: "2",
        name: "package-registry",
        sql: schema::PACKAGES_TABLE,
    },
    Migration {
        version: "3",
        name: "root-indexes",
        sql: schema::ROOT_INDEXES,
    },
];

/// Result of a successful migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub from_version: Option<String>,
    pub to_version: String,
    pub applied: Vec<String>,
    pub backup_path: Option<PathBuf>,
}

/// Version the running binary expects the database to be at.
pub fn latest_version() -> &'static str {
    MIGRATIONS.last().map_or("0", |m| m.version)
}

/// Compare two dotted numeric versions component-wise; missing components
/// count as zero, so `"2"` equals `"2.0"`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub(crate) fn read_version(conn: &Connection) -> Result<Option<String>, StoreError> {
    conn.execute_batch(schema::SCHEMA_VERSION_TABLE)?;
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version)
}

/// Refuse a database whose recorded version differs from [`latest_version`].
pub(crate) fn ensure_current(found: &str) -> Result<(), StoreError> {
    if compare_versions(found, latest_version()) == Ordering::Equal {
        Ok(())
    } else {
        Err(StoreError::SchemaVersionMismatch {
            expected: latest_version().to_owned(),
            found: found.to_owned(),
        })
    }
}

fn write_version(conn: &Connection, version: &str) -> Result<(), StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at",
        rusqlite::params![version, now],
    )?;
    Ok(())
}

/// Apply every migration newer than `from`. The caller owns the transaction.
pub(crate) fn apply_pending(
    conn: &Connection,
    from: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    if let Some(found) = from {
        if compare_versions(found, latest_version()) == Ordering::Greater {
            return Err(StoreError::SchemaVersionMismatch {
                expected: latest_version().to_owned(),
                found: found.to_owned(),
            });
        }
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        if from.is_some_and(|f| compare_versions(f, migration.version) != Ordering::Less) {
            debug!(
                "skipping migration {} ({}): already applied",
                migration.version, migration.name
            );
            continue;
        }
        conn.execute_batch(migration.sql)?;
        write_version(conn, migration.version)?;
        info!(
            "applied schema migration {} ({})",
            migration.version, migration.name
        );
        applied.push(migration.name.to_owned());
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(compare_versions("2", "10"), Ordering::Less);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("3", "3.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.9.1", "1"), Ordering::Less);
    }

    #[test]
    fn migrations_are_ascending() {
        for pair in MIGRATIONS.windows(2) {
            assert_eq!(
                compare_versions(pair[0].version, pair[1].version),
                Ordering::Less
            );
        }
        assert_eq!(latest_version(), "3");
    }

    #[test]
    fn fresh_database_applies_everything() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_version(&conn).unwrap(), None);
        let applied = apply_pending(&conn, None).unwrap();
        assert_eq!(applied.len(), MIGRATIONS.len());
        assert_eq!(read_version(&conn).unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn applied_migrations_are_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pending(&conn, None).unwrap();
        let applied = apply_pending(&conn, Some("3")).unwrap();
        assert!(applied.is_empty());
    }

    #[test]
    fn partial_database_only_gets_newer_steps() {
        let conn = Connection::open_in_memory().unwrap();
        read_version(&conn).unwrap();
        conn.execute_batch(schema::CONTAINER_TABLES).unwrap();
        write_version(&conn, "1").unwrap();

        let applied = apply_pending(&conn, Some("1")).unwrap();
        assert_eq!(applied, vec!["package-registry", "root-indexes"]);
    }

    #[test]
    fn newer_database_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        let err = apply_pending(&conn, Some("4")).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersionMismatch { .. }));
        assert!(ensure_current("2").is_err());
        assert!(ensure_current("3").is_ok());
    }
}
