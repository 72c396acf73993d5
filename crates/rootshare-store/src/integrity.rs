use crate::db::Store;
use crate::migration;
use crate::StoreError;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub schema_version: Option<String>,
    pub containers_checked: usize,
    pub destroyed_checked: usize,
    pub dependencies_checked: usize,
    pub packages_checked: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFailure {
    pub subject: String,
    pub reason: String,
}

fn count(conn: &Connection, table: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(usize::try_from(n).unwrap_or(0))
}

fn collect(
    conn: &Connection,
    sql: &str,
    reason: impl Fn(&str) -> String,
    failed: &mut Vec<IntegrityFailure>,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for subject in rows {
        let subject = subject?;
        failed.push(IntegrityFailure {
            reason: reason(&subject),
            subject,
        });
    }
    Ok(())
}

/// Check the cross-table invariants the bookkeeping relies on:
///
/// - the schema version is the one this binary expects;
/// - no name is both an active container and a destroyed placeholder;
/// - every dependency edge and package registration has a known owner;
/// - no placeholder sits on a root without an active container.
pub fn verify_store_integrity(store: &Store) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport {
        schema_version: store.schema_version()?,
        ..IntegrityReport::default()
    };

    match report.schema_version.as_deref() {
        None => report.failed.push(IntegrityFailure {
            subject: "schema_version".to_owned(),
            reason: "no schema version recorded".to_owned(),
        }),
        Some(found) => {
            if let Err(e) = migration::ensure_current(found) {
                report.failed.push(IntegrityFailure {
                    subject: "schema_version".to_owned(),
                    reason: e.to_string(),
                });
                return Ok(report);
            }
        }
    }

    store.read(|tx| {
        let conn = tx.conn();
        report.containers_checked = count(conn, "containers")?;
        report.destroyed_checked = count(conn, "destroyed_containers")?;
        report.dependencies_checked = count(conn, "package_deps")?;
        report.packages_checked = count(conn, "packages")?;

        collect(
            conn,
            "SELECT name FROM containers WHERE name IN (SELECT name FROM destroyed_containers)",
            |_| "name is both active and destroyed".to_owned(),
            &mut report.failed,
        )?;
        collect(
            conn,
            "SELECT DISTINCT container FROM package_deps
             WHERE container NOT IN (SELECT name FROM containers)
               AND container NOT IN (SELECT name FROM destroyed_containers)",
            |_| "dependency edges owned by an unknown container".to_owned(),
            &mut report.failed,
        )?;
        collect(
            conn,
            "SELECT DISTINCT container FROM packages
             WHERE container NOT IN (SELECT name FROM containers)
               AND container NOT IN (SELECT name FROM destroyed_containers)",
            |_| "packages registered to an unknown container".to_owned(),
            &mut report.failed,
        )?;
        collect(
            conn,
            "SELECT name FROM destroyed_containers d
             WHERE d.shared_root = ''
                OR NOT EXISTS (SELECT 1 FROM containers c WHERE c.shared_root = d.shared_root)",
            |name| format!("placeholder '{name}' has no active container on its root"),
            &mut report.failed,
        )?;
        Ok::<_, StoreError>(())
    })?;

    Ok(report)
}

impl crate::db::StoreTx<'_> {
    /// Delete dependency edges and package registrations whose owner is in
    /// neither container table. Returns `(edges, packages)` removed.
    pub fn delete_unowned_rows(&self) -> Result<(usize, usize), StoreError> {
        let edges = self.conn().execute(
            "DELETE FROM package_deps
             WHERE container NOT IN (SELECT name FROM containers)
               AND container NOT IN (SELECT name FROM destroyed_containers)",
            [],
        )?;
        let packages = self.conn().execute(
            "DELETE FROM packages
             WHERE container NOT IN (SELECT name FROM containers)
               AND container NOT IN (SELECT name FROM destroyed_containers)",
            [],
        )?;
        Ok((edges, packages))
    }

    /// Count the rows [`Self::delete_unowned_rows`] would remove.
    pub fn count_unowned_rows(&self) -> Result<(usize, usize), StoreError> {
        let count = |table: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn().query_row(
                &format!(
                    "SELECT COUNT(*) FROM {table}
                     WHERE container NOT IN (SELECT name FROM containers)
                       AND container NOT IN (SELECT name FROM destroyed_containers)"
                ),
                [],
                |r| r.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        };
        Ok((count("package_deps")?, count("packages")?))
    }
}
