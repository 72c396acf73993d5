use crate::containers::RootScope;
use crate::db::StoreTx;
use crate::schema::PACKAGE_COLUMNS;
use crate::StoreError;
use regex::Regex;
use rootshare_schema::{ContainerName, PackageName, SharedRoot};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A package the user installed explicitly into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: PackageName,
    pub container: ContainerName,
    pub shared_root: Option<SharedRoot>,
    /// Wrapper files (desktop entries, launchers) created on the host for this package.
    pub local_copies: Vec<String>,
    /// Empty for a plain install, `optional(<parent>)` for an optional dependency.
    pub package_type: String,
}

impl PackageRecord {
    pub fn new(
        name: impl Into<PackageName>,
        container: impl Into<ContainerName>,
        shared_root: Option<SharedRoot>,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            shared_root,
            local_copies: Vec::new(),
            package_type: String::new(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let copies: String = row.get(3)?;
        Ok(Self {
            name: PackageName::new(row.get::<_, String>(0)?),
            container: ContainerName::new(row.get::<_, String>(1)?),
            shared_root: SharedRoot::from_column(row.get(2)?),
            local_copies: copies
                .split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect(),
            package_type: row.get(4)?,
        })
    }
}

/// Filters for [`StoreTx::list_packages`]. `name` is a regular expression
/// searched for anywhere in the package name (anchor it with `^...$` for an
/// exact match); `package_type` is an SQL `LIKE` pattern.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub container: Option<String>,
    pub shared_root: Option<String>,
    pub name: Option<String>,
    pub package_type: Option<String>,
}

impl StoreTx<'_> {
    /// Record an explicit install, replacing any previous entry for the same
    /// `(package, container)`. On a shared root, stale entries for the same
    /// package left behind by destroyed placeholders on that root are dropped.
    pub fn register_package(&self, record: &PackageRecord) -> Result<(), StoreError> {
        let root = SharedRoot::to_column(record.shared_root.as_ref());
        self.conn().execute(
            "DELETE FROM packages WHERE name = ?1 AND container = ?2",
            params![record.name.as_str(), record.container.as_str()],
        )?;
        if let Some(shared) = &record.shared_root {
            let stale = self.unregister_placeholder_package(shared, &record.name)?;
            if !stale.is_empty() {
                debug!("dropped {} stale registrations of {}", stale.len(), record.name);
            }
        }
        self.conn().execute(
            &format!("INSERT INTO packages ({PACKAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                record.name.as_str(),
                record.container.as_str(),
                root,
                record.local_copies.join(","),
                record.package_type,
            ],
        )?;
        debug!("registered package {} in {}", record.name, record.container);
        Ok(())
    }

    /// Drop the registration of `package` in `container`, returning it.
    pub fn unregister_package(
        &self,
        container: &str,
        package: &str,
    ) -> Result<Option<PackageRecord>, StoreError> {
        let record = self
            .conn()
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE name = ?1 AND container = ?2"),
                params![package, container],
                PackageRecord::from_row,
            )
            .optional()?;
        if record.is_some() {
            self.conn().execute(
                "DELETE FROM packages WHERE name = ?1 AND container = ?2",
                params![package, container],
            )?;
            debug!("unregistered package {package} from {container}");
        }
        Ok(record)
    }

    /// Drop every registration of `package` owned by a destroyed placeholder
    /// on `root`, returning them.
    pub fn unregister_placeholder_package(
        &self,
        root: &SharedRoot,
        package: &str,
    ) -> Result<Vec<PackageRecord>, StoreError> {
        const OWNED_BY_PLACEHOLDER: &str = "name = ?1 AND shared_root = ?2
             AND container IN (SELECT name FROM destroyed_containers WHERE shared_root = ?2)";
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE {OWNED_BY_PLACEHOLDER} ORDER BY container"
        ))?;
        let records = stmt
            .query_map(params![package, root.as_str()], PackageRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.conn().execute(
            &format!("DELETE FROM packages WHERE {OWNED_BY_PLACEHOLDER}"),
            params![package, root.as_str()],
        )?;
        Ok(records)
    }

    pub fn packages_of_container(&self, container: &str) -> Result<Vec<PackageRecord>, StoreError> {
        self.list_package_records(&PackageFilter {
            container: Some(container.to_owned()),
            ..PackageFilter::default()
        })
    }

    /// Delete every registration owned by `container`, returning them.
    pub fn delete_packages_for_container(
        &self,
        container: &str,
    ) -> Result<Vec<PackageRecord>, StoreError> {
        let records = self.packages_of_container(container)?;
        self.conn()
            .execute("DELETE FROM packages WHERE container = ?1", [container])?;
        Ok(records)
    }

    /// Move registrations from one owner name to another (a recreated container
    /// taking over its placeholder's packages).
    pub fn rehome_packages(&self, from: &str, to: &str) -> Result<usize, StoreError> {
        let moved = self.conn().execute(
            "UPDATE OR REPLACE packages SET container = ?2 WHERE container = ?1",
            params![from, to],
        )?;
        Ok(moved)
    }

    /// Whether any member of `scope` still has `package` registered.
    pub fn is_package_on_root(&self, scope: &RootScope, package: &str) -> Result<bool, StoreError> {
        let (sql, arg) = match scope {
            RootScope::Shared(root) => (
                "SELECT 1 FROM packages WHERE name = ?1 AND shared_root = ?2 LIMIT 1",
                root.as_str(),
            ),
            RootScope::Private(name) => (
                "SELECT 1 FROM packages WHERE name = ?1 AND container = ?2 LIMIT 1",
                name.as_str(),
            ),
        };
        let found: Option<i64> = self
            .conn()
            .query_row(sql, params![package, arg], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Full registration rows matching `filter`, ordered by package then container.
    pub fn list_package_records(
        &self,
        filter: &PackageFilter,
    ) -> Result<Vec<PackageRecord>, StoreError> {
        let name_re = filter
            .name
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        for (clause, value) in [
            ("container = ?", &filter.container),
            ("shared_root = ?", &filter.shared_root),
            ("package_type LIKE ?", &filter.package_type),
        ] {
            if let Some(value) = value {
                args.push(value.clone());
                clauses.push(format!("{clause}{}", args.len()));
            }
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM packages{where_clause} ORDER BY name, container");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), PackageRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if name_re.as_ref().map_or(true, |re| re.is_match(&record.name)) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Distinct package names matching `filter`.
    pub fn list_packages(&self, filter: &PackageFilter) -> Result<Vec<PackageName>, StoreError> {
        let mut names: Vec<PackageName> = self
            .list_package_records(filter)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.dedup();
        Ok(names)
    }
}
