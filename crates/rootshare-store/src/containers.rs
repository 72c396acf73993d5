use crate::db::StoreTx;
use crate::schema::CONTAINER_COLUMNS;
use crate::StoreError;
use rootshare_schema::{ContainerName, Distribution, SharedRoot};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub fn validate_container_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > 64 {
        return Err(StoreError::InvalidName(
            "container name must be 1-64 characters".to_owned(),
        ));
    }
    if name.starts_with('-') {
        return Err(StoreError::InvalidName(
            "container name must not start with '-'".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(StoreError::InvalidName(
            "container name must match [a-zA-Z0-9_.-]".to_owned(),
        ));
    }
    Ok(())
}

/// One row of `containers` or `destroyed_containers`; both tables share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: ContainerName,
    pub distribution: Distribution,
    pub shared_root: Option<SharedRoot>,
    pub configuration: String,
}

impl ContainerRecord {
    pub fn new(
        name: impl Into<ContainerName>,
        distribution: impl Into<Distribution>,
        shared_root: Option<SharedRoot>,
        configuration: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            distribution: distribution.into(),
            shared_root,
            configuration: configuration.into(),
        }
    }

    pub fn scope(&self) -> RootScope {
        match &self.shared_root {
            Some(root) => RootScope::Shared(root.clone()),
            None => RootScope::Private(self.name.clone()),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: ContainerName::new(row.get::<_, String>(0)?),
            distribution: Distribution::new(row.get::<_, String>(1)?),
            shared_root: SharedRoot::from_column(row.get(2)?),
            configuration: row.get(3)?,
        })
    }
}

/// The set of containers whose bookkeeping is counted together: everyone on a
/// shared root, or a single container with a private root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum RootScope {
    Shared(SharedRoot),
    Private(ContainerName),
}

impl RootScope {
    /// Stable key used for lock files and logs.
    pub fn key(&self) -> String {
        match self {
            RootScope::Shared(root) => format!("root:{root}"),
            RootScope::Private(name) => format!("private:{name}"),
        }
    }

    pub fn shared_root(&self) -> Option<&SharedRoot> {
        match self {
            RootScope::Shared(root) => Some(root),
            RootScope::Private(_) => None,
        }
    }
}

impl fmt::Display for RootScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootScope::Shared(root) => write!(f, "{root}"),
            RootScope::Private(name) => write!(f, "<private:{name}>"),
        }
    }
}

/// Optional equality filters for container listings.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    pub name: Option<String>,
    pub distribution: Option<String>,
    pub shared_root: Option<String>,
}

impl ContainerFilter {
    pub fn by_root(root: &SharedRoot) -> Self {
        Self {
            shared_root: Some(root.to_string()),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        for (column, value) in [
            ("name", &self.name),
            ("distribution", &self.distribution),
            ("shared_root", &self.shared_root),
        ] {
            if let Some(value) = value {
                args.push(value.clone());
                clauses.push(format!("{column} = ?{}", args.len()));
            }
        }
        if clauses.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), args)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Table {
    Active,
    Destroyed,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Active => "containers",
            Table::Destroyed => "destroyed_containers",
        }
    }
}

impl StoreTx<'_> {
    fn get_from(&self, table: Table, name: &str) -> Result<Option<ContainerRecord>, StoreError> {
        let sql = format!(
            "SELECT {CONTAINER_COLUMNS} FROM {} WHERE name = ?1",
            table.name()
        );
        let record = self
            .conn()
            .query_row(&sql, [name], ContainerRecord::from_row)
            .optional()?;
        Ok(record)
    }

    fn list_from(
        &self,
        table: Table,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRecord>, StoreError> {
        let (where_clause, args) = filter.where_clause();
        let sql = format!(
            "SELECT {CONTAINER_COLUMNS} FROM {}{where_clause} ORDER BY name",
            table.name()
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), ContainerRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_into(&self, table: Table, record: &ContainerRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} ({CONTAINER_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                distribution = excluded.distribution,
                shared_root = excluded.shared_root,
                configuration = excluded.configuration",
            table.name()
        );
        self.conn().execute(
            &sql,
            params![
                record.name.as_str(),
                record.distribution.as_str(),
                SharedRoot::to_column(record.shared_root.as_ref()),
                record.configuration,
            ],
        )?;
        Ok(())
    }

    pub fn get_container(&self, name: &str) -> Result<Option<ContainerRecord>, StoreError> {
        self.get_from(Table::Active, name)
    }

    pub fn get_destroyed(&self, name: &str) -> Result<Option<ContainerRecord>, StoreError> {
        self.get_from(Table::Destroyed, name)
    }

    /// Active container or [`StoreError::UnknownContainer`].
    pub fn require_container(&self, name: &str) -> Result<ContainerRecord, StoreError> {
        self.get_container(name)?
            .ok_or_else(|| StoreError::UnknownContainer(name.to_owned()))
    }

    pub fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRecord>, StoreError> {
        self.list_from(Table::Active, filter)
    }

    pub fn list_destroyed(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerRecord>, StoreError> {
        self.list_from(Table::Destroyed, filter)
    }

    pub fn list_containers_by_root(
        &self,
        root: &SharedRoot,
    ) -> Result<Vec<ContainerRecord>, StoreError> {
        self.list_from(Table::Active, &ContainerFilter::by_root(root))
    }

    pub fn list_destroyed_by_root(
        &self,
        root: &SharedRoot,
    ) -> Result<Vec<ContainerRecord>, StoreError> {
        self.list_from(Table::Destroyed, &ContainerFilter::by_root(root))
    }

    /// Every container and placeholder counted in `scope`, as `(active, destroyed)`.
    pub fn scope_members(
        &self,
        scope: &RootScope,
    ) -> Result<(Vec<ContainerRecord>, Vec<ContainerRecord>), StoreError> {
        match scope {
            RootScope::Shared(root) => Ok((
                self.list_containers_by_root(root)?,
                self.list_destroyed_by_root(root)?,
            )),
            RootScope::Private(name) => Ok((
                self.get_container(name)?.into_iter().collect(),
                self.get_destroyed(name)?.into_iter().collect(),
            )),
        }
    }

    /// Insert a container, or replace the row of the same name.
    pub fn upsert_container(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        self.insert_into(Table::Active, record)?;
        debug!("upserted container {} (root {})", record.name, record.scope());
        Ok(())
    }

    /// Remove an active container row outright.
    pub fn delete_container(&self, name: &str) -> Result<ContainerRecord, StoreError> {
        let record = self.require_container(name)?;
        self.conn()
            .execute("DELETE FROM containers WHERE name = ?1", [name])?;
        debug!("deleted container row {name}");
        Ok(record)
    }

    /// Replace an active container row by an identical placeholder row.
    /// Both statements run in the caller's transaction, so either both
    /// happen or neither does.
    pub fn move_container_to_destroyed(&self, name: &str) -> Result<ContainerRecord, StoreError> {
        let record = self.require_container(name)?;
        self.insert_into(Table::Destroyed, &record)?;
        self.conn()
            .execute("DELETE FROM containers WHERE name = ?1", [name])?;
        debug!("moved container {name} to destroyed placeholders");
        Ok(record)
    }

    /// Delete a placeholder row. Returns whether a row existed.
    pub fn delete_destroyed(&self, name: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM destroyed_containers WHERE name = ?1", [name])?;
        if deleted > 0 {
            debug!("purged destroyed placeholder {name}");
        }
        Ok(deleted > 0)
    }

    pub fn update_configuration(&self, name: &str, configuration: &str) -> Result<(), StoreError> {
        let updated = self.conn().execute(
            "UPDATE containers SET configuration = ?2 WHERE name = ?1",
            params![name, configuration],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownContainer(name.to_owned()));
        }
        Ok(())
    }

    /// Every distinct shared root referenced by either container table.
    pub fn known_roots(&self) -> Result<Vec<SharedRoot>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT shared_root FROM containers WHERE shared_root != ''
             UNION
             SELECT shared_root FROM destroyed_containers WHERE shared_root != ''
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut roots = Vec::new();
        for row in rows {
            roots.push(SharedRoot::new(row?));
        }
        Ok(roots)
    }
}
