use crate::containers::RootScope;
use crate::db::StoreTx;
use crate::StoreError;
use rootshare_schema::{ContainerName, DepType, PackageName, SharedRoot};
use rusqlite::{params, ErrorCode, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One `package_deps` row: `container`'s package `package` pulled in `dependency`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub package: PackageName,
    pub container: ContainerName,
    pub dependency: PackageName,
    pub dep_type: DepType,
}

impl DependencyEdge {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_type: String = row.get(3)?;
        let dep_type = raw_type.parse::<DepType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            package: PackageName::new(row.get::<_, String>(0)?),
            container: ContainerName::new(row.get::<_, String>(1)?),
            dependency: PackageName::new(row.get::<_, String>(2)?),
            dep_type,
        })
    }
}

const EDGE_COLUMNS: &str = "name, container, dependency, dep_type";

/// Members of a scope, as a sub-select over owner names bound to parameter `?{param}`.
fn scope_owners(scope: &RootScope, param: usize) -> (String, &str) {
    match scope {
        RootScope::Shared(root) => (
            format!(
                "SELECT name FROM containers WHERE shared_root = ?{param}
                 UNION SELECT name FROM destroyed_containers WHERE shared_root = ?{param}"
            ),
            root.as_str(),
        ),
        RootScope::Private(name) => (format!("SELECT ?{param}"), name.as_str()),
    }
}

impl StoreTx<'_> {
    /// Record an edge. Fails with [`StoreError::DuplicateEdge`] when the exact
    /// `(package, container, dependency)` triple is already present.
    pub fn add_dependency(
        &self,
        package: &str,
        container: &str,
        dependency: &str,
        dep_type: DepType,
    ) -> Result<(), StoreError> {
        let result = self.conn().execute(
            "INSERT INTO package_deps (name, container, dependency, dep_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![package, container, dependency, dep_type.as_str()],
        );
        match result {
            Ok(_) => {
                debug!("recorded edge {package} -> {dependency} ({dep_type}) in {container}");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateEdge {
                    package: package.to_owned(),
                    container: container.to_owned(),
                    dependency: dependency.to_owned(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every edge owned by `package` in `container`, returning them.
    pub fn remove_dependencies_for_package(
        &self,
        container: &str,
        package: &str,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        let edges = self.query_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM package_deps
                 WHERE container = ?1 AND name = ?2 ORDER BY dependency"
            ),
            &[container, package],
        )?;
        self.conn().execute(
            "DELETE FROM package_deps WHERE container = ?1 AND name = ?2",
            params![container, package],
        )?;
        debug!("removed {} edges of {package} in {container}", edges.len());
        Ok(edges)
    }

    /// Delete every edge owned by any package of `container`, returning them.
    pub fn remove_dependencies_for_container(
        &self,
        container: &str,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        let edges = self.dependencies_of_container(container)?;
        self.conn()
            .execute("DELETE FROM package_deps WHERE container = ?1", [container])?;
        debug!("removed {} edges owned by {container}", edges.len());
        Ok(edges)
    }

    /// Delete the edges of `package` owned by destroyed placeholders on
    /// `root`, returning them.
    pub fn remove_placeholder_dependencies_for_package(
        &self,
        root: &SharedRoot,
        package: &str,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        const OWNED_BY_PLACEHOLDER: &str = "name = ?1
             AND container IN (SELECT name FROM destroyed_containers WHERE shared_root = ?2)";
        let edges = self.query_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM package_deps
                 WHERE {OWNED_BY_PLACEHOLDER} ORDER BY container, dependency"
            ),
            &[package, root.as_str()],
        )?;
        self.conn().execute(
            &format!("DELETE FROM package_deps WHERE {OWNED_BY_PLACEHOLDER}"),
            params![package, root.as_str()],
        )?;
        if !edges.is_empty() {
            debug!("removed {} placeholder edges of {package} on {root}", edges.len());
        }
        Ok(edges)
    }

    pub fn dependencies_of_container(
        &self,
        container: &str,
    ) -> Result<Vec<DependencyEdge>, StoreError> {
        self.query_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM package_deps
                 WHERE container = ?1 ORDER BY name, dependency"
            ),
            &[container],
        )
    }

    /// Number of edges naming `dependency` whose owner belongs to `scope`
    /// (active containers and placeholders alike).
    pub fn dependents_of(&self, scope: &RootScope, dependency: &str) -> Result<u64, StoreError> {
        let (owners, arg) = scope_owners(scope, 2);
        let sql = format!(
            "SELECT COUNT(*) FROM package_deps
             WHERE dependency = ?1 AND container IN ({owners})"
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params![dependency, arg], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Every edge owned by a member of `scope`.
    pub fn dependencies_in_scope(&self, scope: &RootScope) -> Result<Vec<DependencyEdge>, StoreError> {
        let (owners, arg) = scope_owners(scope, 1);
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM package_deps
             WHERE container IN ({owners})
             ORDER BY container, name, dependency"
        );
        self.query_edges(&sql, &[arg])
    }

    fn query_edges(&self, sql: &str, args: &[&str]) -> Result<Vec<DependencyEdge>, StoreError> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), DependencyEdge::from_row)?;
        let edges = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}
