//! SQL definitions for the bookkeeping database.
//!
//! Tables are created by the named migrations in [`crate::migration`]; every
//! statement is `IF NOT EXISTS` so a half-applied migration can be re-run.

/// Singleton version row, created before anything else.
pub const SCHEMA_VERSION_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Migration "1": containers, placeholders and dependency edges.
pub const CONTAINER_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS containers (
    name TEXT PRIMARY KEY NOT NULL,
    distribution TEXT NOT NULL,
    shared_root TEXT NOT NULL DEFAULT '',
    configuration TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS destroyed_containers (
    name TEXT PRIMARY KEY NOT NULL,
    distribution TEXT NOT NULL,
    shared_root TEXT NOT NULL DEFAULT '',
    configuration TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS package_deps (
    name TEXT NOT NULL,
    container TEXT NOT NULL,
    dependency TEXT NOT NULL,
    dep_type TEXT NOT NULL CHECK (dep_type IN ('required', 'optional', 'suggestion')),
    PRIMARY KEY (name, container, dependency)
) WITHOUT ROWID;
";

/// Migration "2": explicitly installed packages.
pub const PACKAGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS packages (
    name TEXT NOT NULL,
    container TEXT NOT NULL,
    shared_root TEXT NOT NULL DEFAULT '',
    local_copies TEXT NOT NULL DEFAULT '',
    package_type TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (name, container)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_packages_container ON packages(container);
";

/// Migration "3": lookups by root and by dependency.
pub const ROOT_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_containers_root ON containers(shared_root);
CREATE INDEX IF NOT EXISTS idx_destroyed_root ON destroyed_containers(shared_root);
CREATE INDEX IF NOT EXISTS idx_deps_container ON package_deps(container);
CREATE INDEX IF NOT EXISTS idx_deps_dependency ON package_deps(dependency);
CREATE INDEX IF NOT EXISTS idx_packages_root ON packages(shared_root);
";

pub const CONTAINER_COLUMNS: &str = "name, distribution, shared_root, configuration";
pub const PACKAGE_COLUMNS: &str = "name, container, shared_root, local_copies, package_type";
