use anyhow::{anyhow, bail, Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Offset added to the schema version stored in `PRAGMA user_version`, so that
/// a database created by something else is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 77000;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn from_declared(declared: &str) -> Option<Self> {
        match declared.to_ascii_uppercase().as_str() {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

impl Column {
    fn definition_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type.as_sql());
        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default_value) = self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default_value);
        }
        if let Some(fk) = self.foreign_key {
            sql.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                fk.foreign_table,
                fk.foreign_column,
                fk.on_delete.as_sql()
            ));
        }
        sql
    }
}

/// A column as SQLite reports it through `PRAGMA table_info`.
struct ColumnInfo {
    name: String,
    sql_type: Option<SqlType>,
    declared_type: String,
    non_null: bool,
    is_primary_key: bool,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// `(index name, column)` pairs.
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition_sql).collect();
        parts.extend(
            self.unique_constraints
                .iter()
                .map(|columns| format!("UNIQUE ({})", columns.join(", "))),
        );
        format!("CREATE TABLE {} ({});", self.name, parts.join(", "))
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), [])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_name),
                [],
            )?;
        }
        Ok(())
    }

    fn column_infos(&self, conn: &Connection) -> Result<Vec<ColumnInfo>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let infos = stmt
            .query_map([], |row| {
                let declared_type: String = row.get(2)?;
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    sql_type: SqlType::from_declared(&declared_type),
                    declared_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    is_primary_key: row.get::<_, i32>(5)? > 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(infos)
    }

    /// Column sets (sorted) of every unique index on the table, including the
    /// implicit ones created by `UNIQUE (...)` clauses.
    fn unique_column_sets(&self, conn: &Connection) -> Result<Vec<Vec<String>>> {
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({});", self.name))?;
        let unique_indices = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, unique)| *unique == 1)
            .map(|(name, _)| name);

        let mut sets = Vec::new();
        for index_name in unique_indices {
            let mut stmt = conn.prepare(&format!("PRAGMA index_info({});", index_name))?;
            let mut columns = stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            columns.sort();
            sets.push(columns);
        }
        Ok(sets)
    }

    /// Every difference between this definition and the table in `conn`.
    fn mismatches(&self, conn: &Connection) -> Result<Vec<String>> {
        let actual = self.column_infos(conn)?;
        if actual.is_empty() {
            return Ok(vec![format!("table {} does not exist", self.name)]);
        }

        let mut problems = Vec::new();
        if actual.len() != self.columns.len() {
            let found: Vec<&str> = actual.iter().map(|c| c.name.as_str()).collect();
            problems.push(format!(
                "table {} has {} columns, expected {} (found: {})",
                self.name,
                actual.len(),
                self.columns.len(),
                found.join(", ")
            ));
        }

        for (expected, found) in self.columns.iter().zip(actual.iter()) {
            let column = format!("{}.{}", self.name, expected.name);
            if found.name != expected.name {
                problems.push(format!("{}: found column {} in its place", column, found.name));
                continue;
            }
            if found.sql_type.as_ref() != Some(expected.sql_type) {
                problems.push(format!(
                    "{}: type mismatch, expected {}, got {}",
                    column,
                    expected.sql_type.as_sql(),
                    found.declared_type
                ));
            }
            if found.non_null != expected.non_null {
                problems.push(format!("{}: NOT NULL should be {}", column, expected.non_null));
            }
            if found.is_primary_key != expected.is_primary_key {
                problems.push(format!(
                    "{}: PRIMARY KEY should be {}",
                    column, expected.is_primary_key
                ));
            }
        }

        if !self.unique_constraints.is_empty() {
            let unique_sets = self.unique_column_sets(conn)?;
            for constraint in self.unique_constraints {
                let mut expected: Vec<&str> = constraint.to_vec();
                expected.sort();
                if !unique_sets
                    .iter()
                    .any(|set| set.iter().map(String::as_str).eq(expected.iter().copied()))
                {
                    problems.push(format!(
                        "table {} is missing unique constraint ({})",
                        self.name,
                        constraint.join(", ")
                    ));
                }
            }
        }

        Ok(problems)
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
}

impl VersionedSchema {
    /// Create all tables in one transaction and stamp the version.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON; BEGIN;")?;
        let created = self.tables.iter().try_for_each(|table| table.create(conn));
        match created {
            Ok(()) => {
                conn.execute_batch(&format!(
                    "PRAGMA user_version = {}; COMMIT;",
                    BASE_DB_VERSION + self.version
                ))?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    /// Fails with every mismatch found across all tables.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let mut problems = Vec::new();
        for table in self.tables {
            problems.extend(table.mismatches(conn)?);
        }
        if !problems.is_empty() {
            bail!("Schema v{} mismatch: {}", self.version, problems.join("; "));
        }
        Ok(())
    }
}

/// Bring `conn` to a known schema: create the latest one on an empty
/// database, otherwise validate against the version stamped in it.
///
/// Returns the schema version in use.
pub fn init_schema(conn: &Connection, schemas: &[VersionedSchema], label: &str) -> Result<usize> {
    let latest = schemas
        .last()
        .ok_or_else(|| anyhow!("No {} schema defined", label))?;

    let stamped: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .with_context(|| format!("Failed to read {} database version", label))?;
    let table_count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;

    if stamped == 0 && table_count == 0 {
        info!("Creating {} schema v{}", label, latest.version);
        latest.create(conn)?;
        return Ok(latest.version);
    }

    let version = stamped - BASE_DB_VERSION as i64;
    if version < 1 {
        bail!(
            "{} database has version stamp {}, which was not written by this server",
            label,
            stamped
        );
    }
    let schema = schemas
        .iter()
        .find(|s| s.version as i64 == version)
        .with_context(|| format!("Unknown {} database version {}", label, version))?;
    schema
        .validate(conn)
        .with_context(|| format!("{} database failed validation", label))?;
    Ok(schema.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: Table = Table {
        name: "test_table",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("link", &SqlType::Text, non_null = true),
            sqlite_column!("score", &SqlType::Real),
        ],
        indices: &[("idx_test_link", "link")],
        unique_constraints: &[&["link"]],
    };

    const TEST_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
        version: 1,
        tables: &[TEST_TABLE],
    }];

    #[test]
    fn create_sql_lists_columns_then_constraints() {
        assert_eq!(
            TEST_TABLE.create_sql(),
            "CREATE TABLE test_table (id INTEGER PRIMARY KEY, link TEXT NOT NULL, score REAL, UNIQUE (link));"
        );
    }

    #[test]
    fn init_creates_then_validates() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(init_schema(&conn, TEST_SCHEMAS, "test").unwrap(), 1);

        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 1);

        // Second open goes through validation
        assert_eq!(init_schema(&conn, TEST_SCHEMAS, "test").unwrap(), 1);
    }

    #[test]
    fn init_rejects_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE other (x TEXT)", []).unwrap();

        let err = init_schema(&conn, TEST_SCHEMAS, "test").unwrap_err().to_string();
        assert!(err.contains("not written by this server"));
    }

    #[test]
    fn validate_reports_all_mismatches() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE test_table (id INTEGER PRIMARY KEY, link INTEGER NOT NULL, score REAL)",
            [],
        )
        .unwrap();

        let err = TEST_SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("test_table.link: type mismatch"));
        assert!(err.contains("missing unique constraint (link)"));
    }

    #[test]
    fn validate_detects_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE test_table (id INTEGER PRIMARY KEY, link TEXT NOT NULL, UNIQUE (link))",
            [],
        )
        .unwrap();

        let err = TEST_SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("has 2 columns, expected 3"));
    }

    #[test]
    fn validate_detects_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        let err = TEST_SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("table test_table does not exist"));
    }
}
