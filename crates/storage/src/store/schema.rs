#![forbid(unsafe_code)]

use rusqlite::{Connection, params};

use super::error::StoreError;
use super::meta::TypeDescriptor;

/// `REV_MAX` of the currently-open version of a row or flex value.
pub(in crate::store) const CURRENT_REV: i64 = i64::MAX;

/// Source-side `REV_MAX` reported by the update queries when no source row
/// exists at all. Distinguishes creation from "existed, but not valid at
/// the source revision".
pub(in crate::store) const NO_SOURCE_REV: i64 = 0;

/// Discriminator bytes of the flex value columns.
pub(in crate::store) const LONG_TYPE: i64 = 10;
pub(in crate::store) const DOUBLE_TYPE: i64 = 20;
pub(in crate::store) const STRING_TYPE: i64 = 30;
pub(in crate::store) const CLOB_TYPE: i64 = 40;
pub(in crate::store) const BLOB_TYPE: i64 = 50;

pub(in crate::store) fn install_base_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS flex_data (
          BRANCH INTEGER NOT NULL,
          TYPE TEXT NOT NULL,
          IDENTIFIER TEXT NOT NULL,
          ATTR TEXT NOT NULL,
          REV_MIN INTEGER NOT NULL,
          REV_MAX INTEGER NOT NULL,
          DATA_TYPE INTEGER NOT NULL,
          LONG_DATA INTEGER,
          DOUBLE_DATA REAL,
          VARCHAR_DATA TEXT,
          CLOB_DATA TEXT,
          BLOB_DATA BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_flex_key
          ON flex_data(TYPE, BRANCH, IDENTIFIER, ATTR, REV_MIN);

        CREATE TABLE IF NOT EXISTS revision_xref (
          REV INTEGER NOT NULL,
          BRANCH INTEGER NOT NULL,
          TYPE TEXT NOT NULL,
          PRIMARY KEY (REV, BRANCH, TYPE)
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", "v1"],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["last_revision", "0"],
    )?;
    Ok(())
}

pub(in crate::store) fn install_type_table(
    conn: &Connection,
    descriptor: &TypeDescriptor,
) -> Result<(), StoreError> {
    let table = descriptor.table_name();
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {table} (\n");
    if descriptor.multiple_branches {
        ddl.push_str("  BRANCH INTEGER NOT NULL,\n");
    }
    ddl.push_str("  IDENTIFIER TEXT NOT NULL,\n");
    ddl.push_str("  REV_MIN INTEGER NOT NULL,\n");
    ddl.push_str("  REV_MAX INTEGER NOT NULL");
    for attribute in &descriptor.attributes {
        for column in attribute.columns() {
            ddl.push_str(&format!(",\n  {} {}", column.name, column.column_type.sql_decl()));
        }
    }
    ddl.push_str("\n);\n");
    if descriptor.multiple_branches {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(BRANCH, IDENTIFIER, REV_MIN);\n"
        ));
    } else {
        ddl.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(IDENTIFIER, REV_MIN);\n"
        ));
    }
    conn.execute_batch(&ddl)?;
    Ok(())
}

pub(in crate::store) fn last_revision(conn: &Connection) -> Result<i64, StoreError> {
    let raw: String = conn.query_row(
        "SELECT value FROM meta WHERE key = 'last_revision'",
        [],
        |row| row.get(0),
    )?;
    raw.parse::<i64>()
        .map_err(|_| StoreError::Corrupt("last_revision is not a number"))
}
