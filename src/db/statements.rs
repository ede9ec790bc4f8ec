//! Text of every statement the shrinker sends.
//!
//! Shared by the production client and the test server so that recorded
//! statement logs can be asserted on verbatim.

use crate::table::{Engine, TableId};

pub const UNLOCK_TABLES: &str = "UNLOCK TABLES";
pub const DISABLE_FOREIGN_KEY_CHECKS: &str = "SET SESSION foreign_key_checks = 0";
pub const SHOW_DATADIR: &str = "SHOW GLOBAL VARIABLES LIKE 'datadir'";
pub const SHOW_FILE_PER_TABLE: &str = "SHOW GLOBAL VARIABLES LIKE 'innodb_file_per_table'";

pub fn engine_conversion(table: &TableId, target: Engine) -> String {
    format!("ALTER TABLE {} ENGINE={}", table.quoted(), target.as_sql())
}

pub fn flush_for_export(table: &TableId) -> String {
    format!("FLUSH TABLES {} FOR EXPORT", table.quoted())
}

pub fn discard_tablespace(table: &TableId) -> String {
    format!("ALTER TABLE {} DISCARD TABLESPACE", table.quoted())
}

pub fn import_tablespace(table: &TableId) -> String {
    format!("ALTER TABLE {} IMPORT TABLESPACE", table.quoted())
}

/// Reads one row; fails while the tablespace is discarded or missing
pub fn probe_tablespace(table: &TableId) -> String {
    format!("SELECT 1 FROM {} LIMIT 1", table.quoted())
}

pub fn show_create_table(table: &TableId) -> String {
    format!("SHOW CREATE TABLE {}", table.quoted())
}

/// Enumerate base tables outside `excluded`
pub fn list_tables(excluded: &[String]) -> String {
    let mut sql = String::from(
        "SELECT TABLE_SCHEMA, TABLE_NAME, ENGINE FROM information_schema.TABLES \
         WHERE TABLE_TYPE = 'BASE TABLE'",
    );
    if !excluded.is_empty() {
        let list: Vec<String> = excluded.iter().map(|s| quote_literal(s)).collect();
        sql.push_str(&format!(" AND TABLE_SCHEMA NOT IN ({})", list.join(", ")));
    }
    sql.push_str(" ORDER BY TABLE_SCHEMA, TABLE_NAME");
    sql
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Whether a statement changes server state. Used to prove that planning
/// stays read-only.
pub fn is_mutating(statement: &str) -> bool {
    let head = statement.trim_start().to_ascii_uppercase();
    !(head.starts_with("SELECT") || head.starts_with("SHOW"))
}
