//! SQL query constants and builders
//!
//! Contains all SQL issued by the diagnostic engine.

/// Liveness probe
pub const PING: &str = "SELECT 1";

/// Tables (and views) present in a namespace, in name order.
///
/// `information_schema` uses the `sql_identifier` domain; cast to text so
/// parameters and results bind as plain strings.
pub const LIST_TABLES: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema::text = $1
    ORDER BY table_name
"#;

/// Columns of one table, in ordinal order
pub const LIST_COLUMNS: &str = r#"
    SELECT column_name::text
    FROM information_schema.columns
    WHERE table_schema::text = $1
        AND table_name::text = $2
    ORDER BY ordinal_position
"#;

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        // PostgreSQL identifier quoting
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Schema-qualified, quoted table reference
    pub fn qualified(namespace: &str, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(namespace), Self::quote_ident(table))
    }

    /// Build the batched null-count query for one table.
    ///
    /// Column 0 is `COUNT(*)`; column `i + 1` is `COUNT(columns[i])`.
    pub fn column_counts(namespace: &str, table: &str, columns: &[String]) -> String {
        let mut select = vec!["COUNT(*)".to_string()];
        select.extend(
            columns
                .iter()
                .map(|c| format!("COUNT({})", Self::quote_ident(c))),
        );
        format!(
            "SELECT {} FROM {}",
            select.join(", "),
            Self::qualified(namespace, table)
        )
    }
}
