//! SQL for the backing configuration table
//!
//! The table name is a quoted identifier; namespace, key and value are
//! always bound parameters.

use tablewatch_core::ident::quote_ident;

pub(crate) fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (namespace, key)
        )
        "#,
        table = quote_ident(table)
    )
}

pub(crate) fn select_namespace_sql(table: &str) -> String {
    format!(
        "SELECT namespace, key, value FROM {} WHERE namespace = $1",
        quote_ident(table)
    )
}

pub(crate) fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (namespace, key, value)
        VALUES ($1, $2, $3)
        ON CONFLICT (namespace, key)
        DO UPDATE SET value = EXCLUDED.value
        "#,
        quote_ident(table)
    )
}

pub(crate) fn delete_sql(table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE namespace = $1 AND key = $2",
        quote_ident(table)
    )
}
