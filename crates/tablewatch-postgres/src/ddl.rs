//! Change publisher DDL
//!
//! Installs the database side of the pipeline:
//! - `notify_changes()`, one trigger function shared by every watched table.
//!   It publishes `{"operation": TG_OP, "record": <row>}` on the channel
//!   passed as the trigger's first argument, using `OLD` for deletes and
//!   `NEW` otherwise.
//! - `<table>_changed`, an `AFTER ... FOR EACH ROW` trigger bound to it.
//!
//! Installation always drops the trigger before recreating it, so running it
//! on every deployment never stacks triggers. A table has a single owner:
//! two watchers with the same table overwrite each other's trigger.

use sqlx::PgPool;
use tablewatch_core::ident::{quote_ident, quote_literal};
use tablewatch_core::{Error, Result, WatchConfig};
use tracing::{debug, info};

/// Name of the shared trigger function
pub const NOTIFY_FUNCTION_NAME: &str = "notify_changes";

/// `CREATE OR REPLACE` statement for the shared trigger function
pub fn notify_function_sql() -> String {
    format!(
        r#"
        CREATE OR REPLACE FUNCTION {function}()
        RETURNS trigger AS $$
        BEGIN
            IF (TG_OP = 'DELETE') THEN
                PERFORM pg_notify(
                    TG_ARGV[0],
                    json_build_object(
                        'operation', TG_OP,
                        'record', row_to_json(OLD)
                    )::text
                );
                RETURN OLD;
            ELSE
                PERFORM pg_notify(
                    TG_ARGV[0],
                    json_build_object(
                        'operation', TG_OP,
                        'record', row_to_json(NEW)
                    )::text
                );
                RETURN NEW;
            END IF;
        END;
        $$ LANGUAGE plpgsql
        "#,
        function = NOTIFY_FUNCTION_NAME
    )
}

pub fn drop_trigger_sql(config: &WatchConfig) -> String {
    format!(
        "DROP TRIGGER IF EXISTS {} ON {}",
        quote_ident(&config.trigger_name()),
        quote_ident(config.table())
    )
}

pub fn create_trigger_sql(config: &WatchConfig) -> String {
    let events = config
        .events()
        .iter()
        .map(|op| op.as_str())
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        r#"
        CREATE TRIGGER {trigger}
        AFTER {events}
        ON {table}
        FOR EACH ROW
        EXECUTE PROCEDURE {function}({channel})
        "#,
        trigger = quote_ident(&config.trigger_name()),
        events = events,
        table = quote_ident(config.table()),
        function = NOTIFY_FUNCTION_NAME,
        channel = quote_literal(&config.channel()),
    )
}

/// Install or refresh the function and trigger for `config`
///
/// Runs in a single transaction so a failed rebuild leaves the previous
/// trigger in place.
///
/// # Errors
/// - `Error::Ddl` if any statement fails (missing table, insufficient
///   privilege, conflicting object)
pub async fn install(pool: &PgPool, config: &WatchConfig) -> Result<()> {
    config.validate()?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::Ddl(format!("Failed to start transaction: {}", e)))?;

    debug!("Creating function {}()", NOTIFY_FUNCTION_NAME);
    sqlx::query(&notify_function_sql())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Ddl(format!(
                "Failed to create function {}(): {}",
                NOTIFY_FUNCTION_NAME, e
            ))
        })?;

    sqlx::query(&drop_trigger_sql(config))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Ddl(format!(
                "Failed to drop trigger {}: {}",
                config.trigger_name(),
                e
            ))
        })?;

    sqlx::query(&create_trigger_sql(config))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Ddl(format!(
                "Failed to create trigger {} on {}: {}",
                config.trigger_name(),
                config.table(),
                e
            ))
        })?;

    tx.commit()
        .await
        .map_err(|e| Error::Ddl(format!("Failed to commit transaction: {}", e)))?;

    info!(
        "Installed trigger {} on {} publishing to channel {}",
        config.trigger_name(),
        config.table(),
        config.channel()
    );

    Ok(())
}

/// Number of user triggers named like the watcher's trigger on its table
///
/// # Errors
/// - `Error::Database` if the catalog query fails
pub async fn count_triggers(pool: &PgPool, config: &WatchConfig) -> Result<i64> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM pg_trigger t
        JOIN pg_class c ON c.oid = t.tgrelid
        WHERE c.relname = $1
          AND t.tgname = $2
          AND NOT t.tgisinternal
        "#,
    )
    .bind(config.table())
    .bind(config.trigger_name())
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to count triggers: {}", e)))
}
