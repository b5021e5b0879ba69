//! SQL identifier and literal handling
//!
//! Table, trigger and channel names end up interpolated into DDL and
//! `LISTEN` statements, which cannot take bind parameters.

use crate::{Error, Result};

/// PostgreSQL's `NAMEDATALEN - 1`. Longer identifiers are silently
/// truncated by the server, and `pg_notify()` rejects longer channels.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check that `name` can be used as a quoted identifier
///
/// # Errors
/// - `Error::InvalidIdentifier` if the name is empty, contains a NUL byte,
///   or is longer than [`MAX_IDENTIFIER_LEN`] bytes
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier(format!("{} name is empty", kind)));
    }

    if name.contains('\0') {
        return Err(Error::InvalidIdentifier(format!(
            "{} name contains a NUL byte",
            kind
        )));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier(format!(
            "{} name '{}' is {} bytes, maximum is {}",
            kind,
            name,
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    Ok(())
}

/// Quote an identifier, doubling embedded double quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
