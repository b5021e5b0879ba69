//! Change events published by the `notify_changes()` trigger function
//!
//! The trigger serializes every affected row as
//! `{"operation": "INSERT"|"UPDATE"|"DELETE", "record": {...}}`.
//! Payloads are first decoded into a [`RawChangeEvent`] whose record is an
//! untyped JSON value, then converted into a typed [`ChangeEvent<R>`].
//! Both steps report failures as [`Error::Payload`] so a single bad message
//! never reaches subscriber logic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Row-level operation reported by the trigger (`TG_OP`)
///
/// These are also the DML events a trigger can be bound to. Only the three
/// literals PostgreSQL produces are accepted; anything else (such as
/// `CREATE`) is a malformed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// All operations, in the order used for the default trigger
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    /// SQL keyword for this operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(Error::Config(format!("Unknown operation '{}'", other))),
        }
    }
}

/// A single row change
///
/// For `DELETE` the record is the row as it was before removal, otherwise it
/// is the row after the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<R> {
    operation: Operation,
    record: R,
}

/// Change event as it arrives on the channel, before schema checking
pub type RawChangeEvent = ChangeEvent<serde_json::Value>;

impl<R> ChangeEvent<R> {
    pub fn new(operation: Operation, record: R) -> Self {
        Self { operation, record }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn into_record(self) -> R {
        self.record
    }

    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

impl RawChangeEvent {
    /// Parse a notification payload
    ///
    /// # Errors
    /// - `Error::Payload` if the text is not JSON, lacks `operation` or
    ///   `record`, or carries an unknown operation literal
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Payload(e.to_string()))
    }

    /// Convert the untyped record into `R`
    ///
    /// # Errors
    /// - `Error::Payload` if the record does not match the shape of `R`
    pub fn decode<R: DeserializeOwned>(self) -> Result<ChangeEvent<R>> {
        let operation = self.operation;
        let record = serde_json::from_value(self.record).map_err(|e| {
            Error::Payload(format!("{} record does not match schema: {}", operation, e))
        })?;
        Ok(ChangeEvent { operation, record })
    }
}

/// One row of a namespaced key/value configuration table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigRow {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

impl ConfigRow {
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}
