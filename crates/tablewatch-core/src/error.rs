//! Error types for tablewatch Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Listening connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Watcher closed: {0}")]
    Closed(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    // Change publisher installation errors
    #[error("DDL installation failed: {0}")]
    Ddl(String),

    // Query and write errors
    #[error("Database error: {0}")]
    Database(String),

    // Notification errors
    #[error("Malformed notification payload: {0}")]
    Payload(String),

    #[error("Subscriber error: {0}")]
    Subscriber(String),

    // Configuration errors
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
