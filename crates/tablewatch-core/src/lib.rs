//! tablewatch Core Types and Traits
//!
//! This crate provides the types shared by every tablewatch crate:
//! - Change events as published by the database trigger
//! - The `Subscriber` trait consumed by table watchers
//! - Watch configuration and SQL identifier handling
//! - Core error types

pub mod error;
pub mod event;
pub mod ident;
pub mod subscriber;
pub mod watch_config;

pub use error::{Error, Result};
pub use event::{ChangeEvent, ConfigRow, Operation, RawChangeEvent};
pub use subscriber::{Subscriber, SubscriberId};
pub use watch_config::{ReconnectPolicy, WatchConfig};
