//! herald-core
//!
//! Notification dispatch and retry engine.
//!
//! A submission becomes one notification row per (user, channel). Each row
//! gets a dispatch job on a priority lane; workers pick the job up, run the
//! channel sender under a timeout, and either commit the delivery or schedule
//! a retry with exponential backoff until the channel's budget runs out.
//!
//! # Modules
//! - **domain**: ids, channels, the notification state machine, backoff policy, outcomes, errors
//! - **ports**: store, dispatch queue, sender, clock and id generator traits
//! - **app**: dispatcher, retry controller, worker pool, periodic jobs, builder
//! - **impls**: in-memory store and queue, logging and scripted senders
//! - **config**: engine configuration from `HERALD_*` environment variables
//! - **observability**: queue depth counters

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{Engine, EngineBuilder, EngineHandle, SubmitRequest};
pub use config::EngineConfig;
pub use domain::{Channel, EngineError, Notification, NotificationStatus, Priority};
