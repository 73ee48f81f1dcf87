//! Application layer: use cases and background loops built on the ports.
//!
//! - **Dispatcher**: submit, cancel, status, mark-read, list
//! - **RetryController**: one delivery attempt per dispatch job
//! - **WorkerGroup**: pool of dequeue/process/ack loops
//! - **TaskScheduler**: periodic jobs (daily digest, cleanup, reconciler)
//! - **EngineBuilder**: wiring and start-up checks

pub mod builder;
pub mod context;
pub mod controller;
pub mod digest_loop;
pub mod gc_loop;
pub mod orchestrator;
pub mod reaper_loop;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, Engine, EngineBuilder, EngineHandle};
pub use self::context::EngineContext;
pub use self::controller::RetryController;
pub use self::digest_loop::{DailyDigest, DigestReport};
pub use self::gc_loop::Cleanup;
pub use self::orchestrator::{CreatedNotification, Dispatcher, Message, SubmitReceipt, SubmitRequest};
pub use self::reaper_loop::Reconciler;
pub use self::registry::SenderRegistry;
pub use self::scheduler::{ScheduledJob, TaskScheduler};
pub use self::status::EngineStatus;
pub use self::worker_loop::WorkerGroup;
