//! In-process implementations of the ports, for tests, demos and
//! single-node deployments.

pub mod inmem_queue;
pub mod inmem_store;
pub mod senders;

pub use self::inmem_queue::InMemoryDispatchQueue;
pub use self::inmem_store::InMemoryNotificationStore;
pub use self::senders::{LoggingSender, ScriptedSender, Step};
