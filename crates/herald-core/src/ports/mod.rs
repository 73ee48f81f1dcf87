//! Ports: the seams between the engine and its collaborators.
//!
//! The store is the source of truth. The queue only carries job ids and
//! routing data; everything it holds can be rebuilt from the store.

pub mod clock;
pub mod dispatch_queue;
pub mod id_generator;
pub mod sender;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock, to_chrono};
pub use self::dispatch_queue::{DispatchQueue, Lane};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::sender::{ChannelSender, OutboundMessage, SendError};
pub use self::store::{ListQuery, NotificationStore, Page, modify_notification};
