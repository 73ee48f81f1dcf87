use std::sync::Arc;

use crate::ports::{Clock, DispatchQueue, IdGenerator, NotificationStore};

/// Collaborators shared by every use case.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn NotificationStore>,
    pub queue: Arc<dyn DispatchQueue>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}
