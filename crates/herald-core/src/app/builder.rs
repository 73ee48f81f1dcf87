//! EngineBuilder: wiring and start-up checks.
//!
//! `build()` fails fast when a channel has no sender, instead of letting
//! the first notification for that channel fail at delivery time.

use std::sync::Arc;

use crate::app::context::EngineContext;
use crate::app::controller::RetryController;
use crate::app::digest_loop::DailyDigest;
use crate::app::gc_loop::Cleanup;
use crate::app::orchestrator::Dispatcher;
use crate::app::reaper_loop::Reconciler;
use crate::app::registry::SenderRegistry;
use crate::app::scheduler::{ScheduledJob, TaskScheduler};
use crate::app::status::{EngineStatus, snapshot};
use crate::app::worker_loop::WorkerGroup;
use crate::config::{ConfigError, EngineConfig};
use crate::domain::{Channel, EngineError};
use crate::impls::{InMemoryDispatchQueue, InMemoryNotificationStore};
use crate::ports::{
    ChannelSender, Clock, DispatchQueue, IdGenerator, NotificationStore, SystemClock,
    UlidGenerator,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no sender registered for channels {0:?}")]
    MissingSenders(Vec<Channel>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// ```ignore
/// let engine = EngineBuilder::new(EngineConfig::from_env()?)
///     .sender(Arc::new(LoggingSender::new(Channel::Email)))?
///     .sender(Arc::new(LoggingSender::new(Channel::Sms)))?
///     .sender(Arc::new(LoggingSender::new(Channel::InApp)))?
///     .build()?;
/// let handle = engine.start();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn NotificationStore>>,
    queue: Option<Arc<dyn DispatchQueue>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    senders: SenderRegistry,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            queue: None,
            clock: None,
            ids: None,
            senders: SenderRegistry::new(),
        }
    }

    pub fn sender(mut self, sender: Arc<dyn ChannelSender>) -> Result<Self, BuildError> {
        self.senders.register(sender)?;
        Ok(self)
    }

    pub fn store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Unset collaborators default to the system clock, ULID ids and the
    /// in-memory store and queue.
    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        let missing = self.senders.missing_channels();
        if !missing.is_empty() {
            return Err(BuildError::MissingSenders(missing));
        }

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryNotificationStore::new()));
        let queue = self.queue.unwrap_or_else(|| {
            Arc::new(InMemoryDispatchQueue::new(
                clock.clone(),
                config.visibility_timeout,
                config.poll_interval,
            ))
        });
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));

        let ctx = EngineContext {
            store,
            queue,
            clock,
            ids,
        };
        let dispatcher = Arc::new(
            Dispatcher::new(ctx.clone())
                .with_placeholder_email_domain(config.placeholder_email_domain.clone()),
        );
        let controller = Arc::new(RetryController::new(
            ctx.clone(),
            self.senders,
            config.policies.clone(),
            config.send_timeout,
        ));

        Ok(Engine {
            ctx,
            dispatcher,
            controller,
            config,
        })
    }
}

/// A wired engine, as returned by [`EngineBuilder::build`]. Nothing runs
/// until `start`.
pub struct Engine {
    ctx: EngineContext,
    dispatcher: Arc<Dispatcher>,
    controller: Arc<RetryController>,
    config: EngineConfig,
}

impl Engine {
    /// Entry point for the request layer: submit, cancel, status.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        snapshot(&self.ctx).await
    }

    fn scheduled_jobs(&self) -> Vec<Arc<dyn ScheduledJob>> {
        vec![
            Arc::new(DailyDigest::new(
                self.ctx.clone(),
                self.dispatcher.clone(),
                self.config.digest_window,
                self.config.digest_interval,
            )),
            Arc::new(Cleanup::new(
                self.ctx.clone(),
                self.config.retention,
                self.config.cleanup_interval,
            )),
            Arc::new(Reconciler::new(
                self.ctx.clone(),
                self.config.reconcile_grace,
                self.config.reconcile_interval,
            )),
        ]
    }

    /// Spawn the worker pool and the periodic jobs.
    pub fn start(&self) -> EngineHandle {
        let workers = WorkerGroup::spawn(
            self.config.workers,
            self.ctx.queue.clone(),
            self.controller.clone(),
        );
        let scheduler = TaskScheduler::spawn(self.scheduled_jobs());
        tracing::info!(workers = self.config.workers, "engine started");
        EngineHandle { workers, scheduler }
    }
}

/// Running workers and periodic jobs.
pub struct EngineHandle {
    workers: WorkerGroup,
    scheduler: TaskScheduler,
}

impl EngineHandle {
    /// Stop taking new work, then wait for running attempts and jobs.
    pub async fn shutdown_and_join(self) {
        self.scheduler.request_shutdown();
        self.workers.request_shutdown();
        self.scheduler.shutdown_and_join().await;
        self.workers.shutdown_and_join().await;
        tracing::info!("engine stopped");
    }
}
