//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ulid::Ulid;

use crate::app::context::EngineContext;
use crate::app::controller::RetryController;
use crate::app::orchestrator::Dispatcher;
use crate::app::registry::SenderRegistry;
use crate::config::EngineConfig;
use crate::domain::{
    Channel, ContactInfo, JobId, NewNotification, Notification, NotificationId, Priority,
    ProcessOutcome, User, UserId,
};
use crate::impls::{InMemoryDispatchQueue, InMemoryNotificationStore, ScriptedSender, Step};
use crate::ports::{Clock, DispatchQueue, FixedClock, NotificationStore, UlidGenerator};

/// 2024-01-01T00:00:00Z plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + Duration::seconds(secs)
}

pub fn sample_notification(user_id: UserId, channel: Channel, created_at: DateTime<Utc>) -> Notification {
    Notification::new(
        NewNotification {
            id: NotificationId::from_ulid(Ulid::new()),
            user_id,
            channel,
            subject: "subject".into(),
            body: "body".into(),
            priority: Priority::Medium,
            task_ref: JobId::from_ulid(Ulid::new()),
            scheduled_for: None,
            metadata: serde_json::Value::Null,
        },
        created_at,
    )
}

/// Fully wired engine on a fixed clock, driven by hand.
pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryNotificationStore>,
    pub queue: Arc<InMemoryDispatchQueue>,
    pub ctx: EngineContext,
    pub dispatcher: Arc<Dispatcher>,
    pub controller: Arc<RetryController>,
    pub email: Arc<ScriptedSender>,
    pub sms: Arc<ScriptedSender>,
    pub in_app: Arc<ScriptedSender>,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(EngineConfig::default(), Vec::new())
    }

    /// Replace one channel's sender with a script; the rest always succeed.
    pub fn scripted(channel: Channel, steps: Vec<Step>) -> Self {
        Self::build(EngineConfig::default(), vec![(channel, steps)])
    }

    pub fn build(config: EngineConfig, scripts: Vec<(Channel, Vec<Step>)>) -> Self {
        let clock = Arc::new(FixedClock::new(ts(0)));
        let store = Arc::new(InMemoryNotificationStore::new());
        let queue = Arc::new(InMemoryDispatchQueue::new(
            clock.clone(),
            config.visibility_timeout,
            config.poll_interval,
        ));
        let ctx = EngineContext {
            store: store.clone(),
            queue: queue.clone(),
            clock: clock.clone(),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
        };

        let sender = |channel: Channel| {
            let steps = scripts
                .iter()
                .find(|(c, _)| *c == channel)
                .map(|(_, s)| s.clone())
                .unwrap_or_default();
            Arc::new(ScriptedSender::new(channel, steps))
        };
        let (email, sms, in_app) = (sender(Channel::Email), sender(Channel::Sms), sender(Channel::InApp));
        let mut registry = SenderRegistry::new();
        registry.register(email.clone()).unwrap();
        registry.register(sms.clone()).unwrap();
        registry.register(in_app.clone()).unwrap();

        let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));
        let controller = Arc::new(RetryController::new(
            ctx.clone(),
            registry,
            config.policies.clone(),
            config.send_timeout,
        ));

        Self {
            clock,
            store,
            queue,
            ctx,
            dispatcher,
            controller,
            email,
            sms,
            in_app,
            config,
        }
    }

    pub fn fresh_user_id(&self) -> UserId {
        self.ctx.ids.generate_user_id()
    }

    /// A user with every channel on and full contact data.
    pub async fn user(&self) -> UserId {
        self.user_with(|_| {}).await
    }

    pub async fn user_with(&self, tweak: impl FnOnce(&mut User)) -> UserId {
        let id = self.fresh_user_id();
        let contact = ContactInfo {
            email: Some("someone@example.com".into()),
            phone: Some("+15550100".into()),
        };
        let mut user = User::provisioned(id, contact, self.clock.now());
        tweak(&mut user);
        self.store.upsert_user(user).await.unwrap();
        id
    }

    /// Dequeue, process and ack one visible job.
    pub async fn run_next(&self) -> Option<ProcessOutcome> {
        let job = self.queue.try_dequeue().await.unwrap()?;
        let outcome = self.controller.process(&job).await.unwrap();
        self.queue.ack(job.id).await.unwrap();
        Some(outcome)
    }

    /// Run jobs until none is visible at the current time.
    pub async fn drain(&self) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

