//! Dispatch orchestrator: the entry point for the request layer.
//!
//! `submit` writes every notification of a request (and any provisioned
//! user) in one store call, then enqueues one job per notification. A crash
//! between the two leaves Queued rows with no job, which the reconciler
//! picks up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::context::EngineContext;
use crate::domain::{
    Channel, ContactInfo, EngineError, JobId, NewNotification, Notification, NotificationId,
    NotificationStatus, Priority, User, UserId,
};
use crate::ports::{ListQuery, Page, modify_notification};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user_id: UserId,
    pub channels: Vec<Channel>,
    pub message: Message,
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Overrides `metadata["priority"]`. Medium when neither is given.
    pub priority: Option<Priority>,

    /// Not-before for the first attempt. Immediate when absent.
    pub schedule_time: Option<DateTime<Utc>>,

    /// Used only when the user has to be provisioned.
    pub contact: Option<ContactInfo>,
}

impl SubmitRequest {
    pub fn new(
        user_id: UserId,
        channels: impl IntoIterator<Item = Channel>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            channels: channels.into_iter().collect(),
            message: Message {
                subject: subject.into(),
                body: body.into(),
            },
            metadata: serde_json::Value::Null,
            priority: None,
            schedule_time: None,
            contact: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_time = Some(at);
        self
    }

    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = Some(contact);
        self
    }

    fn resolved_priority(&self) -> Priority {
        self.priority
            .or_else(|| Priority::from_metadata(&self.metadata))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedNotification {
    pub id: NotificationId,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub task_ref: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// In request order.
    pub created: Vec<CreatedNotification>,

    /// Requested channels the user has switched off.
    pub skipped: Vec<Channel>,

    pub user_provisioned: bool,
}

impl SubmitReceipt {
    /// The first created notification, for callers that track only one.
    pub fn primary(&self) -> Option<&CreatedNotification> {
        self.created.first()
    }
}

/// Request-facing side of the engine.
///
/// # Submit flow
/// 1. Look up the user, provisioning one with defaults if it is unknown
/// 2. Create one Queued row per enabled channel, duplicates collapsed
/// 3. Write the rows (and the new user) with a single `create_batch`
/// 4. Enqueue each row's first job
///
/// An enqueue failure in step 4 is logged and left to the reconciler; the
/// rows are already committed.
pub struct Dispatcher {
    ctx: EngineContext,
    placeholder_email_domain: Option<String>,
}

impl Dispatcher {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            placeholder_email_domain: None,
        }
    }

    /// Give provisioned users without an address `user_<id>@<domain>`.
    pub fn with_placeholder_email_domain(mut self, domain: Option<String>) -> Self {
        self.placeholder_email_domain = domain;
        self
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        let now = self.ctx.clock.now();

        let (user, provisioned) = match self.ctx.store.get_user(request.user_id).await? {
            Some(user) => (user, None),
            None => {
                let user = self.provision(&request, now);
                tracing::info!(
                    user_id = %user.id,
                    sms_enabled = user.sms_enabled,
                    "provisioning unknown user"
                );
                (user.clone(), Some(user))
            }
        };

        let priority = request.resolved_priority();
        let mut channels: Vec<Channel> = Vec::with_capacity(request.channels.len());
        for channel in &request.channels {
            if !channels.contains(channel) {
                channels.push(*channel);
            }
        }

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        for channel in channels {
            if !user.is_enabled(channel) {
                tracing::info!(user_id = %user.id, %channel, "channel disabled, not creating");
                skipped.push(channel);
                continue;
            }
            rows.push(Notification::new(
                NewNotification {
                    id: self.ctx.ids.generate_notification_id(),
                    user_id: user.id,
                    channel,
                    subject: request.message.subject.clone(),
                    body: request.message.body.clone(),
                    priority,
                    task_ref: self.ctx.ids.generate_job_id(),
                    scheduled_for: request.schedule_time,
                    metadata: request.metadata.clone(),
                },
                now,
            ));
        }

        let user_provisioned = provisioned.is_some();
        if rows.is_empty() && provisioned.is_none() {
            return Ok(SubmitReceipt {
                created: Vec::new(),
                skipped,
                user_provisioned,
            });
        }
        self.ctx.store.create_batch(provisioned, rows.clone()).await?;

        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(job) = row.current_job() else {
                continue;
            };
            match self.ctx.queue.enqueue(job.clone()).await {
                Ok(()) => tracing::info!(
                    notification_id = %row.id,
                    channel = %row.channel,
                    job_id = %job.id,
                    %priority,
                    "notification queued"
                ),
                Err(e) => tracing::warn!(
                    notification_id = %row.id,
                    job_id = %job.id,
                    error = %e,
                    "enqueue failed after commit; reconciler will re-enqueue"
                ),
            }
            created.push(CreatedNotification {
                id: row.id,
                channel: row.channel,
                status: row.status,
                task_ref: job.id,
            });
        }

        Ok(SubmitReceipt {
            created,
            skipped,
            user_provisioned,
        })
    }

    /// Queued or Sending -> Failed. Pending jobs are dropped from the queue on
    /// a best-effort basis; a job already running sees Failed when it writes
    /// its outcome.
    pub async fn cancel(&self, id: NotificationId) -> Result<Notification, EngineError> {
        let now = self.ctx.clock.now();
        let (row, ()) = modify_notification(self.ctx.store.as_ref(), id, |n| {
            if !n.status.is_pending() {
                return Err(EngineError::InvalidState { id, status: n.status });
            }
            n.mark_failed(now)
        })
        .await?
        .ok_or(EngineError::NotFound(id))?;

        match self.ctx.queue.remove(&row.job_key()).await {
            Ok(removed) => tracing::info!(notification_id = %id, removed, "notification cancelled"),
            Err(e) => tracing::warn!(notification_id = %id, error = %e, "cancelled, queue drop failed"),
        }
        Ok(row)
    }

    /// Last committed state.
    pub async fn status(&self, id: NotificationId) -> Result<Notification, EngineError> {
        self.ctx
            .store
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Delivered -> Read.
    pub async fn mark_read(&self, id: NotificationId) -> Result<Notification, EngineError> {
        let now = self.ctx.clock.now();
        let (row, ()) = modify_notification(self.ctx.store.as_ref(), id, |n| {
            if n.status != NotificationStatus::Delivered {
                return Err(EngineError::InvalidState { id, status: n.status });
            }
            n.mark_read(now)
        })
        .await?
        .ok_or(EngineError::NotFound(id))?;
        Ok(row)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Page<Notification>, EngineError> {
        Ok(self.ctx.store.list(query).await?)
    }

    fn provision(&self, request: &SubmitRequest, now: DateTime<Utc>) -> User {
        let mut contact = request.contact.clone().unwrap_or_default();
        if contact.email.is_none()
            && let Some(domain) = &self.placeholder_email_domain
        {
            contact.email = Some(format!("user_{}@{domain}", request.user_id.as_ulid()));
        }
        User::provisioned(request.user_id, contact, now)
    }
}
