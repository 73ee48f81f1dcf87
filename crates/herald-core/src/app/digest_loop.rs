//! Daily digest: one low-priority e-mail summarising a user's unread
//! notifications from the last window.
//!
//! Digests go through [`Dispatcher::submit`] like any other notification, so
//! they get the same retry and backoff treatment. A per-user, per-UTC-day
//! claim in the store keeps a second run on the same day from sending again.
//! The claim is taken before the submit and released if the submit fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::context::EngineContext;
use crate::app::orchestrator::{Dispatcher, SubmitRequest};
use crate::app::scheduler::ScheduledJob;
use crate::domain::{Channel, EngineError, Notification, Priority, UserId};
use crate::ports::to_chrono;

pub const DIGEST_SUBJECT: &str = "Your Daily Notification Digest";

/// Metadata key that marks a notification as a digest.
pub const DIGEST_DATE_KEY: &str = "digest_date";

const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestReport {
    /// Users with at least one unread notification in the window.
    pub candidates: usize,
    pub submitted: usize,
    pub already_sent: usize,
    /// Email switched off or user record missing.
    pub ineligible: usize,
    pub errors: usize,
}

/// The digest as a [`ScheduledJob`].
pub struct DailyDigest {
    ctx: EngineContext,
    dispatcher: Arc<Dispatcher>,
    window: Duration,
    interval: Duration,
}

impl DailyDigest {
    pub fn new(
        ctx: EngineContext,
        dispatcher: Arc<Dispatcher>,
        window: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            ctx,
            dispatcher,
            window,
            interval,
        }
    }

    pub async fn run_once(&self) -> Result<DigestReport, EngineError> {
        let now = self.ctx.clock.now();
        let since = now - to_chrono(self.window);
        let day = now.date_naive();

        let mut by_user: BTreeMap<UserId, Vec<Notification>> = BTreeMap::new();
        for row in self.ctx.store.list_unread_since(since).await? {
            if row.metadata.get(DIGEST_DATE_KEY).is_some() {
                continue;
            }
            by_user.entry(row.user_id).or_default().push(row);
        }

        let mut report = DigestReport {
            candidates: by_user.len(),
            ..DigestReport::default()
        };

        for (user_id, rows) in by_user {
            match self.ctx.store.get_user(user_id).await {
                Ok(Some(user)) if user.email_enabled => {}
                Ok(_) => {
                    report.ineligible += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "digest user lookup failed");
                    report.errors += 1;
                    continue;
                }
            }

            match self.ctx.store.claim_digest(user_id, day).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%user_id, %day, "digest already sent today");
                    report.already_sent += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "digest claim failed");
                    report.errors += 1;
                    continue;
                }
            }

            let request = SubmitRequest::new(user_id, [Channel::Email], DIGEST_SUBJECT, render_body(&rows))
                .with_priority(Priority::Low)
                .with_metadata(serde_json::json!({
                    (DIGEST_DATE_KEY): day.to_string(),
                    "source_count": rows.len(),
                }));
            match self.dispatcher.submit(request).await {
                Ok(receipt) if !receipt.created.is_empty() => {
                    tracing::info!(%user_id, notifications = rows.len(), "digest scheduled");
                    report.submitted += 1;
                }
                Ok(_) => report.ineligible += 1,
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "digest submit failed, releasing claim");
                    report.errors += 1;
                    if let Err(e) = self.ctx.store.release_digest(user_id, day).await {
                        tracing::error!(%user_id, %day, error = %e, "digest claim not released; no digest today");
                    }
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl ScheduledJob for DailyDigest {
    fn name(&self) -> &'static str {
        "daily_digest"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<u64, EngineError> {
        let report = self.run_once().await?;
        tracing::info!(
            candidates = report.candidates,
            submitted = report.submitted,
            already_sent = report.already_sent,
            ineligible = report.ineligible,
            errors = report.errors,
            "daily digest run"
        );
        Ok(report.submitted as u64)
    }
}

/// Digest text: the subject line, then one `subject: excerpt...` line per row.
pub fn render_body(rows: &[Notification]) -> String {
    let mut body = String::new();
    body.push_str(DIGEST_SUBJECT);
    body.push('\n');
    body.push_str("You have the following unread notifications:\n\n");
    for row in rows {
        let excerpt: String = row.body.chars().take(EXCERPT_CHARS).collect();
        body.push_str(&format!("{}: {}...\n", row.subject, excerpt));
    }
    body.push_str("\nLogin to your account to view all notifications.\n");
    body
}
