use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::domain::{Channel, ContactInfo, NotificationId, NotificationStatus, Priority, User, UserId};
use herald_core::impls::LoggingSender;
use herald_core::ports::{ChannelSender, OutboundMessage, SendError};
use herald_core::{EngineBuilder, EngineConfig, SubmitRequest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

/// Email sender that fails its first `n` attempts.
struct FlakyEmail {
    remaining_failures: AtomicU32,
}

impl FlakyEmail {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl ChannelSender for FlakyEmail {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<bool, SendError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            tracing::warn!(to = %message.recipient, left, "email bounced");
            return Ok(false);
        }
        tracing::info!(to = %message.recipient, subject = %message.subject, "email sent");
        Ok(true)
    }
}

async fn wait_terminal(
    dispatcher: &herald_core::app::Dispatcher,
    id: NotificationId,
    limit: Duration,
) -> anyhow::Result<NotificationStatus> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let status = dispatcher.status(id).await?.status;
        if status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,herald_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = EngineConfig::from_env()?;
    // Short backoff so the demo retries within a few seconds.
    for channel in Channel::ALL {
        config.policies.for_channel_mut(channel).base_delay = Duration::from_secs(1);
    }

    let engine = EngineBuilder::new(config)
        .sender(Arc::new(FlakyEmail::new(2)))?
        .sender(Arc::new(LoggingSender::new(Channel::Sms)))?
        .sender(Arc::new(LoggingSender::new(Channel::InApp)))?
        .build()?;
    let handle = engine.start();

    let ctx = engine.context();
    let user_id = UserId::from_ulid(Ulid::new());
    let mut user = User::provisioned(
        user_id,
        ContactInfo {
            email: Some("demo@example.com".into()),
            phone: Some("+15550100".into()),
        },
        ctx.clock.now(),
    );
    user.sms_enabled = true;
    ctx.store.upsert_user(user).await?;

    let dispatcher = engine.dispatcher();
    let receipt = dispatcher
        .submit(
            SubmitRequest::new(user_id, Channel::ALL, "Welcome", "Thanks for signing up.")
                .with_priority(Priority::High),
        )
        .await?;
    tracing::info!(created = receipt.created.len(), "submitted");

    let wait = async {
        for created in &receipt.created {
            let status = wait_terminal(&dispatcher, created.id, Duration::from_secs(30)).await?;
            tracing::info!(id = %created.id, channel = %created.channel, %status, "settled");
        }
        anyhow::Ok(())
    };
    tokio::select! {
        result = wait => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    let status = engine.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    handle.shutdown_and_join().await;
    Ok(())
}
