//! Engine configuration.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{BackoffPolicy, Channel, ChannelPolicies};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    /// A lease must outlive the longest send, or a job still being sent is
    /// handed to a second worker.
    #[error(
        "visibility timeout ({visibility_secs}s) must be longer than the send timeout ({send_timeout_secs}s)"
    )]
    LeaseShorterThanSend {
        visibility_secs: u64,
        send_timeout_secs: u64,
    },
}

fn env_prefix(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "HERALD_EMAIL",
        Channel::Sms => "HERALD_SMS",
        Channel::InApp => "HERALD_IN_APP",
    }
}

const DAY: Duration = Duration::from_secs(86_400);

/// Tunables for the whole engine.
///
/// `Default` gives production values. Override from the environment with
/// [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Concurrent dispatch workers.
    pub workers: usize,

    /// Upper bound on one sender call. Exceeding it counts as a failed attempt.
    pub send_timeout: Duration,

    /// How long a dequeued job stays leased before it is handed out again.
    pub visibility_timeout: Duration,

    /// Longest a blocked dequeue waits before re-checking the lanes.
    pub poll_interval: Duration,

    /// Rows older than this are removed by cleanup.
    pub retention: Duration,

    pub digest_interval: Duration,

    /// How far back the digest looks for unread notifications.
    pub digest_window: Duration,

    pub cleanup_interval: Duration,
    pub reconcile_interval: Duration,

    /// Pending rows younger than this are never touched by the reconciler.
    pub reconcile_grace: Duration,

    pub policies: ChannelPolicies,

    /// When set, auto-provisioned users without an e-mail address get
    /// `user_<id>@<domain>`.
    pub placeholder_email_domain: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            send_timeout: Duration::from_secs(30),
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            retention: DAY * 90,
            digest_interval: DAY,
            digest_window: DAY,
            cleanup_interval: DAY * 7,
            reconcile_interval: Duration::from_secs(60),
            reconcile_grace: Duration::from_secs(120),
            policies: ChannelPolicies::default(),
            placeholder_email_domain: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default  |
    /// |----------------------------------|----------|
    /// | `HERALD_WORKERS`                 | `4`      |
    /// | `HERALD_SEND_TIMEOUT_SECS`       | `30`     |
    /// | `HERALD_VISIBILITY_TIMEOUT_SECS` | `300`    |
    /// | `HERALD_POLL_INTERVAL_SECS`      | `1`      |
    /// | `HERALD_RETENTION_DAYS`          | `90`     |
    /// | `HERALD_DIGEST_INTERVAL_SECS`    | `86400`  |
    /// | `HERALD_DIGEST_WINDOW_SECS`      | `86400`  |
    /// | `HERALD_CLEANUP_INTERVAL_SECS`   | `604800` |
    /// | `HERALD_RECONCILE_INTERVAL_SECS` | `60`     |
    /// | `HERALD_RECONCILE_GRACE_SECS`    | `120`    |
    /// | `HERALD_BACKOFF_CEILING_SECS`    | `600`    |
    /// | `HERALD_EMAIL_BASE_DELAY_SECS`   | `60`     |
    /// | `HERALD_EMAIL_MAX_RETRIES`       | `3`      |
    /// | `HERALD_SMS_BASE_DELAY_SECS`     | `60`     |
    /// | `HERALD_SMS_MAX_RETRIES`         | `3`      |
    /// | `HERALD_IN_APP_BASE_DELAY_SECS`  | `30`     |
    /// | `HERALD_IN_APP_MAX_RETRIES`      | `2`      |
    /// | `HERALD_PLACEHOLDER_EMAIL_DOMAIN`| unset    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut config = Self::default();

        if let Some(n) = env.parse::<usize>("HERALD_WORKERS")? {
            if n == 0 {
                return Err(env.invalid("HERALD_WORKERS"));
            }
            config.workers = n;
        }
        env.secs("HERALD_SEND_TIMEOUT_SECS", &mut config.send_timeout)?;
        env.secs("HERALD_VISIBILITY_TIMEOUT_SECS", &mut config.visibility_timeout)?;
        env.secs("HERALD_POLL_INTERVAL_SECS", &mut config.poll_interval)?;
        if let Some(days) = env.positive("HERALD_RETENTION_DAYS")? {
            config.retention = Duration::from_secs(days.saturating_mul(86_400));
        }
        env.secs("HERALD_DIGEST_INTERVAL_SECS", &mut config.digest_interval)?;
        env.secs("HERALD_DIGEST_WINDOW_SECS", &mut config.digest_window)?;
        env.secs("HERALD_CLEANUP_INTERVAL_SECS", &mut config.cleanup_interval)?;
        env.secs("HERALD_RECONCILE_INTERVAL_SECS", &mut config.reconcile_interval)?;
        env.secs("HERALD_RECONCILE_GRACE_SECS", &mut config.reconcile_grace)?;

        let mut ceiling = None;
        if let Some(secs) = env.positive("HERALD_BACKOFF_CEILING_SECS")? {
            ceiling = Some(Duration::from_secs(secs));
        }
        for channel in Channel::ALL {
            let prefix = env_prefix(channel);
            let policy: &mut BackoffPolicy = config.policies.for_channel_mut(channel);
            if let Some(c) = ceiling {
                policy.ceiling = c;
            }
            env.secs(&format!("{prefix}_BASE_DELAY_SECS"), &mut policy.base_delay)?;
            let key = format!("{prefix}_MAX_RETRIES");
            if let Some(n) = env.positive(&key)? {
                policy.max_retries = u32::try_from(n).map_err(|_| env.invalid(&key))?;
            }
        }

        config.placeholder_email_domain = env
            .get("HERALD_PLACEHOLDER_EMAIL_DOMAIN")
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks. Run by `from_lookup` and again by the engine
    /// builder, so hand-built configs get the same treatment.
    ///
    /// - every channel allows at least one attempt (`max_retries >= 1`);
    ///   with a zero budget the first failure would already record more
    ///   attempts than the channel allows
    /// - `visibility_timeout > send_timeout`
    pub fn validate(&self) -> Result<(), ConfigError> {
        for channel in Channel::ALL {
            if self.policies.for_channel(channel).max_retries == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("{}_MAX_RETRIES", env_prefix(channel)),
                    value: "0".into(),
                });
            }
        }
        if self.visibility_timeout <= self.send_timeout {
            return Err(ConfigError::LeaseShorterThanSend {
                visibility_secs: self.visibility_timeout.as_secs(),
                send_timeout_secs: self.send_timeout.as_secs(),
            });
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn invalid(&self, key: &str) -> ConfigError {
        ConfigError::Invalid {
            key: key.to_string(),
            value: self.get(key).unwrap_or_default(),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key)),
        }
    }

    fn positive(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.parse::<u64>(key)? {
            Some(0) => Err(self.invalid(key)),
            other => Ok(other),
        }
    }

    fn secs(&self, key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        if let Some(secs) = self.positive(key)? {
            *slot = Duration::from_secs(secs);
        }
        Ok(())
    }
}
