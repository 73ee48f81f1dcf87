//! User as seen by the engine: channel switches and contact data.
//!
//! Users are owned by the surrounding system. The engine reads them and, on
//! first contact, provisions a minimal record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::errors::PreconditionFailure;
use super::ids::UserId;

/// Contact data a caller may supply alongside a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub in_app_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Minimal record for a user the engine has never seen.
    ///
    /// Email and in-app are on. SMS is on only when a phone number is known.
    pub fn provisioned(id: UserId, contact: ContactInfo, now: DateTime<Utc>) -> Self {
        let sms_enabled = contact.phone.is_some();
        Self {
            id,
            email: contact.email,
            phone: contact.phone,
            email_enabled: true,
            sms_enabled,
            in_app_enabled: true,
            created_at: now,
        }
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::InApp => self.in_app_enabled,
        }
    }

    /// Resolve the address a sender should deliver to.
    ///
    /// In-app delivery is addressed by user id and needs no contact field.
    pub fn recipient_for(&self, channel: Channel) -> Result<String, PreconditionFailure> {
        if !self.is_enabled(channel) {
            return Err(PreconditionFailure::ChannelDisabled(channel));
        }
        let address = match channel {
            Channel::Email => self.email.clone(),
            Channel::Sms => self.phone.clone(),
            Channel::InApp => Some(self.id.to_string()),
        };
        address
            .filter(|a| !a.trim().is_empty())
            .ok_or(PreconditionFailure::MissingContact(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn user_id() -> UserId {
        UserId::from_ulid(Ulid::new())
    }

    #[test]
    fn provisioned_user_without_phone_has_sms_disabled() {
        let user = User::provisioned(user_id(), ContactInfo::default(), Utc::now());
        assert!(user.email_enabled);
        assert!(user.in_app_enabled);
        assert!(!user.sms_enabled);
    }

    #[test]
    fn provisioned_user_with_phone_has_sms_enabled() {
        let contact = ContactInfo {
            email: None,
            phone: Some("+15550100".into()),
        };
        let user = User::provisioned(user_id(), contact, Utc::now());
        assert!(user.sms_enabled);
        assert_eq!(user.recipient_for(Channel::Sms).unwrap(), "+15550100");
    }

    #[test]
    fn recipient_requires_enabled_channel_and_contact() {
        let mut user = User::provisioned(user_id(), ContactInfo::default(), Utc::now());
        assert_eq!(
            user.recipient_for(Channel::Email),
            Err(PreconditionFailure::MissingContact(Channel::Email))
        );
        assert_eq!(
            user.recipient_for(Channel::Sms),
            Err(PreconditionFailure::ChannelDisabled(Channel::Sms))
        );
        assert_eq!(user.recipient_for(Channel::InApp).unwrap(), user.id.to_string());

        user.email = Some("   ".into());
        assert!(user.recipient_for(Channel::Email).is_err());
    }
}
