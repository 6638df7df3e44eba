use super::SubscriberEmail;
use super::SubscriberName;

/// Values of the `unsubscribed` column that mark a contact as inactive.
/// Anything else (including blank) keeps the contact active.
const UNSUBSCRIBED_VALUES: [&str; 4] = ["1", "true", "yes", "y"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Active,
    Unsubscribed,
}

impl Subscription {
    /// Parse the raw `unsubscribed` cell (case-insensitive, surrounding
    /// whitespace ignored).
    pub fn from_unsubscribed_flag(raw: &str) -> Self {
        let raw = raw.trim().to_lowercase();
        match UNSUBSCRIBED_VALUES.contains(&raw.as_str()) {
            true => Self::Unsubscribed,
            false => Self::Active,
        }
    }

    pub fn is_active(self) -> bool { self == Self::Active }
}

/// A validated row, ready to be serialized for either upload mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub email: SubscriberEmail,
    pub name: SubscriberName,
    pub subscription: Subscription,
}

impl SubscriberRecord {
    pub fn is_active(&self) -> bool { self.subscription.is_active() }
}
