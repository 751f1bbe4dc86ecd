use serde::{Deserialize, Serialize};
use std::fmt::Display;

mod event;
mod profile;
mod recommendation;

pub use event::{
    CartAction, FeedEntry, FeedPosition, OperationType, SourceCollection, TrackedEvent,
    TrackingRow,
};
pub use profile::{MetricName, Profile};
pub use recommendation::RecommendationRecord;

/// Key every behavior stream is attributed to: a session, a signed-in user, or the
/// shared guest bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorKey(String);

impl ActorKey {
    pub const GUEST: &'static str = "guest";

    /// Session id wins over user id; blank values count as missing.
    pub fn resolve(session_id: Option<&str>, user_id: Option<&str>) -> Self {
        let present = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(session) = present(session_id) {
            return Self(session);
        }
        if let Some(user) = present(user_id) {
            return Self(format!("user:{}", user));
        }
        Self(Self::GUEST.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ActorKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ActorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_takes_precedence() {
        let key = ActorKey::resolve(Some("abc123"), Some("42"));
        assert_eq!(key.as_str(), "abc123");
    }

    #[test]
    fn test_user_fallback() {
        let key = ActorKey::resolve(None, Some("42"));
        assert_eq!(key.as_str(), "user:42");
    }

    #[test]
    fn test_blank_session_falls_through_to_user() {
        let key = ActorKey::resolve(Some("  "), Some("42"));
        assert_eq!(key.as_str(), "user:42");
    }

    #[test]
    fn test_guest_when_anonymous() {
        let key = ActorKey::resolve(None, None);
        assert_eq!(key.as_str(), ActorKey::GUEST);
        assert_eq!(format!("{}", key), "guest");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = ActorKey::from("user:7");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"user:7\"");
    }
}
