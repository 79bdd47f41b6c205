//! Subscribers and their event filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Event;

/// Game id pattern that matches every event.
pub const MATCH_ALL: &str = "#";

/// Check whether a game id matches a subscription pattern.
///
/// Patterns are exact ids, `#` for everything, or a hierarchical prefix:
/// `studio` matches `studio.racer` and `studio.racer.beta` but not
/// `studioextra`.
pub fn game_matches(game_id: &str, pattern: &str) -> bool {
    if pattern == MATCH_ALL || game_id == pattern {
        return true;
    }
    game_id
        .strip_prefix(pattern)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Predicate over an event's game id and tags.
///
/// Empty lists place no constraint. Evaluation is a pure function of
/// `(event, filter)` so retried dispatch always reaches the same answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberFilter {
    /// Game id patterns; the event must match at least one.
    #[serde(default)]
    pub game_ids: Vec<String>,
    /// The event must carry at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SubscriberFilter {
    /// Filter accepting every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn games<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            game_ids: patterns.into_iter().map(Into::into).collect(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        let game_ok = self.game_ids.is_empty()
            || self
                .game_ids
                .iter()
                .any(|pattern| game_matches(&event.game_id, pattern));
        let tag_ok = self.tags.is_empty() || self.tags.iter().any(|tag| event.has_tag(tag));
        game_ok && tag_ok
    }

    /// Reject patterns and tags that can never match anything sensible.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(bad) = self
            .game_ids
            .iter()
            .find(|p| p.trim().is_empty() || p.starts_with('.') || p.ends_with('.'))
        {
            return Err(format!("invalid game id pattern {:?}", bad));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err("tags must not be blank".to_string());
        }
        Ok(())
    }
}

/// A registered player.
///
/// Never deleted: deactivation flips `active` so the audit trail of past
/// deliveries keeps a subscriber to point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub player_id: String,
    pub filter: SubscriberFilter,
    pub endpoint: String,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(
        player_id: impl Into<String>,
        filter: SubscriberFilter,
        endpoint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            player_id: player_id.into(),
            filter,
            endpoint: endpoint.into(),
            active: true,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Active subscribers whose filter accepts the event.
    pub fn wants(&self, event: &Event) -> bool {
        self.active && self.filter.matches(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewEvent;

    fn event(game_id: &str, tags: &[&str]) -> Event {
        NewEvent::new(game_id, bytes::Bytes::new())
            .with_tags(tags.iter().copied())
            .into_event(1, Utc::now())
    }

    #[test]
    fn test_game_matches_exact() {
        assert!(game_matches("racer", "racer"));
        assert!(!game_matches("racer", "puzzler"));
    }

    #[test]
    fn test_game_matches_wildcard() {
        assert!(game_matches("racer", "#"));
        assert!(game_matches("studio.anything", "#"));
    }

    #[test]
    fn test_game_matches_hierarchical() {
        assert!(game_matches("studio.racer", "studio"));
        assert!(game_matches("studio.racer.beta", "studio"));
        assert!(!game_matches("studio", "studio.racer"));
        assert!(!game_matches("studioextra", "studio")); // No dot separator
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SubscriberFilter::all();
        assert!(filter.matches(&event("racer", &[])));
        assert!(filter.matches(&event("studio.puzzler", &["beta"])));
    }

    #[test]
    fn test_filter_requires_game_and_tag() {
        let filter = SubscriberFilter::games(["studio"]).with_tags(["beta", "alpha"]);

        assert!(filter.matches(&event("studio.racer", &["beta"])));
        assert!(filter.matches(&event("studio", &["pc", "alpha"])));
        assert!(!filter.matches(&event("studio.racer", &["pc"])));
        assert!(!filter.matches(&event("other", &["beta"])));
    }

    #[test]
    fn test_filter_is_deterministic() {
        let filter = SubscriberFilter::games(["racer"]);
        let e = event("racer", &[]);
        let first = filter.matches(&e);
        for _ in 0..10 {
            assert_eq!(filter.matches(&e), first);
        }
    }

    #[test]
    fn test_validate_rejects_blank_patterns() {
        assert!(SubscriberFilter::games([""]).validate().is_err());
        assert!(SubscriberFilter::games([".studio"]).validate().is_err());
        assert!(SubscriberFilter::games(["studio."]).validate().is_err());
        assert!(SubscriberFilter::all().with_tags([" "]).validate().is_err());
        assert!(SubscriberFilter::games(["studio", "#"]).validate().is_ok());
    }

    #[test]
    fn test_inactive_subscriber_wants_nothing() {
        let mut sub = Subscriber::new("p1", SubscriberFilter::all(), "http://localhost/hook");
        assert!(sub.wants(&event("racer", &[])));
        sub.active = false;
        assert!(!sub.wants(&event("racer", &[])));
    }
}
