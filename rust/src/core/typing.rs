// Typing indicators: outbound debounce plus inbound expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::state::TypingMember;

pub(crate) const TYPING_EVENT: &str = "typing";

/// Broadcast payload for the `typing` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TypingPayload {
    pub(crate) user_id: String,
    #[serde(default)]
    pub(crate) display_name: Option<String>,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    display_name: Option<String>,
    expires_at: Instant,
}

#[derive(Debug)]
pub(crate) struct TypingTracker {
    debounce: Duration,
    window: Duration,
    // (conversation_id, user_id) -> last announcement we sent
    last_announced: HashMap<(String, String), Instant>,
    // user_id -> entry, for the open conversation only
    active: HashMap<String, TypingEntry>,
}

impl TypingTracker {
    pub(crate) fn new(debounce: Duration, window: Duration) -> Self {
        Self {
            debounce,
            window,
            last_announced: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    /// Whether a local keystroke at `now` should go out on the wire.
    pub(crate) fn should_announce(
        &mut self,
        conversation_id: &str,
        user_id: &str,
        now: Instant,
    ) -> bool {
        let key = (conversation_id.to_string(), user_id.to_string());
        if let Some(prev) = self.last_announced.get(&key) {
            if now.saturating_duration_since(*prev) < self.debounce {
                return false;
            }
        }
        self.last_announced.insert(key, now);
        true
    }

    /// Record an inbound signal. Signals from `my_user_id` are dropped.
    pub(crate) fn on_signal(
        &mut self,
        payload: TypingPayload,
        my_user_id: Option<&str>,
        now: Instant,
    ) -> bool {
        if my_user_id == Some(payload.user_id.as_str()) {
            return false;
        }
        self.active.insert(
            payload.user_id,
            TypingEntry {
                display_name: payload.display_name,
                expires_at: now + self.window,
            },
        );
        true
    }

    pub(crate) fn clear_user(&mut self, user_id: &str) -> bool {
        self.active.remove(user_id).is_some()
    }

    /// Drop expired entries. Returns whether anything was removed.
    pub(crate) fn prune(&mut self, now: Instant) -> bool {
        let before = self.active.len();
        self.active.retain(|_, e| e.expires_at > now);
        self.active.len() != before
    }

    /// Currently typing members, sorted by user id.
    pub(crate) fn active(&mut self, now: Instant) -> Vec<TypingMember> {
        self.prune(now);
        let mut out: Vec<TypingMember> = self
            .active
            .iter()
            .map(|(user_id, e)| TypingMember {
                user_id: user_id.clone(),
                display_name: e.display_name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    /// Forget inbound entries (conversation switch or channel teardown).
    pub(crate) fn clear(&mut self) {
        self.active.clear();
    }

    pub(crate) fn reset_announcements(&mut self) {
        self.last_announced.clear();
    }
}
