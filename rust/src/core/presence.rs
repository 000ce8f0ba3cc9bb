use std::collections::BTreeSet;

/// Online session keys for one conversation, as last reported by the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub conversation_id: String,
    pub member_refs: BTreeSet<String>,
}

/// Tracks presence for the open conversation only. Ephemeral: rebuilt from
/// the next sync after every (re)connect.
#[derive(Debug, Default)]
pub(crate) struct PresenceTracker {
    snapshot: Option<PresenceSnapshot>,
}

impl PresenceTracker {
    /// Forget everything and start tracking `conversation_id` (or nothing).
    pub(crate) fn reset(&mut self, conversation_id: Option<&str>) {
        self.snapshot = conversation_id.map(|id| PresenceSnapshot {
            conversation_id: id.to_string(),
            member_refs: BTreeSet::new(),
        });
    }

    /// Clear the member set but keep tracking the same conversation.
    pub(crate) fn clear(&mut self) {
        if let Some(s) = self.snapshot.as_mut() {
            s.member_refs.clear();
        }
    }

    /// Replace the member set wholesale. Returns whether anything changed.
    pub(crate) fn replace(
        &mut self,
        conversation_id: &str,
        member_refs: impl IntoIterator<Item = String>,
    ) -> bool {
        let Some(s) = self.snapshot.as_mut() else {
            return false;
        };
        if s.conversation_id != conversation_id {
            return false;
        }
        let next: BTreeSet<String> = member_refs.into_iter().collect();
        if next == s.member_refs {
            return false;
        }
        s.member_refs = next;
        true
    }

    pub(crate) fn member_count(&self, conversation_id: &str) -> u32 {
        match &self.snapshot {
            Some(s) if s.conversation_id == conversation_id => s.member_refs.len() as u32,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn sync_replaces_rather_than_merges() {
        let mut p = PresenceTracker::default();
        p.reset(Some("conv-1"));
        assert!(p.replace("conv-1", refs(&["alice", "bob"])));
        assert_eq!(p.member_count("conv-1"), 2);

        assert!(p.replace("conv-1", refs(&["carol"])));
        assert_eq!(p.member_count("conv-1"), 1);
    }

    #[test]
    fn repeated_keys_count_once() {
        let mut p = PresenceTracker::default();
        p.reset(Some("conv-1"));
        p.replace("conv-1", refs(&["alice", "alice"]));
        assert_eq!(p.member_count("conv-1"), 1);
        assert!(!p.replace("conv-1", refs(&["alice"])));
    }

    #[test]
    fn other_conversations_report_zero() {
        let mut p = PresenceTracker::default();
        assert_eq!(p.member_count("conv-1"), 0);
        p.reset(Some("conv-1"));
        assert!(!p.replace("conv-2", refs(&["alice"])));
        p.replace("conv-1", refs(&["alice"]));
        assert_eq!(p.member_count("conv-2"), 0);
    }

    #[test]
    fn clear_empties_until_next_sync() {
        let mut p = PresenceTracker::default();
        p.reset(Some("conv-1"));
        p.replace("conv-1", refs(&["alice", "bob"]));
        p.clear();
        assert_eq!(p.member_count("conv-1"), 0);
        assert!(p.replace("conv-1", refs(&["bob"])));
        assert_eq!(p.member_count("conv-1"), 1);
    }
}
