//! Who else is typing
//!
//! Tracks remote users from inbound typing signals. An entry expires on its
//! own when no refresh arrives within the typing timeout, so a lost
//! `typing_stop` does not leave a stale indicator behind.

use std::collections::HashMap;
use std::time::Duration;

use chatwire_shared::TypingUpdate;
use tokio::time::Instant;

/// A remote user currently typing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: String,
    pub user_name: Option<String>,
}

#[derive(Debug)]
struct Entry {
    user_name: Option<String>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    own_user_id: Option<String>,
    entries: HashMap<String, Entry>,
}

impl TypingTracker {
    pub fn new(timeout: Duration, own_user_id: Option<String>) -> Self {
        Self {
            timeout,
            own_user_id,
            entries: HashMap::new(),
        }
    }

    /// Apply a typing signal. Returns true if the visible set changed.
    ///
    /// Expired entries are pruned first.
    pub fn apply(&mut self, update: &TypingUpdate, now: Instant) -> bool {
        if self.own_user_id.as_deref() == Some(update.user_id.as_str()) {
            return false;
        }
        self.prune(now);

        if update.typing {
            let expires_at = now + self.timeout;
            self.entries
                .insert(
                    update.user_id.clone(),
                    Entry {
                        user_name: update.user_name.clone(),
                        expires_at,
                    },
                )
                .is_none()
        } else {
            self.entries.remove(&update.user_id).is_some()
        }
    }

    /// Users typing at `now`, sorted by id. Expired entries are pruned.
    pub fn active(&mut self, now: Instant) -> Vec<TypingUser> {
        self.prune(now);

        let mut users: Vec<TypingUser> = self
            .entries
            .iter()
            .map(|(user_id, entry)| TypingUser {
                user_id: user_id.clone(),
                user_name: entry.user_name.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries held, including ones not yet pruned
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}
