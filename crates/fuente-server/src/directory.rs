//! Availability directory and matcher.
//!
//! Tracks who is seeking a peer right now. Entries are removed when the user
//! is matched, withdraws, or disconnects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use fuente_shared::protocol::{PeerFilters, PeerProfile, PeerSummary};
use fuente_shared::{ConversationId, UserId};

use crate::conversation::ConversationManager;
use crate::error::EngineError;
use crate::gateway::ConnectionId;
use crate::identity::IdentityRegistry;
use crate::trust;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityEntry {
    pub user_id: UserId,
    pub profile: PeerProfile,
    pub connection: ConnectionId,
    /// Position in the waiting line; lower has waited longer.
    seq: u64,
}

impl AvailabilityEntry {
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.user_id,
            profile: self.profile.clone(),
        }
    }
}

/// Result of a confirmed match.
#[derive(Debug, Clone)]
pub struct ConfirmedMatch {
    pub conversation_id: ConversationId,
    pub requester: UserId,
    /// The requester's own entry, if they had declared availability.
    pub requester_entry: Option<AvailabilityEntry>,
    pub peer: AvailabilityEntry,
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    entries: HashMap<UserId, AvailabilityEntry>,
    next_seq: u64,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert. A user who refreshes their profile keeps their place in line.
    pub fn set_available(&mut self, user_id: UserId, profile: PeerProfile, connection: ConnectionId) {
        let seq = match self.entries.get(&user_id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.entries.insert(
            user_id,
            AvailabilityEntry {
                user_id,
                profile,
                connection,
                seq,
            },
        );
        info!(user = %user_id.short(), available = self.entries.len(), "Peer available");
    }

    pub fn withdraw(&mut self, user_id: &UserId) -> Option<AvailabilityEntry> {
        let removed = self.entries.remove(user_id);
        if removed.is_some() {
            debug!(user = %user_id.short(), "Peer withdrawn");
        }
        removed
    }

    #[cfg(test)]
    pub fn get(&self, user_id: &UserId) -> Option<&AvailabilityEntry> {
        self.entries.get(user_id)
    }

    pub fn is_available(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Entries passing `filters`, longest-waiting first.
    pub fn list(&self, filters: &PeerFilters) -> Vec<PeerSummary> {
        self.in_line()
            .into_iter()
            .filter(|e| filters.matches(&e.profile))
            .map(AvailabilityEntry::summary)
            .collect()
    }

    pub fn find_match(
        &self,
        requester: &UserId,
        filters: &PeerFilters,
        identities: &IdentityRegistry,
    ) -> Option<&AvailabilityEntry> {
        self.find_match_at(requester, filters, identities, Utc::now())
    }

    /// Best compatible candidate: highest trust first, then longest waiting.
    pub fn find_match_at(
        &self,
        requester: &UserId,
        filters: &PeerFilters,
        identities: &IdentityRegistry,
        now: DateTime<Utc>,
    ) -> Option<&AvailabilityEntry> {
        let requester_record = identities.get(requester)?;

        let mut candidates: Vec<(i32, &AvailabilityEntry)> = self
            .in_line()
            .into_iter()
            .filter(|e| e.user_id != *requester && filters.matches(&e.profile))
            .filter_map(|e| {
                let record = identities.get(&e.user_id)?;
                trust::can_pair_at(requester_record, record, now)
                    .then(|| (trust::priority_at(record, now), e))
            })
            .collect();

        // Stable: equal priorities keep waiting-line order.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().next().map(|(_, e)| e)
    }

    /// Atomically take both users out of the directory and open their
    /// conversation. Fails with `PeerUnavailable` if the peer's entry is gone.
    pub fn confirm_match(
        &mut self,
        requester: UserId,
        peer: UserId,
        conversations: &mut ConversationManager,
    ) -> Result<ConfirmedMatch, EngineError> {
        if requester == peer || !self.entries.contains_key(&peer) {
            return Err(EngineError::PeerUnavailable);
        }
        if conversations.active_for(&peer).is_some() {
            return Err(EngineError::PeerUnavailable);
        }
        if conversations.active_for(&requester).is_some() {
            return Err(EngineError::AlreadyInConversation);
        }

        let conversation_id = conversations.create(requester, peer)?;
        let requester_entry = self.entries.remove(&requester);
        let peer_entry = self
            .entries
            .remove(&peer)
            .ok_or(EngineError::PeerUnavailable)?;

        info!(
            conversation = %conversation_id,
            requester = %requester.short(),
            peer = %peer.short(),
            "Match confirmed"
        );

        Ok(ConfirmedMatch {
            conversation_id,
            requester,
            requester_entry,
            peer: peer_entry,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn in_line(&self) -> Vec<&AvailabilityEntry> {
        let mut entries: Vec<&AvailabilityEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}
