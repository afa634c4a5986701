//! Active one-to-one conversations and their in-memory history.
//!
//! A conversation is `Active` until it is frozen (no more messages, history
//! kept) or ended (removed). Ended conversations cannot be resumed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use fuente_shared::constants::MAX_MESSAGE_SIZE;
use fuente_shared::moderation::{self, Verdict};
use fuente_shared::protocol::ChatMessage;
use fuente_shared::{ConversationId, MessageId, UserId};

use crate::error::EngineError;
use crate::identity::IdentityRegistry;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_a: UserId,
    pub participant_b: UserId,
    messages: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    pub frozen: bool,
}

impl Conversation {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn includes(&self, user_id: &UserId) -> bool {
        self.participant_a == *user_id || self.participant_b == *user_id
    }

    /// The other participant, if `user_id` is one of the two.
    pub fn peer_of(&self, user_id: &UserId) -> Option<UserId> {
        if self.participant_a == *user_id {
            Some(self.participant_b)
        } else if self.participant_b == *user_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

/// A message accepted into a conversation.
#[derive(Debug, Clone)]
pub struct Posted {
    pub message: ChatMessage,
    pub recipient: UserId,
    /// Informational only; delivery never depends on it.
    pub allowed: bool,
    /// Sender-only caution.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    /// `None` when the reported user is unknown.
    pub report_count: Option<u32>,
    /// Conversations frozen by this report, with their participants.
    pub frozen: Vec<(ConversationId, [UserId; 2])>,
}

#[derive(Debug, Default)]
pub struct ConversationManager {
    conversations: HashMap<ConversationId, Conversation>,
    by_user: HashMap<UserId, ConversationId>,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, a: UserId, b: UserId) -> Result<ConversationId, EngineError> {
        self.create_at(a, b, Utc::now())
    }

    pub fn create_at(
        &mut self,
        a: UserId,
        b: UserId,
        now: DateTime<Utc>,
    ) -> Result<ConversationId, EngineError> {
        if a == b {
            return Err(EngineError::InvalidRequest(
                "a conversation needs two distinct participants".to_string(),
            ));
        }
        if self.by_user.contains_key(&a) || self.by_user.contains_key(&b) {
            return Err(EngineError::AlreadyInConversation);
        }

        let id = ConversationId::new();
        self.conversations.insert(
            id,
            Conversation {
                id,
                participant_a: a,
                participant_b: b,
                messages: Vec::new(),
                started_at: now,
                frozen: false,
            },
        );
        self.by_user.insert(a, id);
        self.by_user.insert(b, id);

        info!(conversation = %id, a = %a.short(), b = %b.short(), "Conversation started");
        Ok(id)
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn active_for(&self, user_id: &UserId) -> Option<ConversationId> {
        self.by_user.get(user_id).copied()
    }

    pub fn post_message(
        &mut self,
        id: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Posted, EngineError> {
        self.post_message_at(id, sender, body, Utc::now())
    }

    /// Moderate and append a message. The message is stored whatever the
    /// verdict; rejection only happens for a missing or frozen conversation
    /// or a sender who is not a participant.
    pub fn post_message_at(
        &mut self,
        id: &ConversationId,
        sender: &UserId,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<Posted, EngineError> {
        let conversation = self
            .conversations
            .get_mut(id)
            .filter(|c| !c.frozen)
            .ok_or(EngineError::ConversationUnavailable)?;
        let recipient = conversation
            .peer_of(sender)
            .ok_or(EngineError::ConversationUnavailable)?;

        if body.trim().is_empty() {
            return Err(EngineError::InvalidRequest("message is empty".to_string()));
        }
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(EngineError::InvalidRequest(format!(
                "message too large: {} bytes (max {})",
                body.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let Verdict {
            allowed,
            flags,
            warning,
        } = moderation::analyze(body);
        if !flags.is_empty() {
            debug!(conversation = %id, flags = flags.len(), allowed, "Message flagged");
        }
        let warning = warning.map(str::to_string);

        let message = ChatMessage {
            id: MessageId::new(),
            conversation_id: *id,
            sender_id: *sender,
            body: body.to_string(),
            timestamp: now,
            flags,
            warning: warning.clone(),
        };
        conversation.messages.push(message.clone());

        Ok(Posted {
            message,
            recipient,
            allowed,
            warning,
        })
    }

    /// Returns `true` if this call froze it.
    pub fn freeze(&mut self, id: &ConversationId) -> bool {
        match self.conversations.get_mut(id) {
            Some(conversation) if !conversation.frozen => {
                conversation.frozen = true;
                info!(conversation = %id, "Conversation frozen");
                true
            }
            _ => false,
        }
    }

    /// Remove the conversation and credit both participants. Ending an absent
    /// conversation is a no-op.
    pub fn end(
        &mut self,
        id: &ConversationId,
        identities: &mut IdentityRegistry,
    ) -> Option<Conversation> {
        let conversation = self.conversations.remove(id)?;
        for user in [conversation.participant_a, conversation.participant_b] {
            if self.by_user.get(&user) == Some(id) {
                self.by_user.remove(&user);
            }
            identities.record_conversation(&user);
        }

        info!(
            conversation = %id,
            messages = conversation.messages().len(),
            duration_secs = (Utc::now() - conversation.started_at).num_seconds(),
            "Conversation ended"
        );
        Some(conversation)
    }

    /// Downgrade the reported user and freeze their conversations once they
    /// reach `freeze_threshold` reports.
    pub fn report(
        &mut self,
        reporter: &UserId,
        reported: &UserId,
        reason: &str,
        identities: &mut IdentityRegistry,
        freeze_threshold: u32,
    ) -> Result<ReportOutcome, EngineError> {
        if reporter == reported {
            return Err(EngineError::InvalidRequest(
                "cannot report yourself".to_string(),
            ));
        }

        let Some(report_count) = identities.downgrade_trust(reported) else {
            warn!(reporter = %reporter.short(), "Report against unknown user ignored");
            return Ok(ReportOutcome::default());
        };

        info!(
            reported = %reported.short(),
            report_count,
            reason_len = reason.len(),
            "Peer reported"
        );

        let mut outcome = ReportOutcome {
            report_count: Some(report_count),
            frozen: Vec::new(),
        };

        if report_count >= freeze_threshold {
            let targets: Vec<ConversationId> = self
                .conversations
                .values()
                .filter(|c| c.includes(reported))
                .map(|c| c.id)
                .collect();
            for id in targets {
                if self.freeze(&id) {
                    if let Some(c) = self.conversations.get(&id) {
                        outcome.frozen.push((id, [c.participant_a, c.participant_b]));
                    }
                }
            }
        }

        Ok(outcome)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuente_shared::fingerprint::hash_fingerprint;
    use fuente_shared::moderation::{FlagKind, MEDICAL_ADVICE_WARNING};

    fn setup() -> (IdentityRegistry, ConversationManager, UserId, UserId) {
        let mut identities = IdentityRegistry::default();
        let a = identities
            .create_user(hash_fingerprint("a").unwrap())
            .unwrap()
            .user_id;
        let b = identities
            .create_user(hash_fingerprint("b").unwrap())
            .unwrap()
            .user_id;
        (identities, ConversationManager::new(), a, b)
    }

    #[test]
    fn test_one_conversation_per_user() {
        let (mut identities, mut conversations, a, b) = setup();
        let c = identities
            .create_user(hash_fingerprint("c").unwrap())
            .unwrap()
            .user_id;

        conversations.create(a, b).unwrap();
        assert_eq!(
            conversations.create(a, c).unwrap_err(),
            EngineError::AlreadyInConversation
        );
        assert!(conversations.create(c, c).is_err());
    }

    #[test]
    fn test_post_appends_in_order() {
        let (_, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();

        let first = conversations.post_message(&id, &a, "hello").unwrap();
        assert_eq!(first.recipient, b);
        assert!(first.allowed);
        assert_eq!(first.warning, None);
        conversations.post_message(&id, &b, "hi!").unwrap();

        let history = conversations.get(&id).unwrap().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "hello");
        assert_eq!(history[1].sender_id, b);
    }

    #[test]
    fn test_flagged_message_still_delivered() {
        let (_, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();

        let posted = conversations
            .post_message(&id, &a, "what medication dose do you take?")
            .unwrap();
        assert!(!posted.allowed);
        assert_eq!(posted.warning.as_deref(), Some(MEDICAL_ADVICE_WARNING));
        assert_eq!(posted.message.flags[0].kind, FlagKind::MedicalAdvice);
        assert_eq!(conversations.get(&id).unwrap().messages().len(), 1);
    }

    #[test]
    fn test_outsider_cannot_post() {
        let (_, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();
        assert_eq!(
            conversations
                .post_message(&id, &UserId::new(), "hey")
                .unwrap_err(),
            EngineError::ConversationUnavailable
        );
        assert!(conversations
            .post_message(&ConversationId::new(), &a, "hey")
            .is_err());
    }

    #[test]
    fn test_frozen_rejects_and_keeps_history() {
        let (_, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();
        conversations.post_message(&id, &a, "before").unwrap();

        assert!(conversations.freeze(&id));
        assert!(!conversations.freeze(&id));

        assert_eq!(
            conversations.post_message(&id, &b, "after").unwrap_err(),
            EngineError::ConversationUnavailable
        );
        assert_eq!(conversations.get(&id).unwrap().messages().len(), 1);
    }

    #[test]
    fn test_end_is_idempotent() {
        let (mut identities, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();

        assert!(conversations.end(&id, &mut identities).is_some());
        assert!(conversations.end(&id, &mut identities).is_none());

        assert_eq!(identities.get(&a).unwrap().conversation_count, 1);
        assert_eq!(identities.get(&b).unwrap().conversation_count, 1);
        assert_eq!(conversations.active_for(&a), None);
        assert!(conversations.is_empty());
    }

    #[test]
    fn test_third_report_freezes() {
        let (mut identities, mut conversations, a, b) = setup();
        let id = conversations.create(a, b).unwrap();

        for expected in 1..=2 {
            let outcome = conversations
                .report(&a, &b, "rude", &mut identities, 3)
                .unwrap();
            assert_eq!(outcome.report_count, Some(expected));
            assert!(outcome.frozen.is_empty());
        }
        assert!(!conversations.get(&id).unwrap().frozen);

        let outcome = conversations
            .report(&a, &b, "rude", &mut identities, 3)
            .unwrap();
        assert_eq!(outcome.frozen, vec![(id, [a, b])]);
        assert!(conversations.get(&id).unwrap().frozen);
        assert!(conversations.post_message(&id, &a, "still there?").is_err());
        assert!(conversations.get(&id).unwrap().messages().is_empty());
    }

    #[test]
    fn test_report_unknown_and_self() {
        let (mut identities, mut conversations, a, _) = setup();
        let outcome = conversations
            .report(&a, &UserId::new(), "", &mut identities, 3)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::default());
        assert!(conversations.report(&a, &a, "", &mut identities, 3).is_err());
    }
}
