//! The matching and relay engine.
//!
//! Owns the identity registry, the availability directory and the
//! conversation manager, and runs every multi-step flow (rate-limit check then
//! act, find then confirm, report then freeze) inside one `&mut self` call.
//! The gateway keeps the engine behind a single mutex, so each flow is atomic
//! with respect to every other inbound event.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use fuente_shared::constants::DEFAULT_FREEZE_REPORT_THRESHOLD;
use fuente_shared::fingerprint::hash_fingerprint;
use fuente_shared::protocol::{PeerFilters, PeerProfile, PeerSummary};
use fuente_shared::{ConversationId, UserId};

use crate::config::ServerConfig;
use crate::conversation::{Conversation, ConversationManager, Posted, ReportOutcome};
use crate::directory::{ConfirmedMatch, PeerDirectory};
use crate::error::EngineError;
use crate::gateway::ConnectionId;
use crate::identity::{IdentityRegistry, NewIdentity};
use crate::rate_limit::{ActionKind, RateDecision, RateLimiter};
use crate::trust;

/// Public trust figures for `GET /api/user/trust`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSummary {
    pub trust_level: i32,
    pub conversation_count: u32,
    /// Whole days
    pub account_age: i64,
}

pub struct Engine {
    identities: IdentityRegistry,
    directory: PeerDirectory,
    conversations: ConversationManager,
    limiter: RateLimiter,
    freeze_threshold: u32,
}

impl Engine {
    pub fn new(limiter: RateLimiter, max_identities_per_device: usize, freeze_threshold: u32) -> Self {
        Self {
            identities: IdentityRegistry::new(max_identities_per_device),
            directory: PeerDirectory::new(),
            conversations: ConversationManager::new(),
            limiter,
            freeze_threshold,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            RateLimiter::default(),
            config.max_identities_per_device,
            config.freeze_report_threshold,
        )
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    // -----------------------------------------------------------------------
    // Identity bootstrap
    // -----------------------------------------------------------------------

    pub fn create_identity(&mut self, raw_fingerprint: &str) -> Result<NewIdentity, EngineError> {
        let fingerprint = hash_fingerprint(raw_fingerprint)?;
        self.identities.create_user(fingerprint)
    }

    pub fn recover_identity(
        &mut self,
        phrase: &str,
        raw_fingerprint: &str,
    ) -> Result<UserId, EngineError> {
        let fingerprint = hash_fingerprint(raw_fingerprint)?;
        self.identities
            .recover_by_phrase(phrase, fingerprint)
            .map(|record| record.user_id)
            .ok_or(EngineError::RecoveryPhraseInvalid)
    }

    pub fn trust_summary(&self, user_id: &UserId) -> Option<TrustSummary> {
        let record = self.identities.get(user_id)?;
        let now = Utc::now();
        Some(TrustSummary {
            trust_level: trust::compute_trust_at(record, now),
            conversation_count: record.conversation_count,
            account_age: trust::account_age_days(record, now),
        })
    }

    /// Resolve the id a connection presents. Unknown or unparseable ids fail.
    pub fn authenticate(&mut self, raw_user_id: &str) -> Result<UserId, EngineError> {
        let user_id: UserId = raw_user_id
            .parse()
            .map_err(|_| EngineError::Authentication)?;
        if !self.identities.contains(&user_id) {
            return Err(EngineError::Authentication);
        }
        self.identities.touch_activity(&user_id);
        Ok(user_id)
    }

    // -----------------------------------------------------------------------
    // Availability and matching
    // -----------------------------------------------------------------------

    pub fn browse(&self, requester: &UserId, filters: &PeerFilters) -> Vec<PeerSummary> {
        self.directory
            .list(filters)
            .into_iter()
            .filter(|peer| peer.id != *requester)
            .collect()
    }

    pub fn set_available(
        &mut self,
        user_id: UserId,
        profile: PeerProfile,
        connection: ConnectionId,
    ) -> Result<(), EngineError> {
        if self.conversations.active_for(&user_id).is_some() {
            return Err(EngineError::AlreadyInConversation);
        }
        self.directory.set_available(user_id, profile, connection);
        Ok(())
    }

    pub fn withdraw(&mut self, user_id: &UserId) {
        self.directory.withdraw(user_id);
    }

    /// Pair with a specific peer picked from the list.
    pub fn request_chat(
        &mut self,
        requester: UserId,
        peer: UserId,
    ) -> Result<ConfirmedMatch, EngineError> {
        self.check_rate(&requester, ActionKind::UrgentRequest)?;

        if !self.directory.is_available(&peer) {
            return Err(EngineError::PeerUnavailable);
        }
        let compatible = match (self.identities.get(&requester), self.identities.get(&peer)) {
            (Some(a), Some(b)) => trust::can_pair(a, b),
            _ => false,
        };
        if !compatible {
            debug!(requester = %requester.short(), peer = %peer.short(), "Pair refused by trust");
            return Err(EngineError::PeerUnavailable);
        }

        self.directory
            .confirm_match(requester, peer, &mut self.conversations)
    }

    /// Let the matcher choose the best compatible peer.
    pub fn request_match(
        &mut self,
        requester: UserId,
        filters: &PeerFilters,
    ) -> Result<ConfirmedMatch, EngineError> {
        self.check_rate(&requester, ActionKind::UrgentRequest)?;

        let peer = self
            .directory
            .find_match(&requester, filters, &self.identities)
            .map(|entry| entry.user_id)
            .ok_or(EngineError::PeerUnavailable)?;

        self.directory
            .confirm_match(requester, peer, &mut self.conversations)
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    pub fn send_message(
        &mut self,
        sender: UserId,
        conversation_id: &ConversationId,
        body: &str,
    ) -> Result<Posted, EngineError> {
        // Sends that can never land do not spend a burst slot.
        match self.conversations.get(conversation_id) {
            Some(c) if !c.frozen && c.includes(&sender) => {}
            _ => return Err(EngineError::ConversationUnavailable),
        }
        self.check_rate(&sender, ActionKind::MessageBurst)?;
        let posted = self
            .conversations
            .post_message(conversation_id, &sender, body)?;
        if !posted.allowed {
            info!(user = %sender.short(), conversation = %conversation_id, "Message relayed with caution");
        }
        self.identities.touch_activity(&sender);
        Ok(posted)
    }

    pub fn report(
        &mut self,
        reporter: UserId,
        reported: UserId,
        reason: &str,
    ) -> Result<ReportOutcome, EngineError> {
        if reporter == reported {
            return Err(EngineError::InvalidRequest(
                "cannot report yourself".to_string(),
            ));
        }
        self.check_rate(&reporter, ActionKind::Reporting)?;
        self.conversations.report(
            &reporter,
            &reported,
            reason,
            &mut self.identities,
            self.freeze_threshold,
        )
    }

    /// End a conversation on behalf of a participant. `Ok(None)` if it was
    /// already gone.
    pub fn end_conversation(
        &mut self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, EngineError> {
        match self.conversations.get(conversation_id) {
            None => Ok(None),
            Some(c) if !c.includes(user_id) => Err(EngineError::ConversationUnavailable),
            Some(_) => Ok(self
                .conversations
                .end(conversation_id, &mut self.identities)),
        }
    }

    /// Transport went away: withdraw and end whatever the user was part of.
    pub fn disconnect(&mut self, user_id: &UserId) -> Option<Conversation> {
        self.directory.withdraw(user_id);
        let conversation_id = self.conversations.active_for(user_id)?;
        let ended = self.conversations.end(&conversation_id, &mut self.identities);
        if ended.is_some() {
            info!(user = %user_id.short(), conversation = %conversation_id, "Conversation ended by disconnect");
        }
        ended
    }

    fn check_rate(&mut self, user_id: &UserId, kind: ActionKind) -> Result<(), EngineError> {
        match self.identities.check_rate(&self.limiter, user_id, kind) {
            Some(RateDecision::Allowed) => Ok(()),
            Some(RateDecision::Denied { retry_after_secs }) => {
                debug!(user = %user_id.short(), ?kind, retry_after_secs, "Rate limited");
                Err(EngineError::RateLimited { retry_after_secs })
            }
            None => Err(EngineError::Authentication),
        }
    }
}

#[cfg(test)]
impl Engine {
    pub(crate) fn set_trust_for_test(&mut self, user_id: &UserId, trust_level: i32) {
        if let Some(record) = self.identities.get_mut(user_id) {
            record.trust_level = trust_level;
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RateLimiter::default(), 0, DEFAULT_FREEZE_REPORT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> PeerProfile {
        PeerProfile {
            username: name.to_string(),
            age: 34,
            province: "Jalisco".to_string(),
            avatar: "🌊".to_string(),
        }
    }

    /// Make a user trusted enough to pair with a brand-new account.
    fn vouch(engine: &mut Engine, user_id: &UserId) {
        engine.set_trust_for_test(user_id, 5);
    }

    #[test]
    fn test_end_to_end_session() {
        let mut engine = Engine::default();

        let a = engine.create_identity("fp1").unwrap();
        let b = engine.create_identity("fp2").unwrap();
        vouch(&mut engine, &b.user_id);

        engine
            .set_available(b.user_id, profile("b"), ConnectionId(2))
            .unwrap();

        let found = engine
            .directory
            .find_match(&a.user_id, &PeerFilters::default(), &engine.identities)
            .unwrap();
        assert_eq!(found.user_id, b.user_id);

        let confirmed = engine
            .directory
            .confirm_match(a.user_id, b.user_id, &mut engine.conversations)
            .unwrap();
        let conv = confirmed.conversation_id;
        assert!(!engine.directory.is_available(&a.user_id));
        assert!(!engine.directory.is_available(&b.user_id));

        let posted = engine.send_message(a.user_id, &conv, "hello").unwrap();
        assert_eq!(posted.recipient, b.user_id);
        assert_eq!(engine.conversations.get(&conv).unwrap().messages().len(), 1);

        assert!(engine.end_conversation(&a.user_id, &conv).unwrap().is_some());
        assert_eq!(engine.identities.get(&a.user_id).unwrap().conversation_count, 1);
        assert_eq!(engine.identities.get(&b.user_id).unwrap().conversation_count, 1);

        for user in [a.user_id, b.user_id] {
            assert!(engine
                .directory
                .find_match(&user, &PeerFilters::default(), &engine.identities)
                .is_none());
        }
    }

    #[test]
    fn test_recover_identity() {
        let mut engine = Engine::default();
        let created = engine.create_identity("laptop").unwrap();

        let recovered = engine
            .recover_identity(&created.recovery_phrase, "phone")
            .unwrap();
        assert_eq!(recovered, created.user_id);

        assert_eq!(
            engine.recover_identity("mountain-mountain", "phone").unwrap_err(),
            EngineError::RecoveryPhraseInvalid
        );
        assert!(matches!(
            engine.create_identity("  "),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_authenticate() {
        let mut engine = Engine::default();
        let created = engine.create_identity("fp").unwrap();

        assert_eq!(
            engine.authenticate(&created.user_id.to_string()).unwrap(),
            created.user_id
        );
        assert_eq!(
            engine.authenticate("garbage").unwrap_err(),
            EngineError::Authentication
        );
        assert_eq!(
            engine.authenticate(&UserId::new().to_string()).unwrap_err(),
            EngineError::Authentication
        );
    }

    #[test]
    fn test_urgent_requests_are_limited() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;

        for _ in 0..3 {
            assert_eq!(
                engine.request_match(a, &PeerFilters::default()).unwrap_err(),
                EngineError::PeerUnavailable
            );
        }
        assert!(matches!(
            engine.request_match(a, &PeerFilters::default()),
            Err(EngineError::RateLimited { retry_after_secs }) if retry_after_secs > 0
        ));
    }

    #[test]
    fn test_request_chat_respects_trust() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();

        assert_eq!(
            engine.request_chat(a, b).unwrap_err(),
            EngineError::PeerUnavailable
        );

        vouch(&mut engine, &b);
        let confirmed = engine.request_chat(a, b).unwrap();
        assert_eq!(confirmed.peer.profile.username, "b");
        assert!(confirmed.requester_entry.is_none());
    }

    #[test]
    fn test_request_match_picks_best() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        let c = engine.create_identity("c").unwrap().user_id;
        vouch(&mut engine, &b);
        vouch(&mut engine, &c);
        engine.set_trust_for_test(&c, 8);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        engine.set_available(c, profile("c"), ConnectionId(3)).unwrap();

        let confirmed = engine.request_match(a, &PeerFilters::default()).unwrap();
        assert_eq!(confirmed.peer.user_id, c);
        assert!(engine.directory.is_available(&b));
    }

    #[test]
    fn test_busy_user_cannot_go_available() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        vouch(&mut engine, &b);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        engine.request_chat(a, b).unwrap();

        assert_eq!(
            engine.set_available(a, profile("a"), ConnectionId(1)).unwrap_err(),
            EngineError::AlreadyInConversation
        );
    }

    #[test]
    fn test_message_burst_limit() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        vouch(&mut engine, &b);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        let conv = engine.request_chat(a, b).unwrap().conversation_id;

        for i in 0..10 {
            engine.send_message(a, &conv, &format!("msg {i}")).unwrap();
        }
        assert!(matches!(
            engine.send_message(a, &conv, "one too many"),
            Err(EngineError::RateLimited { .. })
        ));
        assert_eq!(engine.conversations.get(&conv).unwrap().messages().len(), 10);
    }

    #[test]
    fn test_outsider_cannot_end() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        let c = engine.create_identity("c").unwrap().user_id;
        vouch(&mut engine, &b);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        let conv = engine.request_chat(a, b).unwrap().conversation_id;

        assert_eq!(
            engine.end_conversation(&c, &conv).unwrap_err(),
            EngineError::ConversationUnavailable
        );
        assert!(engine.end_conversation(&b, &conv).unwrap().is_some());
        assert!(engine.end_conversation(&b, &conv).unwrap().is_none());
    }

    #[test]
    fn test_disconnect_cleans_up() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        let c = engine.create_identity("c").unwrap().user_id;
        vouch(&mut engine, &b);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        engine.set_available(c, profile("c"), ConnectionId(3)).unwrap();
        engine.request_chat(a, b).unwrap();

        assert!(engine.disconnect(&a).is_some());
        assert!(engine.conversations.is_empty());
        assert!(engine.disconnect(&c).is_none());
        assert!(engine.directory.is_empty());
    }

    #[test]
    fn test_trust_summary() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        assert_eq!(
            engine.trust_summary(&a).unwrap(),
            TrustSummary {
                trust_level: 1,
                conversation_count: 0,
                account_age: 0,
            }
        );
        assert!(engine.trust_summary(&UserId::new()).is_none());
    }

    #[test]
    fn test_reports_are_limited_to_five_per_hour() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;

        for expected in 1..=5 {
            let outcome = engine.report(a, b, "spam").unwrap();
            assert_eq!(outcome.report_count, Some(expected));
        }
        match engine.report(a, b, "spam") {
            Err(EngineError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs > 3590 && retry_after_secs <= 3600)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(engine.identities.get(&b).unwrap().report_count, 5);
    }

    #[test]
    fn test_rejected_requests_do_not_spend_slots() {
        let mut engine = Engine::default();
        let a = engine.create_identity("a").unwrap().user_id;
        let b = engine.create_identity("b").unwrap().user_id;
        vouch(&mut engine, &b);
        engine.set_available(b, profile("b"), ConnectionId(2)).unwrap();
        let conv = engine.request_chat(a, b).unwrap().conversation_id;
        engine.conversations.freeze(&conv);

        for _ in 0..15 {
            assert_eq!(
                engine.send_message(b, &conv, "still there?").unwrap_err(),
                EngineError::ConversationUnavailable
            );
            assert_eq!(
                engine
                    .send_message(b, &ConversationId::new(), "hello")
                    .unwrap_err(),
                EngineError::ConversationUnavailable
            );
            assert!(matches!(
                engine.report(a, a, "me"),
                Err(EngineError::InvalidRequest(_))
            ));
        }

        let b_limits = engine.identities.get(&b).unwrap().rate_limits();
        assert_eq!(b_limits.recent(ActionKind::MessageBurst), 0);
        let a_limits = engine.identities.get(&a).unwrap().rate_limits();
        assert_eq!(a_limits.recent(ActionKind::Reporting), 0);
    }
}
