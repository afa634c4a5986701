//! Anonymous identity registry.
//!
//! Holds every `UserRecord` for the lifetime of the process. Nothing is
//! persisted and nothing is evicted: records, phrase index and device index
//! grow until restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use fuente_shared::constants::INITIAL_TRUST_LEVEL;
use fuente_shared::fingerprint::FingerprintHash;
use fuente_shared::recovery::{generate_phrase, normalize_phrase};
use fuente_shared::UserId;

use crate::error::EngineError;
use crate::rate_limit::{ActionKind, RateDecision, RateLimitState, RateLimiter};

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    recovery_phrase: String,
    pub device_fingerprint: FingerprintHash,
    pub created_at: DateTime<Utc>,
    /// Base score; only moderation downgrades change it.
    pub trust_level: i32,
    pub conversation_count: u32,
    pub report_count: u32,
    pub last_activity: DateTime<Utc>,
    rate_limits: RateLimitState,
}

impl UserRecord {
    pub(crate) fn new(
        user_id: UserId,
        recovery_phrase: String,
        device_fingerprint: FingerprintHash,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            recovery_phrase,
            device_fingerprint,
            created_at: now,
            trust_level: INITIAL_TRUST_LEVEL,
            conversation_count: 0,
            report_count: 0,
            last_activity: now,
            rate_limits: RateLimitState::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn rate_limits(&self) -> &RateLimitState {
        &self.rate_limits
    }
}

/// Returned once, at creation. The phrase is never shown again.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub user_id: UserId,
    pub recovery_phrase: String,
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    users: HashMap<UserId, UserRecord>,
    phrases: HashMap<String, UserId>,
    devices: HashMap<FingerprintHash, Vec<UserId>>,
    /// 0 = unlimited
    max_per_device: usize,
}

impl IdentityRegistry {
    pub fn new(max_per_device: usize) -> Self {
        Self {
            max_per_device,
            ..Self::default()
        }
    }

    pub fn create_user(&mut self, fingerprint: FingerprintHash) -> Result<NewIdentity, EngineError> {
        self.create_user_at(fingerprint, Utc::now())
    }

    pub fn create_user_at(
        &mut self,
        fingerprint: FingerprintHash,
        now: DateTime<Utc>,
    ) -> Result<NewIdentity, EngineError> {
        if self.max_per_device > 0 && self.users_for_device(&fingerprint).len() >= self.max_per_device
        {
            debug!(device = %fingerprint, "Identity creation refused, device limit reached");
            return Err(EngineError::DeviceLimitReached);
        }

        let user_id = loop {
            let id = UserId::new();
            if !self.users.contains_key(&id) {
                break id;
            }
        };
        let recovery_phrase = loop {
            let phrase = generate_phrase();
            if !self.phrases.contains_key(&phrase) {
                break phrase;
            }
        };

        self.phrases.insert(recovery_phrase.clone(), user_id);
        self.devices.entry(fingerprint.clone()).or_default().push(user_id);
        self.users.insert(
            user_id,
            UserRecord::new(user_id, recovery_phrase.clone(), fingerprint, now),
        );

        info!(user = %user_id, "Anonymous identity created");

        Ok(NewIdentity {
            user_id,
            recovery_phrase,
        })
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserRecord> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Re-associate an identity with a new device. `None` if no phrase matches.
    pub fn recover_by_phrase(
        &mut self,
        phrase: &str,
        fingerprint: FingerprintHash,
    ) -> Option<&UserRecord> {
        let phrase = normalize_phrase(phrase);
        let user_id = *self.phrases.get(&phrase)?;
        let record = self
            .users
            .get_mut(&user_id)
            .filter(|r| r.recovery_phrase == phrase)?;

        record.device_fingerprint = fingerprint.clone();
        record.last_activity = Utc::now();

        let linked = self.devices.entry(fingerprint).or_default();
        if !linked.contains(&user_id) {
            linked.push(user_id);
        }

        info!(user = %user_id, "Identity recovered on new device");
        Some(record)
    }

    pub fn touch_activity(&mut self, user_id: &UserId) {
        if let Some(record) = self.users.get_mut(user_id) {
            record.last_activity = Utc::now();
        }
    }

    pub fn users_for_device(&self, fingerprint: &FingerprintHash) -> &[UserId] {
        self.devices
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn record_conversation(&mut self, user_id: &UserId) {
        if let Some(record) = self.users.get_mut(user_id) {
            record.conversation_count += 1;
        }
    }

    /// Apply a peer report. Returns the user's new report count.
    pub fn downgrade_trust(&mut self, user_id: &UserId) -> Option<u32> {
        let record = self.users.get_mut(user_id)?;
        record.report_count += 1;
        record.trust_level = (record.trust_level - 1).max(INITIAL_TRUST_LEVEL);
        Some(record.report_count)
    }

    pub fn check_rate(
        &mut self,
        limiter: &RateLimiter,
        user_id: &UserId,
        kind: ActionKind,
    ) -> Option<RateDecision> {
        let record = self.users.get_mut(user_id)?;
        Some(limiter.check(&mut record.rate_limits, kind))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, user_id: &UserId) -> Option<&mut UserRecord> {
        self.users.get_mut(user_id)
    }
}
