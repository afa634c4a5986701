//! Progressive trust model.
//!
//! Scores are derived on demand from a [`UserRecord`]; nothing here is stored.

use chrono::{DateTime, Duration, Utc};

use fuente_shared::constants::{
    ESTABLISHED_ACCOUNT_DAYS, ESTABLISHED_CONVERSATIONS, LOW_TRUST_THRESHOLD, MAX_TRUST,
    MIN_TRUST, VETERAN_ACCOUNT_DAYS, VETERAN_CONVERSATIONS,
};

use crate::identity::UserRecord;

/// Base level, plus longevity and conversation bonuses, minus one per report,
/// clamped to `[MIN_TRUST, MAX_TRUST]`.
pub fn compute_trust_at(user: &UserRecord, now: DateTime<Utc>) -> i32 {
    let mut score = i64::from(user.trust_level);

    let age = now - user.created_at;
    if age > Duration::days(VETERAN_ACCOUNT_DAYS) {
        score += 2;
    } else if age > Duration::days(ESTABLISHED_ACCOUNT_DAYS) {
        score += 1;
    }

    if user.conversation_count > VETERAN_CONVERSATIONS {
        score += 2;
    } else if user.conversation_count > ESTABLISHED_CONVERSATIONS {
        score += 1;
    }

    score -= i64::from(user.report_count);

    score.clamp(i64::from(MIN_TRUST), i64::from(MAX_TRUST)) as i32
}

/// Two low-trust accounts are never paired with each other.
pub fn can_pair(a: &UserRecord, b: &UserRecord) -> bool {
    can_pair_at(a, b, Utc::now())
}

pub fn can_pair_at(a: &UserRecord, b: &UserRecord, now: DateTime<Utc>) -> bool {
    !(compute_trust_at(a, now) < LOW_TRUST_THRESHOLD && compute_trust_at(b, now) < LOW_TRUST_THRESHOLD)
}

/// Sort key for match candidates; higher is preferred.
pub fn priority_at(user: &UserRecord, now: DateTime<Utc>) -> i32 {
    compute_trust_at(user, now)
}

/// Whole days since the account was created.
pub fn account_age_days(user: &UserRecord, now: DateTime<Utc>) -> i64 {
    (now - user.created_at).num_days().max(0)
}
