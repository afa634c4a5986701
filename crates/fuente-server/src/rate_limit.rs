//! Per-user sliding-window admission control.
//!
//! The window state lives on each [`UserRecord`](crate::identity::UserRecord);
//! [`RateLimiter`] only carries the policy and is the sole writer of that state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use fuente_shared::constants::{MESSAGE_BURST_LIMIT, REPORTING_LIMIT, URGENT_REQUEST_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Asking to be matched right now (explicit pick or automatic match)
    UrgentRequest,
    MessageBurst,
    Reporting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub max: usize,
    pub period: Duration,
}

impl Window {
    pub fn new(max: usize, period_secs: i64) -> Self {
        Self {
            max,
            period: Duration::seconds(period_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl RateDecision {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Timestamps of recent actions, per action kind.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    actions: HashMap<ActionKind, VecDeque<DateTime<Utc>>>,
}

impl RateLimitState {
    #[cfg(test)]
    pub fn recent(&self, kind: ActionKind) -> usize {
        self.actions.get(&kind).map(VecDeque::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    urgent_request: Window,
    message_burst: Window,
    reporting: Window,
}

impl RateLimiter {
    pub fn new(urgent_request: Window, message_burst: Window, reporting: Window) -> Self {
        Self {
            urgent_request,
            message_burst,
            reporting,
        }
    }

    pub fn window(&self, kind: ActionKind) -> Window {
        match kind {
            ActionKind::UrgentRequest => self.urgent_request,
            ActionKind::MessageBurst => self.message_burst,
            ActionKind::Reporting => self.reporting,
        }
    }

    pub fn check(&self, state: &mut RateLimitState, kind: ActionKind) -> RateDecision {
        self.check_at(state, kind, Utc::now())
    }

    /// Prune expired timestamps, then either deny or record `now` and allow.
    pub fn check_at(
        &self,
        state: &mut RateLimitState,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let window = self.window(kind);
        let stamps = state.actions.entry(kind).or_default();

        while let Some(oldest) = stamps.front() {
            if now - *oldest >= window.period {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= window.max {
            let retry_after_secs = stamps
                .front()
                .map(|oldest| retry_after(window.period - (now - *oldest)))
                .unwrap_or(1);
            return RateDecision::Denied { retry_after_secs };
        }

        stamps.push_back(now);
        RateDecision::Allowed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            Window::new(URGENT_REQUEST_LIMIT.0, URGENT_REQUEST_LIMIT.1),
            Window::new(MESSAGE_BURST_LIMIT.0, MESSAGE_BURST_LIMIT.1),
            Window::new(REPORTING_LIMIT.0, REPORTING_LIMIT.1),
        )
    }
}

/// Whole seconds until the slot frees up, rounded up, never zero.
fn retry_after(remaining: Duration) -> u64 {
    let ms = remaining.num_milliseconds().max(0) as u64;
    ms.div_ceil(1000).max(1)
}
