//! Stateless message classifier.
//!
//! Every outbound chat message is run through [`analyze`] before it is
//! stored and relayed. Flags are advisory: a flagged message is still
//! delivered, and the sender is shown a caution instead. `allowed` is
//! reported for callers that want it but nothing in the relay path uses it
//! to suppress delivery.

use serde::{Deserialize, Serialize};

/// Phrases that suggest a peer is giving or asking for medical advice.
pub const MEDICAL_PHRASES: &[&str] = &[
    "medical advice",
    "diagnosis",
    "prescription",
    "treatment plan",
    "doctor recommendation",
    "cure",
    "medication dose",
];

pub const MEDICAL_ADVICE_WARNING: &str =
    "Remember: This space is for companionship and sharing experiences, not medical advice.";

pub const OFF_TOPIC_WARNING: &str = "Please keep conversations focused on peer support.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    MedicalAdvice,
    ExternalLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationFlag {
    #[serde(rename = "type")]
    pub kind: FlagKind,
    /// The phrase that triggered a `medical_advice` flag.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phrase: Option<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub flags: Vec<ModerationFlag>,
    pub warning: Option<&'static str>,
}

impl Verdict {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn has(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }
}

/// Classify a single message body.
pub fn analyze(body: &str) -> Verdict {
    let lower = body.to_lowercase();
    let mut flags = Vec::new();

    for phrase in MEDICAL_PHRASES {
        if lower.contains(phrase) {
            flags.push(ModerationFlag {
                kind: FlagKind::MedicalAdvice,
                phrase: Some((*phrase).to_string()),
                severity: Severity::Medium,
            });
        }
    }

    // Scheme match is case-sensitive on the raw body.
    if body.contains("http://") || body.contains("https://") {
        flags.push(ModerationFlag {
            kind: FlagKind::ExternalLink,
            phrase: None,
            severity: Severity::Low,
        });
    }

    let allowed = flags.iter().all(|f| f.severity == Severity::Low);
    let warning = warning_for(&flags);

    Verdict {
        allowed,
        flags,
        warning,
    }
}

fn warning_for(flags: &[ModerationFlag]) -> Option<&'static str> {
    if flags.iter().any(|f| f.kind == FlagKind::MedicalAdvice) {
        Some(MEDICAL_ADVICE_WARNING)
    } else if !flags.is_empty() {
        Some(OFF_TOPIC_WARNING)
    } else {
        None
    }
}
