use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::moderation::ModerationFlag;
use crate::types::{AgeRange, ConversationId, MessageId, UserId};

/// Events sent by a client over its live connection.
///
/// Framed as JSON text: `{"event": "send_message", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to an existing anonymous identity
    Authenticate(Authenticate),

    /// List peers currently available
    BrowsePeers(PeerFilters),

    /// Declare availability for matching
    SetAvailable(PeerProfile),

    /// Withdraw availability
    SetUnavailable,

    /// Ask to chat with a specific available peer
    RequestChat(RequestChat),

    /// Let the matcher pick the best compatible peer
    RequestMatch(PeerFilters),

    /// Post a message into the active conversation
    SendMessage(SendMessage),

    /// Report the peer for abuse
    ReportPeer(ReportPeer),

    /// End the active conversation
    EndConversation(EndConversation),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticate {
    /// Kept as a string so an unparseable id is an auth failure, not a framing error.
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    /// A blank string means no age filter, like an empty province.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "blank_as_none"
    )]
    pub age_range: Option<AgeRange>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<AgeRange>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl PeerFilters {
    pub fn matches(&self, profile: &PeerProfile) -> bool {
        if let Some(ref province) = self.province {
            if !province.is_empty() && &profile.province != province {
                return false;
            }
        }
        if let Some(range) = self.age_range {
            if !range.contains(profile.age) {
                return false;
            }
        }
        true
    }
}

/// Display-only profile a user chooses when going available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub username: String,
    pub age: u32,
    pub province: String,
    pub avatar: String,
}

impl PeerProfile {
    /// Shown to a peer when the other side never declared a profile.
    pub fn anonymous() -> Self {
        Self {
            username: "Anonymous".to_string(),
            age: 0,
            province: "Unknown".to_string(),
            avatar: "👤".to_string(),
        }
    }
}

/// Public view of an available peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: UserId,
    #[serde(flatten)]
    pub profile: PeerProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestChat {
    pub peer_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub conversation_id: ConversationId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeer {
    pub peer_id: UserId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConversation {
    /// Falls back to the connection's current conversation when absent.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

/// A relayed chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub flags: Vec<ModerationFlag>,
    /// Sender-only caution; stripped from the recipient's copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ChatMessage {
    pub fn for_recipient(&self) -> Self {
        Self {
            warning: None,
            ..self.clone()
        }
    }
}

/// Events pushed by the server to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    AuthError {
        message: String,
    },

    PeersList(Vec<PeerSummary>),

    StatusUpdate {
        available: bool,
    },

    ChatStarted {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        peer: PeerSummary,
    },

    MessageReceived(ChatMessage),

    ModerationWarning {
        message: String,
    },

    RateLimited {
        message: String,
        #[serde(rename = "retryAfterSeconds")]
        retry_after_seconds: u64,
    },

    PeerUnavailable {
        message: String,
    },

    ReportSubmitted {
        message: String,
    },

    ConversationFrozen {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    ConversationEnded {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    /// Failures without a dedicated event
    Error {
        code: String,
        message: String,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate(_) => "authenticate",
            ClientEvent::BrowsePeers(_) => "browse_peers",
            ClientEvent::SetAvailable(_) => "set_available",
            ClientEvent::SetUnavailable => "set_unavailable",
            ClientEvent::RequestChat(_) => "request_chat",
            ClientEvent::RequestMatch(_) => "request_match",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::ReportPeer(_) => "report_peer",
            ClientEvent::EndConversation(_) => "end_conversation",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_send_message() {
        let conv = ConversationId::new();
        let text = format!(
            r#"{{"event":"send_message","data":{{"conversationId":"{conv}","message":"hola"}}}}"#
        );
        match ClientEvent::from_json(&text).unwrap() {
            ClientEvent::SendMessage(m) => {
                assert_eq!(m.conversation_id, conv);
                assert_eq!(m.message, "hola");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_browse_filters() {
        let text = r#"{"event":"browse_peers","data":{"province":"Jalisco","ageRange":"18-30"}}"#;
        let ClientEvent::BrowsePeers(filters) = ClientEvent::from_json(text).unwrap() else {
            panic!("expected browse_peers");
        };
        assert_eq!(filters.province.as_deref(), Some("Jalisco"));
        assert_eq!(filters.age_range, Some(AgeRange { min: 18, max: 30 }));

        let text = r#"{"event":"browse_peers","data":{}}"#;
        let ClientEvent::BrowsePeers(filters) = ClientEvent::from_json(text).unwrap() else {
            panic!("expected browse_peers");
        };
        assert_eq!(filters, PeerFilters::default());
    }

    #[test]
    fn test_blank_age_range_is_no_filter() {
        for text in [
            r#"{"event":"browse_peers","data":{"ageRange":""}}"#,
            r#"{"event":"browse_peers","data":{"ageRange":"  ","province":""}}"#,
            r#"{"event":"request_match","data":{"ageRange":null}}"#,
        ] {
            let filters = match ClientEvent::from_json(text).unwrap() {
                ClientEvent::BrowsePeers(f) | ClientEvent::RequestMatch(f) => f,
                other => panic!("unexpected event: {other:?}"),
            };
            assert_eq!(filters.age_range, None);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(ClientEvent::from_json(r#"{"event":"explode","data":{}}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
        assert!(ClientEvent::from_json(
            r#"{"event":"browse_peers","data":{"ageRange":"old"}}"#
        )
        .is_err());
    }

    #[test]
    fn test_unit_event() {
        let event = ClientEvent::from_json(r#"{"event":"set_unavailable"}"#).unwrap();
        assert!(matches!(event, ClientEvent::SetUnavailable));
    }

    #[test]
    fn test_encode_rate_limited() {
        let event = ServerEvent::RateLimited {
            message: "slow down".into(),
            retry_after_seconds: 42,
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "rate_limited");
        assert_eq!(json["data"]["retryAfterSeconds"], 42);
    }

    #[test]
    fn test_peer_summary_is_flat() {
        let summary = PeerSummary {
            id: UserId::new(),
            profile: PeerProfile {
                username: "luz".into(),
                age: 29,
                province: "Oaxaca".into(),
                avatar: "🌻".into(),
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["username"], "luz");
        assert_eq!(json["age"], 29);
        assert!(json.get("profile").is_none());
    }

    #[test]
    fn test_filters_match() {
        let profile = PeerProfile {
            username: "sol".into(),
            age: 40,
            province: "Puebla".into(),
            avatar: "☀️".into(),
        };
        assert!(PeerFilters::default().matches(&profile));
        let by_province = PeerFilters {
            province: Some("Puebla".into()),
            age_range: None,
        };
        assert!(by_province.matches(&profile));
        let too_young = PeerFilters {
            province: None,
            age_range: Some(AgeRange { min: 18, max: 30 }),
        };
        assert!(!too_young.matches(&profile));
    }

    #[test]
    fn test_recipient_copy_drops_warning() {
        let msg = ChatMessage {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            sender_id: UserId::new(),
            body: "cure".into(),
            timestamp: Utc::now(),
            flags: Vec::new(),
            warning: Some("careful".into()),
        };
        assert_eq!(msg.for_recipient().warning, None);
        assert_eq!(msg.for_recipient().body, "cure");
    }
}
