//! # fuente-shared
//!
//! Types shared between the La Fuente server and its clients: identifiers,
//! the JSON event protocol, recovery phrases, device fingerprint hashing and
//! the message moderation filter.

pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod moderation;
pub mod protocol;
pub mod recovery;
pub mod types;

pub use error::{FingerprintError, ProtocolError};
pub use types::{AgeRange, ConversationId, MessageId, UserId};
