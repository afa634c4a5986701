//! Device fingerprint hashing.
//!
//! The client collects a handful of coarse signals and sends them as one
//! opaque string. Only a BLAKE3 derived-key digest of that string is ever
//! stored, so the raw signals cannot be recovered from server state.

use serde::{Deserialize, Serialize};

use crate::constants::KDF_CONTEXT_DEVICE_FINGERPRINT;
use crate::error::FingerprintError;

/// Raw signals gathered by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignals {
    pub user_agent: String,
    pub language: String,
    pub timezone: String,
    pub screen_resolution: String,
}

impl DeviceSignals {
    /// The joined form the client sends as `deviceFingerprint`.
    pub fn to_raw(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.user_agent, self.language, self.timezone, self.screen_resolution
        )
    }
}

/// Hex digest of a hashed fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintHash(String);

impl FingerprintHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0[..12])
    }
}

/// Hash a raw fingerprint string. Surrounding whitespace is ignored.
pub fn hash_fingerprint(raw: &str) -> Result<FingerprintHash, FingerprintError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FingerprintError::Empty);
    }

    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_DEVICE_FINGERPRINT);
    hasher.update(raw.as_bytes());
    Ok(FingerprintHash(hex::encode(hasher.finalize().as_bytes())))
}
