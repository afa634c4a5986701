use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid age range: {0:?} (expected \"min-max\")")]
    InvalidAgeRange(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Device fingerprint is empty")]
    Empty,
}
