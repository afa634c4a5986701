/// Application name
pub const APP_NAME: &str = "La Fuente";

/// Default HTTP + WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3100;

/// Trust level assigned to a freshly created identity
pub const INITIAL_TRUST_LEVEL: i32 = 1;

/// Bounds of the computed trust score
pub const MIN_TRUST: i32 = 1;
pub const MAX_TRUST: i32 = 10;

/// Two users both below this score are never paired
pub const LOW_TRUST_THRESHOLD: i32 = 3;

/// Account age bonuses (days)
pub const VETERAN_ACCOUNT_DAYS: i64 = 30;
pub const ESTABLISHED_ACCOUNT_DAYS: i64 = 7;

/// Conversation count bonuses
pub const VETERAN_CONVERSATIONS: u32 = 20;
pub const ESTABLISHED_CONVERSATIONS: u32 = 10;

/// Reports received before a user's conversations are frozen
pub const DEFAULT_FREEZE_REPORT_THRESHOLD: u32 = 3;

/// Rate-limit windows: (max actions, window seconds)
pub const URGENT_REQUEST_LIMIT: (usize, i64) = (3, 24 * 60 * 60);
pub const MESSAGE_BURST_LIMIT: (usize, i64) = (10, 60);
pub const REPORTING_LIMIT: (usize, i64) = (5, 60 * 60);

/// Recovery phrase shape: 24^6 ≈ 1.9e8 combinations
pub const RECOVERY_PHRASE_WORDS: usize = 6;
pub const RECOVERY_PHRASE_SEPARATOR: &str = "-";

/// Identity cookie lifetime (1 year)
pub const IDENTITY_COOKIE_MAX_AGE_SECS: i64 = 365 * 24 * 60 * 60;
pub const IDENTITY_COOKIE_NAME: &str = "userId";

/// Maximum accepted message body in bytes (16 KiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Key derivation context (BLAKE3)
pub const KDF_CONTEXT_DEVICE_FINGERPRINT: &str = "fuente-device-fingerprint-v1";

/// Shown to the requester when a match is denied by the urgent-request window
pub const RATE_LIMITED_NOTICE: &str = "We're protecting the space. Please try again later.";

/// Acknowledgement sent after a report
pub const REPORT_THANKS: &str = "Thank you for helping us keep this space safe.";
