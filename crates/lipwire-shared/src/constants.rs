/// AES-256-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// AES-256-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Handshake salt size in bytes
pub const SALT_SIZE: usize = 16;

/// HKDF context label fixed by the handshake protocol
pub const HKDF_INFO: &[u8] = b"handshake data";

/// Maximum size of a single wire frame in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Budget for the key-agreement handshake, in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

/// Interval between server heartbeat pings, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Seconds without an observed pong before the connection is dropped
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 15;

/// Seconds a call invite rings before timing out
pub const RING_TIMEOUT_SECS: u64 = 30;

/// Per-connection budget for delivering one caption delta, in milliseconds
pub const CAPTION_SEND_BUDGET_MS: u64 = 200;

/// Depth of the per-connection outbound frame queue
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Default WSS listen port
pub const DEFAULT_PORT: u16 = 8765;

/// Access token lifetime in minutes
pub const ACCESS_TTL_MINUTES: i64 = 15;

/// Refresh token lifetime in days
pub const REFRESH_TTL_DAYS: i64 = 7;

/// Username constraints
pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 32;

/// Password constraints
pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 128;

/// Maximum length allowed for each part of a user's full name
pub const NAME_PART_MAX_LENGTH: usize = 30;

/// Call-history paging
pub const HISTORY_DEFAULT_LIMIT: u32 = 50;
pub const HISTORY_MAX_LIMIT: u32 = 100;

/// Failed-login backoff
pub const FAILED_LOGIN_LIMIT: u32 = 5;
pub const FAILED_LOGIN_LOCKOUT_SECS: u64 = 60;

/// Upper bound on caption video ingest frame rate
pub const MEDIA_MAX_FPS: u32 = 15;
