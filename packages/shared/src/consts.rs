//! Protocol constants shared across the fleet.
//!
//! These values are part of the wire/store contract: every server process
//! and the browser client must agree on them.

/// Lower bound (inclusive) for generated client ids
pub const CLIENT_ID_MIN: u32 = 10000;
/// Upper bound (inclusive) for generated client ids
pub const CLIENT_ID_MAX: u32 = 99999;

/// Lower bound (inclusive) for generated room ids
pub const ROOM_ID_MIN: u32 = 10000;
/// Upper bound (inclusive) for generated room ids
pub const ROOM_ID_MAX: u32 = 99999;

/// Message id sent to a client that was removed by the system or an admin.
/// The frontend resets its retry bookkeeping when it sees this value.
pub const CLIENT_BANNED_CODE: &str = "101010";

/// TTL for client records in the shared store (crash-safety net)
pub const CLIENT_STORE_TTL_SEC: i64 = 3600;
/// TTL for room records and membership sets in the shared store
pub const ROOM_STORE_TTL_SEC: i64 = 4000;

/// TTL for per-process server records
pub const SERVER_STAT_STORE_TTL_SEC: i64 = 3600;
/// Refresh interval for per-process server records
pub const SERVER_STAT_UPDATE_INTERVAL_SEC: u64 = 30;

/// WebSocket liveness ping interval. A socket that has not answered the
/// previous ping when the next tick fires is considered dead.
pub const SOCKET_HEARTBEAT_INTERVAL_SEC: u64 = 30;
