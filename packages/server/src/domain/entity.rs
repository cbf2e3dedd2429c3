//! Core domain records shared across the fleet.
//!
//! Client と Room は共有ストア（Redis ハッシュ）に TTL 付きで保存される
//! レコードであり、プロセスをまたいだ唯一の真実の源。ServerStats は
//! 管理用の心拍レコードで、チャット配送の正しさには関与しない。

use serde::{Deserialize, Serialize};

use super::id::{ClientId, RoomId};

/// A chat identity tied to one WebSocket connection's lifetime.
///
/// レコード自体はソケットの寿命とは独立に TTL で自壊する
/// （プロセスがクラッシュしても残骸が永続しない）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    /// Display name, defaults to "User <id>"
    pub name: String,
    /// Unix timestamp (milliseconds, JST) when the client connected
    pub created_at: i64,
    /// Room the client is currently in, if any
    pub room_id: Option<RoomId>,
}

impl Client {
    /// Create a fresh client with the default display name
    pub fn new(id: ClientId, created_at: i64) -> Self {
        Self {
            name: format!("User {id}"),
            id,
            created_at,
            room_id: None,
        }
    }

    /// ストアから消えたクライアントを退室処理に通すための最小レコード。
    /// 再整合経路専用で、ストアには書き戻されない。
    pub fn synthesized(id: ClientId, room_id: RoomId) -> Self {
        Self {
            name: format!("User {id}"),
            id,
            created_at: 0,
            room_id: Some(room_id),
        }
    }
}

/// A chat room record.
///
/// `active_users` はアドバイザリなカウンタで、表示用。部屋が空かどうかの
/// 判定には使わない（真実の源は会員集合のカーディナリティ）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Unix timestamp (milliseconds, JST) when the room was created
    pub created_at: i64,
    /// Client that created the room
    pub created_by: ClientId,
    /// Advisory member counter, mutated by join/leave
    pub active_users: i64,
}

impl Room {
    /// Create a new empty room
    pub fn new(id: RoomId, name: String, created_by: ClientId, created_at: i64) -> Self {
        Self {
            id,
            name,
            created_at,
            created_by,
            active_users: 0,
        }
    }
}

/// Per-process heartbeat/statistics record for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub server_id: String,
    /// Unix timestamp (milliseconds, JST) when the process started
    pub started_at: i64,
    /// Number of sockets currently open on this process
    pub active_clients: usize,
    /// Number of rooms with at least one local member on this process
    pub active_rooms: usize,
    /// Unix timestamp (milliseconds, JST) of the last refresh
    pub updated_at: i64,
}
