//! Key layout and record codecs for the shared store.
//!
//! ストア上の鍵は `client:<id>` / `room:<id>` / `room:<id>:client` /
//! `server:<id>`。レコードの数値フィールドは全て文字列として保存され、
//! 読み出し時にパースし直す。pub/sub エンベロープのタグ（発信元プロセス
//! の識別子）の付与・分離もここが持つ。

use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::{Client, ClientId, Room, RoomId, ServerStats, StoreError};

/// Pattern matching every client record key
pub const CLIENT_KEY_PATTERN: &str = "client:*";
/// Pattern matching every room record key (also matches membership sets;
/// see [`room_id_of_key`])
pub const ROOM_KEY_PATTERN: &str = "room:*";
/// Pattern matching every server record key
pub const SERVER_KEY_PATTERN: &str = "server:*";

/// JSON ペイロードの直後に置く予約済み区切り文字。ペイロードは必ず
/// `}` で終わるため、正しい JSON と衝突しない。
pub const ENVELOPE_DELIMITER: char = '>';

/// Key of a client record hash
pub fn client_key(id: ClientId) -> String {
    format!("client:{id}")
}

/// Key of a room record hash
pub fn room_key(id: RoomId) -> String {
    format!("room:{id}")
}

/// Key of a room's authoritative membership set
pub fn room_members_key(id: RoomId) -> String {
    format!("room:{id}:client")
}

/// Key of a per-process server record hash
pub fn server_key(server_id: &str) -> String {
    format!("server:{server_id}")
}

/// Pub/sub channel name of a room
pub fn room_channel(id: RoomId) -> String {
    format!("room:{id}")
}

/// Parse a room id back out of a channel name
pub fn room_of_channel(channel: &str) -> Option<RoomId> {
    channel.strip_prefix("room:")?.parse().ok()
}

/// Parse a client id out of a client record key
pub fn client_id_of_key(key: &str) -> Option<ClientId> {
    match key.split(':').collect::<Vec<_>>().as_slice() {
        ["client", id] => id.parse().ok(),
        _ => None,
    }
}

/// Parse a room id out of a room record key.
///
/// 会員集合の鍵（`room:<id>:client`）はルームレコードではないので
/// `None` を返す。
pub fn room_id_of_key(key: &str) -> Option<RoomId> {
    match key.split(':').collect::<Vec<_>>().as_slice() {
        ["room", id] => id.parse().ok(),
        _ => None,
    }
}

// --- record codecs ---

/// Fields a client record is stored as
pub fn client_to_fields(client: &Client) -> Vec<(String, String)> {
    let mut fields = vec![
        ("id".to_string(), client.id.to_string()),
        ("name".to_string(), client.name.clone()),
        ("createdAt".to_string(), client.created_at.to_string()),
    ];
    if let Some(room_id) = client.room_id {
        fields.push(("roomId".to_string(), room_id.to_string()));
    }
    fields
}

/// Rebuild a client record from its stored fields.
/// An empty field map means the record does not exist (expired or deleted).
pub fn client_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<Client>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(Client {
        id: parse_field(key, fields, "id")?,
        name: fields.get("name").cloned().unwrap_or_default(),
        created_at: parse_field(key, fields, "createdAt")?,
        room_id: match fields.get("roomId") {
            Some(raw) => Some(raw.parse().map_err(|_| corrupt(key, "roomId"))?),
            None => None,
        },
    }))
}

/// Fields a room record is stored as
pub fn room_to_fields(room: &Room) -> Vec<(String, String)> {
    vec![
        ("id".to_string(), room.id.to_string()),
        ("name".to_string(), room.name.clone()),
        ("createdAt".to_string(), room.created_at.to_string()),
        ("createdBy".to_string(), room.created_by.to_string()),
        ("activeUsers".to_string(), room.active_users.to_string()),
    ]
}

/// Rebuild a room record from its stored fields
pub fn room_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<Room>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(Room {
        id: parse_field(key, fields, "id")?,
        name: fields.get("name").cloned().unwrap_or_default(),
        created_at: parse_field(key, fields, "createdAt")?,
        created_by: parse_field(key, fields, "createdBy")?,
        active_users: parse_field(key, fields, "activeUsers")?,
    }))
}

/// Fields a server record is stored as
pub fn server_to_fields(stats: &ServerStats) -> Vec<(String, String)> {
    vec![
        ("id".to_string(), stats.server_id.clone()),
        ("startedAt".to_string(), stats.started_at.to_string()),
        ("activeClients".to_string(), stats.active_clients.to_string()),
        ("activeRooms".to_string(), stats.active_rooms.to_string()),
        ("updatedAt".to_string(), stats.updated_at.to_string()),
    ]
}

/// Rebuild a server record from its stored fields
pub fn server_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<ServerStats>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(ServerStats {
        server_id: fields.get("id").cloned().unwrap_or_default(),
        started_at: parse_field(key, fields, "startedAt")?,
        active_clients: parse_field(key, fields, "activeClients")?,
        active_rooms: parse_field(key, fields, "activeRooms")?,
        updated_at: parse_field(key, fields, "updatedAt")?,
    }))
}

/// Client record fields the update path may touch. `id` and `createdAt`
/// are immutable for the record's lifetime.
const MUTABLE_CLIENT_FIELDS: &[&str] = &["name", "roomId"];

/// Reject updates that touch immutable client fields.
///
/// # Errors
///
/// Returns [`StoreError::ProtectedField`] naming the offending field.
pub fn guard_client_update(fields: &[(String, String)]) -> Result<(), StoreError> {
    for (field, _) in fields {
        if !MUTABLE_CLIENT_FIELDS.contains(&field.as_str()) {
            return Err(StoreError::ProtectedField(field.clone()));
        }
    }
    Ok(())
}

// --- pub/sub envelope tag ---

/// Append the publishing process's id after the payload
pub fn tag_envelope(payload: &str, server_id: &str) -> String {
    format!("{payload}{ENVELOPE_DELIMITER}{server_id}")
}

/// Split a tagged envelope back into (payload, origin server id)
pub fn split_envelope(envelope: &str) -> Result<(&str, &str), StoreError> {
    let close = envelope
        .rfind('}')
        .ok_or_else(|| StoreError::InvalidEnvelope("no payload terminator".to_string()))?;
    let origin = envelope[close + 1..]
        .strip_prefix(ENVELOPE_DELIMITER)
        .ok_or_else(|| StoreError::InvalidEnvelope("missing origin tag".to_string()))?;
    Ok((&envelope[..=close], origin))
}

fn parse_field<T: FromStr>(
    key: &str,
    fields: &HashMap<String, String>,
    field: &str,
) -> Result<T, StoreError> {
    fields
        .get(field)
        .ok_or_else(|| corrupt(key, field))?
        .parse()
        .map_err(|_| corrupt(key, field))
}

fn corrupt(key: &str, field: &str) -> StoreError {
    StoreError::CorruptRecord {
        key: key.to_string(),
        field: field.to_string(),
    }
}
