//! ChatStore trait 定義
//!
//! 共有ストア（クライアント・ルーム・会員集合・サーバレコード・pub/sub）への
//! 型付きインターフェース。UseCase 層はこの trait に依存し、Redis 実装にも
//! インメモリ実装にも依存しない（依存性の逆転）。
//!
//! ## 原子性
//!
//! 会員集合とアドバイザリカウンタを同時に触る操作（`add_member` /
//! `remove_member`）は、実装側でストアのネイティブなアトミック命令に
//! まとめること。プロセス間の read-modify-write 競合はここで潰す。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    entity::{Client, Room, ServerStats},
    error::StoreError,
    id::{ClientId, RoomId},
};

/// 購読中のルームチャンネルから届いたエンベロープの配送路。
/// 値は (ルーム ID, タグ付きペイロード)。
pub type StoreEvents = mpsc::UnboundedReceiver<(RoomId, String)>;

/// Typed operations over the shared store.
///
/// 管理 API（プロセス外のコラボレータ）も同じゲートウェイを通るため、
/// レコードが帯域外で消えることはこの trait の利用側にとって常に
/// 想定内の事象になる。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    // --- client records ---

    /// Write a fresh client record (with TTL)
    async fn create_client(&self, client: &Client) -> Result<(), StoreError>;

    /// Read a client record. `Ok(None)` means the record expired or was
    /// removed out-of-band.
    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError>;

    /// Update mutable client fields (`name`, `roomId`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProtectedField`] when a field outside the
    /// mutable set (notably `id` and `createdAt`) is passed.
    async fn update_client(
        &self,
        id: ClientId,
        fields: &[(String, String)],
    ) -> Result<(), StoreError>;

    /// Set or clear the client's current room field
    async fn set_client_room(
        &self,
        id: ClientId,
        room_id: Option<RoomId>,
    ) -> Result<(), StoreError>;

    /// Delete a client record
    async fn remove_client(&self, id: ClientId) -> Result<(), StoreError>;

    // --- room records and membership ---

    /// Write a fresh room record (with TTL)
    async fn create_room(&self, room: &Room) -> Result<(), StoreError>;

    /// Read a room record. `Ok(None)` means the room is globally gone.
    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Delete a room record together with its membership set
    async fn remove_room(&self, id: RoomId) -> Result<(), StoreError>;

    /// Atomically add a client to the room's membership set and bump the
    /// advisory counter. Returns the counter value after the increment.
    /// Record TTLs are refreshed opportunistically.
    async fn add_member(&self, room_id: RoomId, client_id: ClientId) -> Result<i64, StoreError>;

    /// Atomically remove a client from the room's membership set and return
    /// the remaining global cardinality (the single source of truth for
    /// "is this room empty").
    ///
    /// `decrement_counter = false` は強制退去用：ルームレコードが既に
    /// 消えている場合にカウンタ更新を抑制する。
    async fn remove_member(
        &self,
        room_id: RoomId,
        client_id: ClientId,
        decrement_counter: bool,
    ) -> Result<i64, StoreError>;

    // --- pub/sub ---

    /// Publish a tagged envelope to the room's channel
    async fn publish(&self, room_id: RoomId, envelope: &str) -> Result<(), StoreError>;

    /// Subscribe this process to the room's channel. Delivered envelopes
    /// arrive on the [`StoreEvents`] receiver handed out at construction.
    async fn subscribe(&self, room_id: RoomId) -> Result<(), StoreError>;

    /// Unsubscribe this process from the room's channel
    async fn unsubscribe(&self, room_id: RoomId) -> Result<(), StoreError>;

    // --- server registry ---

    /// Write or refresh this process's heartbeat/statistics record
    async fn put_server_stats(&self, stats: &ServerStats) -> Result<(), StoreError>;

    /// Delete a server record (part of orderly shutdown)
    async fn remove_server(&self, server_id: &str) -> Result<(), StoreError>;

    // --- admin surface (called by the administrative API, not by the coordinator) ---

    /// List all client ids present in the store
    async fn list_client_ids(&self) -> Result<Vec<ClientId>, StoreError>;

    /// List all room ids present in the store
    async fn list_room_ids(&self) -> Result<Vec<RoomId>, StoreError>;

    /// List all per-process server records
    async fn list_servers(&self) -> Result<Vec<ServerStats>, StoreError>;
}
