//! インメモリ ChatStore 実装
//!
//! Redis 実装と同じ契約を、プロセス内の HashMap と broadcast チャンネルで
//! 満たす。テストと単一プロセスでの開発用。
//!
//! - TTL は模倣しない。レコードの期限切れ・管理経路の削除は
//!   [`MemoryBackend`] の delete ヘルパで表現する。
//! - 1 つの [`MemoryBackend`] を共有する複数の [`MemoryChatStore`] が、
//!   1 つの共有ストアを囲む複数のサーバプロセスに相当する。pub/sub も
//!   Redis と同じく、発行したプロセス自身の購読にも配送される。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::domain::{
    ChatStore, Client, ClientId, Room, RoomId, ServerStats, StoreError, StoreEvents,
};

use super::codec;

const CHANNEL_CAPACITY: usize = 256;

/// 共有ストア本体。複数の store インスタンスから共有される。
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    clients: HashMap<ClientId, Client>,
    rooms: HashMap<RoomId, Room>,
    members: HashMap<RoomId, HashSet<ClientId>>,
    servers: HashMap<String, ServerStats>,
    channels: HashMap<RoomId, broadcast::Sender<String>>,
}

impl MemoryBackend {
    /// Read a raw client record (admin surface / test inspection)
    pub async fn client_record(&self, id: ClientId) -> Option<Client> {
        self.state.lock().await.clients.get(&id).cloned()
    }

    /// Read a raw room record (admin surface / test inspection)
    pub async fn room_record(&self, id: RoomId) -> Option<Room> {
        self.state.lock().await.rooms.get(&id).cloned()
    }

    /// Authoritative membership cardinality of a room
    pub async fn member_count(&self, id: RoomId) -> usize {
        self.state
            .lock()
            .await
            .members
            .get(&id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Whether any process currently subscribes to the room's channel
    pub async fn has_channel_subscribers(&self, id: RoomId) -> bool {
        self.state
            .lock()
            .await
            .channels
            .get(&id)
            .is_some_and(|tx| tx.receiver_count() > 0)
    }

    /// 管理経路の削除に相当: ルームレコードだけを消す（会員集合は残る）。
    /// 管理 API の DELETE /room/:id と同じ形の帯域外消滅を作る。
    pub async fn delete_room_record(&self, id: RoomId) {
        self.state.lock().await.rooms.remove(&id);
    }

    /// 管理経路の削除 / TTL 失効に相当: クライアントレコードだけを消す
    pub async fn delete_client_record(&self, id: ClientId) {
        self.state.lock().await.clients.remove(&id);
    }

    /// アドバイザリカウンタを直接書き換える（divergence をテストで作る用）
    pub async fn set_room_active_users(&self, id: RoomId, active_users: i64) {
        if let Some(room) = self.state.lock().await.rooms.get_mut(&id) {
            room.active_users = active_users;
        }
    }
}

/// 1 プロセス分の共有ストアゲートウェイ
pub struct MemoryChatStore {
    backend: Arc<MemoryBackend>,
    events_tx: mpsc::UnboundedSender<(RoomId, String)>,
    forwards: Mutex<HashMap<RoomId, JoinHandle<()>>>,
}

impl MemoryChatStore {
    /// Create a store with its own private backend
    pub fn new() -> (Self, StoreEvents) {
        Self::with_backend(Arc::new(MemoryBackend::default()))
    }

    /// Create a store over a shared backend ("another process on the same
    /// store")
    pub fn with_backend(backend: Arc<MemoryBackend>) -> (Self, StoreEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                backend,
                events_tx,
                forwards: Mutex::new(HashMap::new()),
            },
            events_rx,
        )
    }

    /// Backend handle for test inspection
    pub fn backend(&self) -> Arc<MemoryBackend> {
        self.backend.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().await;
        state.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError> {
        Ok(self.backend.state.lock().await.clients.get(&id).cloned())
    }

    async fn update_client(
        &self,
        id: ClientId,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        codec::guard_client_update(fields)?;
        let mut state = self.backend.state.lock().await;
        let Some(client) = state.clients.get_mut(&id) else {
            return Ok(());
        };
        for (field, value) in fields {
            match field.as_str() {
                "name" => client.name = value.clone(),
                "roomId" => client.room_id = value.parse().ok(),
                _ => {}
            }
        }
        Ok(())
    }

    async fn set_client_room(
        &self,
        id: ClientId,
        room_id: Option<RoomId>,
    ) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().await;
        if let Some(client) = state.clients.get_mut(&id) {
            client.room_id = room_id;
        }
        Ok(())
    }

    async fn remove_client(&self, id: ClientId) -> Result<(), StoreError> {
        self.backend.state.lock().await.clients.remove(&id);
        Ok(())
    }

    async fn create_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().await;
        state.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.backend.state.lock().await.rooms.get(&id).cloned())
    }

    async fn remove_room(&self, id: RoomId) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().await;
        state.rooms.remove(&id);
        state.members.remove(&id);
        Ok(())
    }

    async fn add_member(&self, room_id: RoomId, client_id: ClientId) -> Result<i64, StoreError> {
        let mut state = self.backend.state.lock().await;
        state.members.entry(room_id).or_default().insert(client_id);
        let active_users = match state.rooms.get_mut(&room_id) {
            Some(room) => {
                room.active_users += 1;
                room.active_users
            }
            None => 0,
        };
        Ok(active_users)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        client_id: ClientId,
        decrement_counter: bool,
    ) -> Result<i64, StoreError> {
        let mut state = self.backend.state.lock().await;
        let remaining = match state.members.get_mut(&room_id) {
            Some(members) => {
                members.remove(&client_id);
                members.len()
            }
            None => 0,
        };
        // Redis は空になった集合を自動で消す
        if remaining == 0 {
            state.members.remove(&room_id);
        }
        if decrement_counter {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.active_users -= 1;
            }
        }
        Ok(remaining as i64)
    }

    async fn publish(&self, room_id: RoomId, envelope: &str) -> Result<(), StoreError> {
        let state = self.backend.state.lock().await;
        if let Some(tx) = state.channels.get(&room_id) {
            // 購読者ゼロは Redis と同じく成功扱い
            let _ = tx.send(envelope.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, room_id: RoomId) -> Result<(), StoreError> {
        let mut forwards = self.forwards.lock().await;
        if forwards.contains_key(&room_id) {
            return Ok(());
        }
        let mut rx = {
            let mut state = self.backend.state.lock().await;
            state
                .channels
                .entry(room_id)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        let events_tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if events_tx.send((room_id, envelope)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%room_id, skipped, "memory channel lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        forwards.insert(room_id, handle);
        Ok(())
    }

    async fn unsubscribe(&self, room_id: RoomId) -> Result<(), StoreError> {
        if let Some(handle) = self.forwards.lock().await.remove(&room_id) {
            handle.abort();
        }
        Ok(())
    }

    async fn put_server_stats(&self, stats: &ServerStats) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().await;
        state.servers.insert(stats.server_id.clone(), stats.clone());
        Ok(())
    }

    async fn remove_server(&self, server_id: &str) -> Result<(), StoreError> {
        self.backend.state.lock().await.servers.remove(server_id);
        Ok(())
    }

    async fn list_client_ids(&self) -> Result<Vec<ClientId>, StoreError> {
        Ok(self.backend.state.lock().await.clients.keys().copied().collect())
    }

    async fn list_room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self.backend.state.lock().await.rooms.keys().copied().collect())
    }

    async fn list_servers(&self) -> Result<Vec<ServerStats>, StoreError> {
        Ok(self.backend.state.lock().await.servers.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership_pipeline_counts() {
        // テスト項目: add_member がカウンタの更新後の値を、remove_member が
        //             残存カーディナリティを返す
        // given (前提条件):
        let (store, _events) = MemoryChatStore::new();
        let room = Room::new(RoomId::new(20000), "lobby".to_string(), ClientId::new(1), 0);
        store.create_room(&room).await.unwrap();

        // when (操作):
        let first = store.add_member(room.id, ClientId::new(1)).await.unwrap();
        let second = store.add_member(room.id, ClientId::new(2)).await.unwrap();
        let remaining = store
            .remove_member(room.id, ClientId::new(1), true)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(remaining, 1);
        assert_eq!(store.backend().room_record(room.id).await.unwrap().active_users, 1);
    }

    #[tokio::test]
    async fn test_remove_member_suppresses_counter() {
        // テスト項目: 抑制フラグ付きの remove_member がカウンタを触らない
        // given (前提条件):
        let (store, _events) = MemoryChatStore::new();
        let room = Room::new(RoomId::new(20000), "lobby".to_string(), ClientId::new(1), 0);
        store.create_room(&room).await.unwrap();
        store.add_member(room.id, ClientId::new(1)).await.unwrap();

        // when (操作):
        let remaining = store
            .remove_member(room.id, ClientId::new(1), false)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(remaining, 0);
        assert_eq!(store.backend().room_record(room.id).await.unwrap().active_users, 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribed_stores() {
        // テスト項目: backend を共有する別 store（別プロセス相当）の購読にも
        //             発行者自身の購読にも配送される
        // given (前提条件):
        let (store_a, mut events_a) = MemoryChatStore::new();
        let backend = store_a.backend();
        let (store_b, mut events_b) = MemoryChatStore::with_backend(backend);
        let room_id = RoomId::new(20000);
        store_a.subscribe(room_id).await.unwrap();
        store_b.subscribe(room_id).await.unwrap();

        // when (操作):
        store_a.publish(room_id, r#"{"x":1}>srv-a"#).await.unwrap();

        // then (期待する結果):
        let (got_room_a, envelope_a) = events_a.recv().await.unwrap();
        let (got_room_b, envelope_b) = events_b.recv().await.unwrap();
        assert_eq!(got_room_a, room_id);
        assert_eq!(got_room_b, room_id);
        assert_eq!(envelope_a, r#"{"x":1}>srv-a"#);
        assert_eq!(envelope_b, r#"{"x":1}>srv-a"#);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        // テスト項目: 購読解除後はエンベロープが届かない
        // given (前提条件):
        let (store, mut events) = MemoryChatStore::new();
        let room_id = RoomId::new(20000);
        store.subscribe(room_id).await.unwrap();
        store.unsubscribe(room_id).await.unwrap();

        // when (操作):
        store.publish(room_id, r#"{"x":1}>srv"#).await.unwrap();

        // then (期待する結果):
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_listing_operations() {
        // テスト項目: 管理面が使う一覧系の操作が現存レコードを返す
        // given (前提条件):
        let (store, _events) = MemoryChatStore::new();
        let alice = Client::new(ClientId::new(11111), 1000);
        let bob = Client::new(ClientId::new(22222), 1000);
        store.create_client(&alice).await.unwrap();
        store.create_client(&bob).await.unwrap();
        let room = Room::new(RoomId::new(20000), "lobby".to_string(), alice.id, 0);
        store.create_room(&room).await.unwrap();
        let stats = ServerStats {
            server_id: "srv-a".to_string(),
            started_at: 1000,
            active_clients: 2,
            active_rooms: 1,
            updated_at: 2000,
        };
        store.put_server_stats(&stats).await.unwrap();

        // when (操作):
        let mut client_ids = store.list_client_ids().await.unwrap();
        client_ids.sort();
        let room_ids = store.list_room_ids().await.unwrap();
        let servers = store.list_servers().await.unwrap();

        // then (期待する結果):
        assert_eq!(client_ids, vec![alice.id, bob.id]);
        assert_eq!(room_ids, vec![room.id]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_id, "srv-a");

        // 削除後は一覧から消える
        store.remove_client(alice.id).await.unwrap();
        store.remove_server("srv-a").await.unwrap();
        assert_eq!(store.list_client_ids().await.unwrap(), vec![bob.id]);
        assert!(store.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_client_rejects_protected_field() {
        // テスト項目: 不変フィールドの更新が ProtectedField で弾かれる
        // given (前提条件):
        let (store, _events) = MemoryChatStore::new();
        let client = Client::new(ClientId::new(12345), 1000);
        store.create_client(&client).await.unwrap();

        // when (操作):
        let result = store
            .update_client(client.id, &[("id".to_string(), "99999".to_string())])
            .await;

        // then (期待する結果):
        assert!(matches!(result, Err(StoreError::ProtectedField(_))));
        assert_eq!(
            store.get_client(client.id).await.unwrap().unwrap().id,
            ClientId::new(12345)
        );
    }
}
