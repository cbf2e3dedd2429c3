//! Room/membership coordinator: state and connection lifecycle.
//!
//! 1 プロセスにつき 1 つ。共有ストアが真実の源、ここが持つのは
//! ローカルな視界（どのルームにこのプロセスのソケットが居るか）だけ。
//! ローカル索引の変更はこの構造体のメソッドを通してのみ行われ、
//! pub/sub 由来のイベントもソケット由来の操作と同じ経路を通る。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use hiroba_shared::time::get_jst_timestamp;

use crate::domain::{
    ChatStore, Client, ClientId, ClientIdFactory, MessagePusher, PusherChannel, RoomId,
    ServerStats, SocketId, StoreError, StoreEvents,
};
use crate::infrastructure::dto::{InboundFrame, OutboundFrame, RequestType};

/// Distributed room/membership coordinator for one server process.
pub struct RoomCoordinator {
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) pusher: Arc<dyn MessagePusher>,
    /// ルーム ID → このプロセスのローカル会員集合。
    /// エントリの存在＝そのルームのチャンネルを購読中。
    pub(crate) rooms: Mutex<HashMap<RoomId, HashSet<ClientId>>>,
    server_id: String,
    next_socket_id: AtomicU64,
    started_at: i64,
}

impl RoomCoordinator {
    /// Create a coordinator for this process.
    ///
    /// # Arguments
    ///
    /// * `store` - Shared store gateway
    /// * `pusher` - Local socket registry
    /// * `server_id` - This process's unique id (tags published envelopes)
    pub fn new(
        store: Arc<dyn ChatStore>,
        pusher: Arc<dyn MessagePusher>,
        server_id: String,
    ) -> Self {
        Self {
            store,
            pusher,
            rooms: Mutex::new(HashMap::new()),
            server_id,
            next_socket_id: AtomicU64::new(1),
            started_at: get_jst_timestamp(),
        }
    }

    /// This process's id
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Register an ephemeral client for a newly opened socket.
    ///
    /// Generates a fresh id, writes the client record to the store, inserts
    /// both local index entries and sends the CONNECT confirmation. On a
    /// store failure nothing is registered locally and the caller should
    /// close the socket.
    pub async fn register_client(
        &self,
        sender: PusherChannel,
    ) -> Result<(SocketId, Client), StoreError> {
        let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let client = Client::new(ClientIdFactory::generate(), get_jst_timestamp());
        self.store.create_client(&client).await?;
        self.pusher.register(socket_id, client.id, sender).await;

        let confirmation = OutboundFrame::Connect {
            id: client.id,
            username: client.name.clone(),
            message: "Welcome to server".to_string(),
        };
        if let Err(e) = self.pusher.push_to(&client.id, &confirmation.to_json()).await {
            tracing::warn!("failed to send CONNECT to '{}': {}", client.id, e);
        }
        Ok((socket_id, client))
    }

    /// Route a decoded inbound frame to exactly one operation.
    pub async fn dispatch(&self, client_id: ClientId, frame: InboundFrame) {
        match frame {
            InboundFrame::Create { room_name } => self.create_room(client_id, room_name).await,
            InboundFrame::Join { room_id } => self.join_room(client_id, room_id).await,
            InboundFrame::Message { room_id: _, message, id } => {
                // 宛先ルームはストア上のクライアントレコードから引く。
                // フレームの roomId は信用しない。
                self.send_message(client_id, message, id).await;
            }
            InboundFrame::Rename { username } => self.rename_user(client_id, username).await,
            InboundFrame::Leave => self.leave_room(client_id).await,
            InboundFrame::Invalid => {
                let notice = OutboundFrame::notify("Invalid message type", RequestType::Notify);
                if let Err(e) = self.pusher.push_to(&client_id, &notice.to_json()).await {
                    tracing::warn!("failed to send invalid-type notice to '{}': {}", client_id, e);
                }
            }
        }
    }

    /// Disconnect path entered from the socket's close handler.
    pub async fn disconnect_by_socket(&self, socket_id: SocketId) {
        match self.pusher.client_of_socket(socket_id).await {
            Some(client_id) => self.disconnect_client(client_id).await,
            None => tracing::debug!(socket_id, "disconnect for socket with no client entry"),
        }
    }

    /// Remove a client entirely: leave its room, delete the store record,
    /// drop both local index entries. Idempotent: a second call for an
    /// already-removed client is a logged no-op.
    pub async fn disconnect_client(&self, client_id: ClientId) {
        match self.resolve_client(client_id).await {
            Some(client) => {
                if client.room_id.is_some() {
                    self.leave_resolved(&client, false).await;
                }
                if let Err(e) = self.store.remove_client(client.id).await {
                    tracing::warn!("failed to remove client record '{}': {}", client.id, e);
                }
            }
            // resolve_client が消滅レコードの後始末まで済ませている
            None => tracing::info!("disconnect for already-removed client '{}'", client_id),
        }
        self.pusher.unregister(&client_id).await;
        tracing::info!("client '{}' disconnected", client_id);
    }

    /// Spawn the pump that feeds published envelopes into the coordinator.
    /// Runs until the store's event stream closes.
    pub fn spawn_event_pump(self: Arc<Self>, mut events: StoreEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((room_id, envelope)) = events.recv().await {
                self.handle_published(room_id, &envelope).await;
            }
            tracing::debug!("store event stream closed");
        })
    }

    /// Snapshot of this process's current statistics
    pub async fn server_stats(&self) -> ServerStats {
        ServerStats {
            server_id: self.server_id.clone(),
            started_at: self.started_at,
            active_clients: self.pusher.connected_count().await,
            active_rooms: self.rooms.lock().await.len(),
            updated_at: get_jst_timestamp(),
        }
    }

    /// Write or refresh this process's server record
    pub async fn publish_server_stats(&self) -> Result<(), StoreError> {
        let stats = self.server_stats().await;
        self.store.put_server_stats(&stats).await
    }

    /// Delete this process's server record (last step of orderly shutdown)
    pub async fn remove_server_record(&self) {
        if let Err(e) = self.store.remove_server(&self.server_id).await {
            tracing::warn!("failed to remove server record: {}", e);
        }
    }

    /// Best-effort disconnect notice to every open socket
    pub async fn notify_shutdown(&self) {
        let notice = OutboundFrame::notify(
            "Server is shutting down please reconnect later",
            RequestType::Leave,
        );
        if let Err(e) = self.pusher.broadcast_all(&notice.to_json()).await {
            tracing::warn!("failed to broadcast shutdown notice: {}", e);
        }
    }

    /// ローカル会員のスナップショット（配信用）
    pub(crate) async fn local_members(&self, room_id: RoomId) -> Vec<ClientId> {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}
