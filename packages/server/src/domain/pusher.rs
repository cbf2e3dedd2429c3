//! MessagePusher trait 定義
//!
//! ローカルソケットへの配信インターフェース。ソケット↔クライアントの
//! 双方向索引もここが守る：片側だけのエントリ（leaky client）を
//! 作らないことが実装側の不変条件。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{error::MessagePushError, id::ClientId};

/// プロセス内で採番されるソケット識別子
pub type SocketId = u64;

/// クライアントへの送信チャンネル（シリアライズ済みフレームを流す）
pub type PusherChannel = mpsc::UnboundedSender<String>;

/// Local fanout over open WebSocket connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// Register a newly opened socket and its client identity.
    /// Both directions of the socket↔client index are inserted together.
    async fn register(&self, socket_id: SocketId, client_id: ClientId, sender: PusherChannel);

    /// Remove a client and its socket from both index directions.
    /// Idempotent: unknown clients are a no-op.
    async fn unregister(&self, client_id: &ClientId);

    /// Reverse lookup used by the disconnect path
    async fn client_of_socket(&self, socket_id: SocketId) -> Option<ClientId>;

    /// Push a frame to one client's socket
    async fn push_to(&self, client_id: &ClientId, content: &str) -> Result<(), MessagePushError>;

    /// Push a frame to each of the given clients. Individual failures are
    /// tolerated (logged, not returned).
    async fn broadcast(
        &self,
        targets: Vec<ClientId>,
        content: &str,
    ) -> Result<(), MessagePushError>;

    /// Push a frame to every connected client (shutdown notice)
    async fn broadcast_all(&self, content: &str) -> Result<(), MessagePushError>;

    /// Number of sockets currently registered on this process
    async fn connected_count(&self) -> usize;
}
