//! WebSocket を使った MessagePusher 実装
//!
//! ## 責務
//!
//! - ソケット↔クライアントの双方向索引の管理
//! - ローカルソケットへのメッセージ送信（push_to / broadcast）
//!
//! ## 不変条件
//!
//! ソケットが開いている間、`clients` と `sockets` は互いに鏡像である。
//! 登録と削除は必ず両方向を同時に触る。片側だけのエントリは
//! 再整合（leaky client の修復）の対象になる。
//!
//! WebSocket の生成は UI 層（`ui/handler/websocket.rs`）で行われ、
//! この実装は生成された `UnboundedSender` を受け取って送信に使う。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ClientId, MessagePushError, MessagePusher, PusherChannel, SocketId};

struct ClientHandle {
    socket_id: SocketId,
    sender: PusherChannel,
}

/// ソケット↔クライアント索引と送信チャンネルのレジストリ
#[derive(Default)]
pub struct SocketRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<ClientId, ClientHandle>,
    sockets: HashMap<SocketId, ClientId>,
}

impl SocketRegistry {
    /// 新しい SocketRegistry を作成
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessagePusher for SocketRegistry {
    async fn register(&self, socket_id: SocketId, client_id: ClientId, sender: PusherChannel) {
        let mut inner = self.inner.lock().await;
        inner.sockets.insert(socket_id, client_id);
        inner.clients.insert(client_id, ClientHandle { socket_id, sender });
        tracing::debug!(%client_id, socket_id, "client registered to socket registry");
    }

    async fn unregister(&self, client_id: &ClientId) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.clients.remove(client_id) {
            inner.sockets.remove(&handle.socket_id);
            tracing::debug!(%client_id, "client unregistered from socket registry");
        }
    }

    async fn client_of_socket(&self, socket_id: SocketId) -> Option<ClientId> {
        self.inner.lock().await.sockets.get(&socket_id).copied()
    }

    async fn push_to(&self, client_id: &ClientId, content: &str) -> Result<(), MessagePushError> {
        let inner = self.inner.lock().await;
        let Some(handle) = inner.clients.get(client_id) else {
            return Err(MessagePushError::ClientNotFound(client_id.to_string()));
        };
        handle
            .sender
            .send(content.to_string())
            .map_err(|e| MessagePushError::PushFailed(e.to_string()))
    }

    async fn broadcast(
        &self,
        targets: Vec<ClientId>,
        content: &str,
    ) -> Result<(), MessagePushError> {
        let inner = self.inner.lock().await;
        for target in targets {
            if let Some(handle) = inner.clients.get(&target) {
                // ブロードキャストでは一部の送信失敗を許容
                if let Err(e) = handle.sender.send(content.to_string()) {
                    tracing::warn!("failed to push message to client '{}': {}", target, e);
                }
            } else {
                tracing::warn!("client '{}' not found during broadcast, skipping", target);
            }
        }
        Ok(())
    }

    async fn broadcast_all(&self, content: &str) -> Result<(), MessagePushError> {
        let inner = self.inner.lock().await;
        for (client_id, handle) in inner.clients.iter() {
            if handle.sender.send(content.to_string()).is_err() {
                tracing::warn!("failed to push message to client '{}'", client_id);
            }
        }
        Ok(())
    }

    async fn connected_count(&self) -> usize {
        self.inner.lock().await.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (PusherChannel, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_register_mirrors_both_directions() {
        // テスト項目: 登録後、両方向の索引が揃っている
        // given (前提条件):
        let registry = SocketRegistry::new();
        let (tx, _rx) = channel();
        let client_id = ClientId::new(12345);

        // when (操作):
        registry.register(1, client_id, tx).await;

        // then (期待する結果):
        assert_eq!(registry.client_of_socket(1).await, Some(client_id));
        assert_eq!(registry.connected_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_clears_both_directions() {
        // テスト項目: 削除で両方向のエントリが同時に消える
        // given (前提条件):
        let registry = SocketRegistry::new();
        let (tx, _rx) = channel();
        let client_id = ClientId::new(12345);
        registry.register(1, client_id, tx).await;

        // when (操作):
        registry.unregister(&client_id).await;

        // then (期待する結果):
        assert_eq!(registry.client_of_socket(1).await, None);
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        // テスト項目: 既に消えたクライアントの削除は何も起こさない
        // given (前提条件):
        let registry = SocketRegistry::new();
        let client_id = ClientId::new(12345);

        // when (操作):
        registry.unregister(&client_id).await;
        registry.unregister(&client_id).await;

        // then (期待する結果):
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_push_to_delivers() {
        // テスト項目: 特定のクライアントにメッセージを送信できる
        // given (前提条件):
        let registry = SocketRegistry::new();
        let (tx, mut rx) = channel();
        let client_id = ClientId::new(12345);
        registry.register(1, client_id, tx).await;

        // when (操作):
        let result = registry.push_to(&client_id, "Hello").await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some("Hello".to_string()));
    }

    #[tokio::test]
    async fn test_push_to_unknown_client_fails() {
        // テスト項目: 未登録クライアントへの送信はエラーを返す
        // given (前提条件):
        let registry = SocketRegistry::new();

        // when (操作):
        let result = registry.push_to(&ClientId::new(12345), "Hello").await;

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(MessagePushError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_missing_targets() {
        // テスト項目: ブロードキャスト時、一部のクライアントが存在しなくても
        //             残りに配送される
        // given (前提条件):
        let registry = SocketRegistry::new();
        let (tx, mut rx) = channel();
        let alice = ClientId::new(11111);
        let ghost = ClientId::new(22222);
        registry.register(1, alice, tx).await;

        // when (操作):
        let result = registry.broadcast(vec![alice, ghost], "hi").await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some("hi".to_string()));
    }

    #[tokio::test]
    async fn test_broadcast_all_reaches_every_client() {
        // テスト項目: broadcast_all が全接続に届く
        // given (前提条件):
        let registry = SocketRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register(1, ClientId::new(11111), tx1).await;
        registry.register(2, ClientId::new(22222), tx2).await;

        // when (操作):
        registry.broadcast_all("bye").await.unwrap();

        // then (期待する結果):
        assert_eq!(rx1.recv().await, Some("bye".to_string()));
        assert_eq!(rx2.recv().await, Some("bye".to_string()));
    }
}
