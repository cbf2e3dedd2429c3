//! Inline repair of local/global state divergence.
//!
//! ソケットの寿命・ストアの TTL・管理経路の削除はトランザクションで
//! 結ばれていないため、ズレは通常の操作処理の中で見つけ次第その場で
//! 直す（別スイープは走らない）。修復はこのプロセスのローカルな
//! ベストエフォートで、他プロセスの残骸は TTL が上限。
//!
//! 3 つのケース:
//! 1. ローカルには居るがストアに居ないクライアント → 合成レコードで
//!    退室させ、索引を両方向とも畳む
//! 2. ローカルに追跡中だがストアに無いルーム → ローカル会員を強制退去
//! 3. クライアントレコードの roomId がローカルの実態と食い違う → 先に消す

use crate::domain::{Client, ClientId, Room, RoomId};
use crate::infrastructure::dto::{OutboundFrame, RequestType};

use super::coordinator::RoomCoordinator;

impl RoomCoordinator {
    /// Resolve a client id against the store.
    ///
    /// ローカルで知られている id がストアに無ければ（TTL 失効か管理
    /// 経路の削除）、その場でケース 1 の修復を行い `None` を返す。
    pub(crate) async fn resolve_client(&self, client_id: ClientId) -> Option<Client> {
        match self.store.get_client(client_id).await {
            Ok(Some(client)) => Some(client),
            Ok(None) => {
                self.repair_vanished_client(client_id).await;
                None
            }
            Err(e) => {
                tracing::warn!("failed to read client '{}': {}", client_id, e);
                None
            }
        }
    }

    /// ケース 1: 消えたクライアントの後始末。
    ///
    /// ローカル索引に残っていれば合成レコードで退室経路に通し、会員数を
    /// 合わせる。ソケットには追放コード付きの通知を送ってから、索引を
    /// 両方向とも畳む（以後このソケットは居ないものとして扱われる）。
    async fn repair_vanished_client(&self, client_id: ClientId) {
        let room_id = {
            let rooms = self.rooms.lock().await;
            rooms.iter().find_map(|(room_id, members)| {
                members.contains(&client_id).then_some(*room_id)
            })
        };
        if let Some(room_id) = room_id {
            tracing::warn!(
                "client '{}' vanished from the store while in room '{}', repairing",
                client_id,
                room_id
            );
            let synthesized = Client::synthesized(client_id, room_id);
            self.leave_resolved(&synthesized, false).await;
        }

        let notice = OutboundFrame::banned_notice();
        if let Err(e) = self.pusher.push_to(&client_id, &notice.to_json()).await {
            tracing::debug!("could not deliver removal notice to '{}': {}", client_id, e);
        }
        self.pusher.unregister(&client_id).await;
    }

    /// ケース 3 の入口: クライアントの現在のルームを返す。
    ///
    /// roomId がローカル索引に無いルームを指している、またはそのルームの
    /// ローカル会員に本人が居ない場合、フィールドは漏れとみなして
    /// ストア側を先に掃除し `None` を返す。
    pub(crate) async fn active_room_of(&self, client: &Client) -> Option<RoomId> {
        let room_id = client.room_id?;
        let is_local_member = self
            .rooms
            .lock()
            .await
            .get(&room_id)
            .is_some_and(|members| members.contains(&client.id));
        if is_local_member {
            return Some(room_id);
        }

        tracing::warn!(
            "client '{}' carries stale room '{}', clearing the field",
            client.id,
            room_id
        );
        if let Err(e) = self.store.set_client_room(client.id, None).await {
            tracing::warn!("failed to clear stale room on client '{}': {}", client.id, e);
        }
        None
    }

    /// Confirm a room still exists globally.
    ///
    /// ストアに無ければケース 2 の修復（ローカル会員の強制退去）を
    /// 済ませてから `None` を返す。
    pub(crate) async fn ensure_room(&self, room_id: RoomId) -> Option<Room> {
        match self.store.get_room(room_id).await {
            Ok(Some(room)) => Some(room),
            Ok(None) => {
                self.evict_vanished_room(room_id).await;
                None
            }
            Err(e) => {
                tracing::warn!("failed to read room '{}': {}", room_id, e);
                None
            }
        }
    }

    /// ケース 2: ストアから消えたルームのローカル会員を強制退去させる。
    ///
    /// ルームレコードは既に無いので、各会員の remove-member では
    /// アドバイザリカウンタの減算を抑制する。
    pub(crate) async fn evict_vanished_room(&self, room_id: RoomId) {
        let members = self.rooms.lock().await.remove(&room_id);
        let Some(members) = members else {
            // ローカルに追跡していないルーム。直すものが無い。
            return;
        };
        tracing::warn!(
            "room '{}' vanished from the store, evicting {} local member(s)",
            room_id,
            members.len()
        );

        let notice =
            OutboundFrame::notify("Room has been removed by System/ Admin", RequestType::Leave);
        let payload = notice.to_json();
        for client_id in members {
            if let Err(e) = self.store.remove_member(room_id, client_id, false).await {
                tracing::warn!(
                    "failed to remove evicted member '{}' from room '{}': {}",
                    client_id,
                    room_id,
                    e
                );
            }
            if let Err(e) = self.store.set_client_room(client_id, None).await {
                tracing::warn!("failed to clear room on evicted client '{}': {}", client_id, e);
            }
            if let Err(e) = self.pusher.push_to(&client_id, &payload).await {
                tracing::debug!("could not notify evicted client '{}': {}", client_id, e);
            }
        }

        if let Err(e) = self.store.unsubscribe(room_id).await {
            tracing::warn!("failed to unsubscribe from vanished room '{}': {}", room_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{connect, count_frames, drain_frames, expect_frame, spawn_process};
    use crate::domain::pusher::MessagePusher;
    use crate::domain::RoomId;
    use crate::infrastructure::dto::OutboundFrame;
    use crate::infrastructure::store::MemoryBackend;
    use hiroba_shared::consts::CLIENT_BANNED_CODE;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_vanished_client_is_left_out_of_its_room() {
        // テスト項目: ストアから消えたクライアントが次の操作で発見され、
        //             合成退室で会員数が直り、追放通知が届き、索引が畳まれる
        // given (前提条件):
        let backend = Arc::new(MemoryBackend::default());
        let process = spawn_process(&backend, "srv-a").await;
        let mut alice = connect(&process).await;
        let mut bob = connect(&process).await;
        process
            .coordinator
            .create_room(alice.client.id, "lobby".to_string())
            .await;
        let room_id = {
            let frames = drain_frames(&mut alice.rx);
            let OutboundFrame::Create { room_id, .. } = expect_frame(&frames, "CREATE") else {
                panic!("expected CREATE confirmation");
            };
            room_id
        };
        process.coordinator.join_room(bob.client.id, room_id).await;
        drain_frames(&mut alice.rx);
        drain_frames(&mut bob.rx);

        // 管理経路の削除（TTL 失効と同じ形）
        backend.delete_client_record(alice.client.id).await;

        // when (操作): 消えた本人が次の操作を試みる
        process
            .coordinator
            .send_message(alice.client.id, "hi".to_string(), None)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // then (期待する結果):
        let alice_frames = drain_frames(&mut alice.rx);
        let OutboundFrame::Notify { additional, .. } = expect_frame(&alice_frames, "NOTIFY")
        else {
            panic!("expected removal notice");
        };
        assert_eq!(
            additional.unwrap().get("messageId"),
            Some(&CLIENT_BANNED_CODE.to_string())
        );

        // 会員数が直っている（bob だけが残る）
        assert_eq!(backend.member_count(room_id).await, 1);
        assert_eq!(
            process.coordinator.local_members(room_id).await,
            vec![bob.client.id]
        );
        // 索引は両方向とも空
        assert_eq!(
            process.pusher.client_of_socket(alice.socket_id).await,
            None
        );

        // 残った会員には退室通知が届いている
        let bob_frames = drain_frames(&mut bob.rx);
        assert_eq!(count_frames(&bob_frames, "NOTIFY"), 1);
    }

    #[tokio::test]
    async fn test_message_to_vanished_room_evicts_local_members() {
        // テスト項目: 帯域外で消されたルームへの送信が強制退去になる。
        //             配送確認の代わりに削除通知が届き、索引と会員集合が空になる
        // given (前提条件):
        let backend = Arc::new(MemoryBackend::default());
        let process = spawn_process(&backend, "srv-a").await;
        let mut alice = connect(&process).await;
        process
            .coordinator
            .create_room(alice.client.id, "lobby".to_string())
            .await;
        let room_id = {
            let frames = drain_frames(&mut alice.rx);
            let OutboundFrame::Create { room_id, .. } = expect_frame(&frames, "CREATE") else {
                panic!("expected CREATE confirmation");
            };
            room_id
        };
        drain_frames(&mut alice.rx);

        // 管理経路の削除はルームレコードだけを消す（会員集合は残る）
        backend.delete_room_record(room_id).await;

        // when (操作):
        process
            .coordinator
            .send_message(alice.client.id, "hi".to_string(), Some("m1".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // then (期待する結果):
        let frames = drain_frames(&mut alice.rx);
        let OutboundFrame::Notify { message, additional, .. } = expect_frame(&frames, "NOTIFY")
        else {
            panic!("expected removal notice");
        };
        assert_eq!(message, "Room has been removed by System/ Admin");
        assert!(additional.is_none());

        assert!(process.coordinator.local_members(room_id).await.is_empty());
        assert_eq!(backend.member_count(room_id).await, 0);
        assert!(!backend.has_channel_subscribers(room_id).await);
        // クライアント側の roomId も掃除されている
        let stored = backend.client_record(alice.client.id).await.unwrap();
        assert_eq!(stored.room_id, None);
    }

    #[tokio::test]
    async fn test_stale_room_field_is_cleared() {
        // テスト項目: ローカル索引に実態の無い roomId は計算に使われず、
        //             ストア側のフィールドも先に消される
        // given (前提条件):
        let backend = Arc::new(MemoryBackend::default());
        let process = spawn_process(&backend, "srv-a").await;
        let mut alice = connect(&process).await;
        drain_frames(&mut alice.rx);

        // どこにも参加していないのに roomId だけが残っている状態を作る
        process
            .coordinator
            .store
            .set_client_room(alice.client.id, Some(RoomId::new(54321)))
            .await
            .unwrap();

        // when (操作):
        process.coordinator.leave_room(alice.client.id).await;

        // then (期待する結果): 退室確認は届かず、フィールドは消えている
        let frames = drain_frames(&mut alice.rx);
        assert_eq!(count_frames(&frames, "LEAVE"), 0);
        let stored = backend.client_record(alice.client.id).await.unwrap();
        assert_eq!(stored.room_id, None);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        // テスト項目: 同じクライアントの切断を二度呼んでも落ちず、
        //             索引にはどちらの向きにもエントリが残らない
        // given (前提条件):
        let backend = Arc::new(MemoryBackend::default());
        let process = spawn_process(&backend, "srv-a").await;
        let alice = connect(&process).await;

        // when (操作):
        process.coordinator.disconnect_client(alice.client.id).await;
        process.coordinator.disconnect_client(alice.client.id).await;

        // then (期待する結果):
        assert_eq!(process.pusher.client_of_socket(alice.socket_id).await, None);
        assert_eq!(process.pusher.connected_count().await, 0);
        assert!(backend.client_record(alice.client.id).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_by_socket_runs_room_cleanup() {
        // テスト項目: ソケット経由の切断が退室とレコード削除まで進める
        // given (前提条件):
        let backend = Arc::new(MemoryBackend::default());
        let process = spawn_process(&backend, "srv-a").await;
        let mut alice = connect(&process).await;
        process
            .coordinator
            .create_room(alice.client.id, "lobby".to_string())
            .await;
        let room_id = {
            let frames = drain_frames(&mut alice.rx);
            let OutboundFrame::Create { room_id, .. } = expect_frame(&frames, "CREATE") else {
                panic!("expected CREATE confirmation");
            };
            room_id
        };

        // when (操作):
        process.coordinator.disconnect_by_socket(alice.socket_id).await;

        // then (期待する結果):
        assert!(backend.client_record(alice.client.id).await.is_none());
        assert!(backend.room_record(room_id).await.is_none());
        assert!(process.coordinator.local_members(room_id).await.is_empty());
        assert_eq!(process.pusher.connected_count().await, 0);
    }
}
