//! Room operations: create, join, leave.
//!
//! どの操作もクライアント／ルームの不在に対して冪等：不在は呼び出し元の
//! ソケットへの通知になり、決して致命傷にはならない。ストアへの書き込みが
//! 成功してから、同じ同期区間内でローカル索引を更新する。

use hiroba_shared::time::{get_jst_timestamp, timestamp_to_jst_rfc3339};

use crate::domain::{ClientId, Room, RoomId, RoomIdFactory};
use crate::infrastructure::dto::{OutboundFrame, RequestType};

use super::coordinator::RoomCoordinator;

impl RoomCoordinator {
    /// Create a room and join its creator to it.
    ///
    /// 作成直後に内部的に JoinRoom を行うため、作成者は常に作成した
    /// ルームの会員になっている。
    pub async fn create_room(&self, client_id: ClientId, room_name: String) {
        let Some(client) = self.resolve_client(client_id).await else {
            tracing::warn!("client '{}' does not exist thus cannot create room", client_id);
            return;
        };

        let room = Room::new(
            RoomIdFactory::generate(),
            room_name,
            client.id,
            get_jst_timestamp(),
        );
        if let Err(e) = self.store.create_room(&room).await {
            tracing::warn!("failed to create room record: {}", e);
            self.push_notice(
                client.id,
                "Room could not be created please retry",
                RequestType::Create,
            )
            .await;
            return;
        }

        let confirmation = OutboundFrame::Create {
            room_id: room.id,
            room_name: room.name.clone(),
            message: format!(
                "Room Created Successfully RoomID: {} RoomName: {}",
                room.id, room.name
            ),
        };
        if let Err(e) = self.pusher.push_to(&client.id, &confirmation.to_json()).await {
            tracing::warn!("failed to send CREATE confirmation to '{}': {}", client.id, e);
        }

        self.join_room(client_id, room.id).await;
    }

    /// Join a room, leaving the current one first if necessary.
    pub async fn join_room(&self, client_id: ClientId, room_id: RoomId) {
        let Some(client) = self.resolve_client(client_id).await else {
            tracing::warn!("client '{}' does not exist thus cannot join room", client_id);
            return;
        };

        // グローバル存在確認。ローカルに残骸があればここで強制退去が走る。
        let Some(room) = self.ensure_room(room_id).await else {
            let reply = OutboundFrame::Join {
                room_id,
                room_name: "NOT FOUND ZERO ROOM".to_string(),
                username: client.name.clone(),
                active_users: 0,
                message: "Room NOT Found 404".to_string(),
            };
            if let Err(e) = self.pusher.push_to(&client.id, &reply.to_json()).await {
                tracing::warn!("failed to send JOIN reply to '{}': {}", client.id, e);
            }
            return;
        };

        // 1 クライアント 1 ルーム。別のルームに居るなら先に抜ける。
        if let Some(current) = self.active_room_of(&client).await {
            if current != room_id {
                self.leave_room(client_id).await;
            }
        }

        // 最初のローカル参加者がチャンネル購読を張る（lazy subscribe）
        let first_local_member = !self.rooms.lock().await.contains_key(&room_id);
        if first_local_member {
            if let Err(e) = self.store.subscribe(room_id).await {
                tracing::warn!("failed to subscribe to room '{}': {}", room_id, e);
            }
        }

        let active_users = match self.store.add_member(room_id, client.id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("failed to add member to room '{}': {}", room_id, e);
                if first_local_member {
                    let _ = self.store.unsubscribe(room_id).await;
                }
                self.push_notice(
                    client.id,
                    "Could not join the room please retry",
                    RequestType::Join,
                )
                .await;
                return;
            }
        };
        if let Err(e) = self.store.set_client_room(client.id, Some(room_id)).await {
            tracing::warn!("failed to record room on client '{}': {}", client.id, e);
        }
        // ストア側の成功を確認してからローカル索引に入れる
        self.rooms
            .lock()
            .await
            .entry(room_id)
            .or_default()
            .insert(client.id);

        let confirmation = OutboundFrame::Join {
            room_id,
            room_name: room.name.clone(),
            username: client.name.clone(),
            active_users,
            message: format!(
                "Joined room {} current Online {},created by {} at {}",
                room.name,
                active_users,
                room.created_by,
                timestamp_to_jst_rfc3339(room.created_at)
            ),
        };
        if let Err(e) = self.pusher.push_to(&client.id, &confirmation.to_json()).await {
            tracing::warn!("failed to send JOIN confirmation to '{}': {}", client.id, e);
        }

        let notification =
            OutboundFrame::notify(format!("{} has Joined the Room", client.name), RequestType::Join);
        let payload = notification.to_json();
        self.broadcast_local(room_id, Some(client.id), &payload).await;
        self.publish_global(room_id, &payload).await;
    }

    /// Leave the current room (socket-driven entry point).
    pub async fn leave_room(&self, client_id: ClientId) {
        let Some(client) = self.resolve_client(client_id).await else {
            tracing::warn!("client '{}' does not exist thus cannot leave room", client_id);
            return;
        };
        self.leave_resolved(&client, true).await;
    }

    /// Leave with an already-resolved client record.
    ///
    /// 再整合経路の合成クライアントもここを通る。`live` が false の場合は
    /// 確認応答を送らない（ソケットが既に閉じている、または存在しない）。
    pub(crate) async fn leave_resolved(&self, client: &crate::domain::Client, live: bool) {
        let Some(room_id) = self.active_room_of(client).await else {
            // どのルームにも居ない。退室は無効な操作なので黙って終わる。
            return;
        };

        // 通知文面にルーム情報が要るので先に読む。消えていても処理は続く。
        let room_meta = self.store.get_room(room_id).await.ok().flatten();

        let local_remaining = {
            let mut rooms = self.rooms.lock().await;
            match rooms.get_mut(&room_id) {
                Some(members) => {
                    members.remove(&client.id);
                    members.len()
                }
                None => 0,
            }
        };

        let remaining_global = match self.store.remove_member(room_id, client.id, true).await {
            Ok(remaining) => remaining,
            Err(e) => {
                tracing::warn!("failed to remove member from room '{}': {}", room_id, e);
                // グローバル判定は保留（TTL が最終的に後始末する）
                -1
            }
        };
        if let Err(e) = self.store.set_client_room(client.id, None).await {
            tracing::warn!("failed to clear room on client '{}': {}", client.id, e);
        }

        // ローカル視点の後始末。グローバルに空かどうかとは独立。
        let deleted_local = local_remaining == 0;
        if deleted_local {
            self.rooms.lock().await.remove(&room_id);
            if let Err(e) = self.store.unsubscribe(room_id).await {
                tracing::warn!("failed to unsubscribe from room '{}': {}", room_id, e);
            }
        }

        // 会員集合のカーディナリティが真実の源。ゼロになったプロセスが
        // ルームを畳む（ローカルの後始末をしたプロセスとは限らない）。
        let deleted_global = remaining_global == 0;
        if deleted_global {
            if let Err(e) = self.store.remove_room(room_id).await {
                tracing::warn!("failed to remove room '{}': {}", room_id, e);
            }
        }

        let is_owner = room_meta
            .as_ref()
            .is_some_and(|room| room.created_by == client.id);
        let notification = if is_owner {
            OutboundFrame::notify(
                format!("Owner of the room {} has left the Room", client.name),
                RequestType::Leave,
            )
        } else {
            OutboundFrame::notify(
                format!("{} has left the Room", client.name),
                RequestType::Leave,
            )
        };
        let payload = notification.to_json();
        if !deleted_local {
            self.broadcast_local(room_id, Some(client.id), &payload).await;
        }
        if !deleted_global {
            self.publish_global(room_id, &payload).await;
        }

        if live {
            let confirmation = OutboundFrame::Leave {
                room_id,
                message: format!(
                    "Left the room {} current active users {}",
                    room_meta.as_ref().map(|room| room.name.as_str()).unwrap_or_default(),
                    room_meta.as_ref().map(|room| room.active_users).unwrap_or(0)
                ),
            };
            if let Err(e) = self.pusher.push_to(&client.id, &confirmation.to_json()).await {
                tracing::warn!("failed to send LEAVE confirmation to '{}': {}", client.id, e);
            }
        }
    }

    pub(crate) async fn push_notice(
        &self,
        client_id: ClientId,
        message: &str,
        notification_of: RequestType,
    ) {
        let notice = OutboundFrame::notify(message, notification_of);
        if let Err(e) = self.pusher.push_to(&client_id, &notice.to_json()).await {
            tracing::warn!("failed to send notice to '{}': {}", client_id, e);
        }
    }
}
