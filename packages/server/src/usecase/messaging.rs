//! Message delivery: rename echoes, chat fanout, pub/sub receive path.
//!
//! 1 つのイベントは発信プロセスではローカル配信、他プロセスへは
//! pub/sub で届く。エンベロープ末尾の発信元タグで自プロセス発の
//! 折り返しを落とすため、各ソケットには各イベントが一度だけ届く。

use std::collections::HashMap;

use crate::domain::{ClientId, RoomId};
use crate::infrastructure::dto::{OutboundFrame, RequestType};
use crate::infrastructure::store::codec;

use super::coordinator::RoomCoordinator;

impl RoomCoordinator {
    /// Change a client's display name.
    ///
    /// 更新できるのは名前だけ。id や作成時刻を触る経路はストア側で
    /// 契約違反として弾かれる。
    pub async fn rename_user(&self, client_id: ClientId, username: String) {
        let Some(client) = self.resolve_client(client_id).await else {
            tracing::warn!("client '{}' does not exist thus cannot rename user", client_id);
            return;
        };
        let previous = client.name.clone();

        if let Err(e) = self
            .store
            .update_client(client.id, &[("name".to_string(), username.clone())])
            .await
        {
            tracing::warn!("failed to rename client '{}': {}", client.id, e);
            self.push_notice(
                client.id,
                "Username could not be changed please retry",
                RequestType::Rename,
            )
            .await;
            return;
        }

        let confirmation = OutboundFrame::Rename {
            username: username.clone(),
            message: format!(
                "Username changed successfully from {} to {}",
                previous, username
            ),
        };
        if let Err(e) = self.pusher.push_to(&client.id, &confirmation.to_json()).await {
            tracing::warn!("failed to send RENAME confirmation to '{}': {}", client.id, e);
        }

        if let Some(room_id) = self.active_room_of(&client).await {
            let notification = OutboundFrame::notify(
                format!(
                    "User {} Changed his username from {} to {}",
                    client.id, previous, username
                ),
                RequestType::Rename,
            );
            let payload = notification.to_json();
            self.broadcast_local(room_id, Some(client.id), &payload).await;
            self.publish_global(room_id, &payload).await;
        }
    }

    /// Send a chat message to the client's current room.
    ///
    /// 宛先ルームはクライアントレコードの roomId から引き、送信の直前に
    /// グローバル存在を確認し直す（join と send の間に管理経路や他
    /// プロセスがルームを消していることがある）。
    pub async fn send_message(&self, client_id: ClientId, message: String, id: Option<String>) {
        let Some(client) = self.resolve_client(client_id).await else {
            tracing::warn!("client '{}' does not exist thus cannot send message", client_id);
            return;
        };
        let message_id = id.unwrap_or_else(|| "0".to_string());

        let Some(room_id) = self.active_room_of(&client).await else {
            // どのルームにも居ない。送信は無効な操作なので黙って終わる。
            return;
        };
        let Some(room) = self.ensure_room(room_id).await else {
            // ルームは消えていた。強制退去と通知は ensure_room 側で済んでいる。
            return;
        };

        if room.active_users <= 0 {
            self.push_notice(
                client.id,
                "Room is empty please let other to join to send message",
                RequestType::Message,
            )
            .await;
            return;
        }

        let chat = OutboundFrame::Message {
            room_id,
            message,
            sender: client.name.clone(),
            id: None,
        };
        let payload = chat.to_json();
        self.broadcast_local(room_id, Some(client.id), &payload).await;
        self.publish_global(room_id, &payload).await;

        let ack = OutboundFrame::notify_with(
            "Message Sent Successfully",
            RequestType::Message,
            HashMap::from([("messageId".to_string(), message_id)]),
        );
        if let Err(e) = self.pusher.push_to(&client.id, &ack.to_json()).await {
            tracing::warn!("failed to send delivery ack to '{}': {}", client.id, e);
        }
    }

    /// Deliver an envelope received from a subscribed room channel.
    ///
    /// 自プロセス発のイベントは発行時に既にローカル配信済みなので、
    /// タグが一致したら黙って捨てる（loopback suppression）。
    pub async fn handle_published(&self, room_id: RoomId, envelope: &str) {
        let (payload, origin) = match codec::split_envelope(envelope) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!("dropping malformed envelope on room '{}': {}", room_id, e);
                return;
            }
        };
        if origin == self.server_id() {
            return;
        }
        let targets = self.local_members(room_id).await;
        if targets.is_empty() {
            return;
        }
        if let Err(e) = self.pusher.broadcast(targets, payload).await {
            tracing::warn!("failed to fan out published event: {}", e);
        }
    }

    /// このプロセスのローカル会員への配信。`exclude` は発信者本人
    /// （本人には確認応答が別に返る）。
    pub(crate) async fn broadcast_local(
        &self,
        room_id: RoomId,
        exclude: Option<ClientId>,
        payload: &str,
    ) {
        let targets: Vec<ClientId> = self
            .local_members(room_id)
            .await
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .collect();
        if targets.is_empty() {
            return;
        }
        if let Err(e) = self.pusher.broadcast(targets, payload).await {
            tracing::warn!("failed to broadcast to room '{}': {}", room_id, e);
        }
    }

    /// 他プロセスへ向けた発行。発信元タグを付けてルームチャンネルに流す。
    /// 発行失敗はソフトエラー（ローカル配信は既に済んでいる）。
    pub(crate) async fn publish_global(&self, room_id: RoomId, payload: &str) {
        let envelope = codec::tag_envelope(payload, self.server_id());
        if let Err(e) = self.store.publish(room_id, &envelope).await {
            tracing::warn!(
                "message cannot be broadcasted to other servers on room '{}': {}",
                room_id,
                e
            );
        }
    }
}
