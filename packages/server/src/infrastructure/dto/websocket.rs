//! WebSocket message DTOs for the chat backend.
//!
//! 全フレームは `type` フィールドで判別する JSON テキストフレーム。
//! 受信側は 5 種類の操作＋明示的な `Invalid`（未知の type）からなる
//! タグ付きユニオンとしてデコードする。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hiroba_shared::consts::CLIENT_BANNED_CODE;

use crate::domain::{ClientId, RoomId};

/// Request type discriminator shared by inbound and outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    Connect,
    Create,
    Join,
    Message,
    Rename,
    Leave,
    Notify,
}

/// Frames a client may send.
///
/// 必須フィールドの欠落はデコード失敗（呼び出し側がエラーフレームを
/// 返す）。未知の `type` は `Invalid` に落ち、こちらも明示的な
/// エラーフレームになる。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    #[serde(rename = "CREATE", rename_all = "camelCase")]
    Create { room_name: String },

    #[serde(rename = "JOIN", rename_all = "camelCase")]
    Join { room_id: RoomId },

    #[serde(rename = "MESSAGE", rename_all = "camelCase")]
    Message {
        room_id: RoomId,
        message: String,
        /// Client-supplied message id echoed back in the delivery ack
        #[serde(default)]
        id: Option<String>,
    },

    #[serde(rename = "RENAME")]
    Rename { username: String },

    #[serde(rename = "LEAVE")]
    Leave,

    /// Unknown or missing discriminator
    #[serde(other)]
    Invalid,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Connection confirmation carrying the assigned identity
    #[serde(rename = "CONNECT")]
    Connect {
        id: ClientId,
        username: String,
        message: String,
    },

    /// Room creation confirmation
    #[serde(rename = "CREATE", rename_all = "camelCase")]
    Create {
        room_id: RoomId,
        room_name: String,
        message: String,
    },

    /// Join confirmation with the advisory member count
    #[serde(rename = "JOIN", rename_all = "camelCase")]
    Join {
        room_id: RoomId,
        room_name: String,
        username: String,
        active_users: i64,
        message: String,
    },

    /// Leave confirmation
    #[serde(rename = "LEAVE", rename_all = "camelCase")]
    Leave { room_id: RoomId, message: String },

    /// A chat message fanned out to room members
    #[serde(rename = "MESSAGE", rename_all = "camelCase")]
    Message {
        room_id: RoomId,
        message: String,
        sender: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Rename confirmation sent to the renaming client
    #[serde(rename = "RENAME")]
    Rename { username: String, message: String },

    /// System notification (join/leave/rename echoes, delivery acks, errors)
    #[serde(rename = "NOTIFY", rename_all = "camelCase")]
    Notify {
        message: String,
        notification_of: RequestType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional: Option<HashMap<String, String>>,
    },
}

impl OutboundFrame {
    /// Build a plain system notification
    pub fn notify(message: impl Into<String>, notification_of: RequestType) -> Self {
        Self::Notify {
            message: message.into().trim().to_string(),
            notification_of,
            additional: None,
        }
    }

    /// Build a system notification carrying extra key/value data
    pub fn notify_with(
        message: impl Into<String>,
        notification_of: RequestType,
        additional: HashMap<String, String>,
    ) -> Self {
        Self::Notify {
            message: message.into().trim().to_string(),
            notification_of,
            additional: Some(additional),
        }
    }

    /// Notice for a client whose record was removed by the system or an
    /// admin. The reserved message id tells the frontend to abandon its
    /// retry bookkeeping and reconnect.
    pub fn banned_notice() -> Self {
        Self::notify_with(
            "You have been removed from server by System/ Admin.Kindly rejoin",
            RequestType::Message,
            HashMap::from([("messageId".to_string(), CLIENT_BANNED_CODE.to_string())]),
        )
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("outbound frames always serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_create_decodes() {
        // テスト項目: CREATE フレームが room_name 付きでデコードされる
        // given (前提条件):
        let json = r#"{"type":"CREATE","message":"","roomName":"lobby"}"#;

        // when (操作):
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        assert_eq!(
            frame,
            InboundFrame::Create {
                room_name: "lobby".to_string()
            }
        );
    }

    #[test]
    fn test_inbound_message_without_id_decodes() {
        // テスト項目: id を省略した MESSAGE フレームがデコードされる
        // given (前提条件):
        let json = r#"{"type":"MESSAGE","roomId":12345,"message":"hi"}"#;

        // when (操作):
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        assert_eq!(
            frame,
            InboundFrame::Message {
                room_id: RoomId::new(12345),
                message: "hi".to_string(),
                id: None,
            }
        );
    }

    #[test]
    fn test_inbound_message_with_id_decodes() {
        // テスト項目: クライアント採番の id が保持される
        // given (前提条件):
        let json = r#"{"type":"MESSAGE","roomId":12345,"message":"hi","id":"m1"}"#;

        // when (操作):
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        let InboundFrame::Message { id, .. } = frame else {
            panic!("expected MESSAGE frame");
        };
        assert_eq!(id, Some("m1".to_string()));
    }

    #[test]
    fn test_inbound_leave_tolerates_extra_fields() {
        // テスト項目: LEAVE フレームが余分なフィールドを無視してデコードされる
        // given (前提条件):
        let json = r#"{"type":"LEAVE","message":"bye","roomId":12345}"#;

        // when (操作):
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        assert_eq!(frame, InboundFrame::Leave);
    }

    #[test]
    fn test_inbound_unknown_type_is_invalid() {
        // テスト項目: 未知の type は明示的に Invalid バリアントになる
        // given (前提条件):
        let json = r#"{"type":"TELEPORT","roomId":12345}"#;

        // when (操作):
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        assert_eq!(frame, InboundFrame::Invalid);
    }

    #[test]
    fn test_inbound_missing_required_field_fails() {
        // テスト項目: 必須フィールドが欠けたフレームはデコード失敗になる
        // given (前提条件):
        let json = r#"{"type":"JOIN","message":""}"#;

        // when (操作):
        let result = serde_json::from_str::<InboundFrame>(json);

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_notify_serializes_camel_case() {
        // テスト項目: NOTIFY フレームが notificationOf / additional を
        //             camelCase で出力する
        // given (前提条件):
        let frame = OutboundFrame::notify_with(
            "Message Sent Successfully",
            RequestType::Message,
            HashMap::from([("messageId".to_string(), "m1".to_string())]),
        );

        // when (操作):
        let json = frame.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        // then (期待する結果):
        assert_eq!(value["type"], "NOTIFY");
        assert_eq!(value["notificationOf"], "MESSAGE");
        assert_eq!(value["additional"]["messageId"], "m1");
    }

    #[test]
    fn test_outbound_notify_trims_message() {
        // テスト項目: 通知本文の前後空白が落とされる
        // given (前提条件):
        let frame = OutboundFrame::notify("  hello  ", RequestType::Join);

        // then (期待する結果):
        let OutboundFrame::Notify { message, .. } = frame else {
            panic!("expected NOTIFY frame");
        };
        assert_eq!(message, "hello");
    }

    #[test]
    fn test_outbound_notify_omits_empty_additional() {
        // テスト項目: additional なしの NOTIFY にはフィールド自体が現れない
        // given (前提条件):
        let frame = OutboundFrame::notify("hi", RequestType::Leave);

        // when (操作):
        let json = frame.to_json();

        // then (期待する結果):
        assert!(!json.contains("additional"));
    }

    #[test]
    fn test_banned_notice_carries_reserved_code() {
        // テスト項目: 追放通知が予約済み messageId を運ぶ
        // when (操作):
        let json = OutboundFrame::banned_notice().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        // then (期待する結果):
        assert_eq!(value["additional"]["messageId"], CLIENT_BANNED_CODE);
        assert_eq!(value["notificationOf"], "MESSAGE");
    }

    #[test]
    fn test_outbound_connect_shape() {
        // テスト項目: CONNECT フレームが id と username を平文で運ぶ
        // given (前提条件):
        let frame = OutboundFrame::Connect {
            id: ClientId::new(12345),
            username: "User 12345".to_string(),
            message: "Welcome to server".to_string(),
        };

        // when (操作):
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();

        // then (期待する結果):
        assert_eq!(value["type"], "CONNECT");
        assert_eq!(value["id"], 12345);
        assert_eq!(value["username"], "User 12345");
    }
}
