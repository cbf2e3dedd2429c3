//! Domain layer for the distributed chat backend.
//!
//! エンティティと識別子、そして他レイヤーが依存するインターフェース
//! （共有ストア・ローカル配信）を定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。

pub mod entity;
pub mod error;
pub mod id;
pub mod pusher;
pub mod store;

pub use entity::{Client, Room, ServerStats};
pub use error::{MessagePushError, StoreError};
pub use id::{ClientId, ClientIdFactory, RoomId, RoomIdFactory};
pub use pusher::{MessagePusher, PusherChannel, SocketId};
pub use store::{ChatStore, StoreEvents};
