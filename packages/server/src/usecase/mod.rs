//! UseCase 層
//!
//! ルーム／メンバーシップの調整ロジックを実装するレイヤー。
//! UI 層（WebSocket ハンドラ）から呼ばれる操作と、pub/sub 配送から
//! 呼ばれる受信経路の両方がここに集まる。

pub mod coordinator;
pub mod messaging;
pub mod reconcile;
pub mod room_ops;

#[cfg(test)]
pub(crate) mod testutil;

pub use coordinator::RoomCoordinator;
