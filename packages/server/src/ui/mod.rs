//! UI 層: axum ルータ、WebSocket 接続ライフサイクル、シャットダウン。

pub mod handler;
pub mod server;
pub mod signal;
pub mod state;

pub use server::Server;
