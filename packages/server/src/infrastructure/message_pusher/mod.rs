//! Local fanout over WebSocket connections.

pub mod websocket;

pub use websocket::SocketRegistry;
