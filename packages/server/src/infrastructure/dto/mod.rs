//! Data transfer objects for the WebSocket wire protocol.

pub mod websocket;

pub use websocket::{InboundFrame, OutboundFrame, RequestType};
