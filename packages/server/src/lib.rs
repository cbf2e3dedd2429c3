//! Distributed WebSocket chat room server.
//!
//! Many server processes each terminate WebSocket connections and present a
//! single consistent view of chat rooms and memberships. A shared Redis store
//! is the source of truth for clients, rooms and membership sets; a pub/sub
//! channel per room carries events between processes.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
