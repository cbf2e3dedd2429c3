//! Shared store implementations.
//!
//! `codec` はキー配置とレコードのフィールド表現（数値は文字列）を
//! 一箇所に集める。`redis` が本番実装、`memory` はテストと
//! 単一プロセス開発用の等価実装。

pub mod codec;
pub mod memory;
pub mod redis;

pub use self::memory::{MemoryBackend, MemoryChatStore};
pub use self::redis::RedisChatStore;
