//! Domain layer error definitions.

use thiserror::Error;

/// Errors from the shared store gateway.
///
/// どのバリアントも呼び出し元ではソフトエラーとして扱われる。
/// 例外は `ProtectedField` で、これは呼び出し側の契約違反であり
/// ソケットには決して届かない。
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable or the command failed
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record has a missing or unparsable field
    #[error("corrupt record at '{key}': field '{field}'")]
    CorruptRecord { key: String, field: String },

    /// Attempt to update an immutable record field (caller contract violation)
    #[error("field '{0}' is immutable")]
    ProtectedField(String),

    /// A published envelope does not carry a valid origin tag
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Errors from pushing a message to a local socket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagePushError {
    /// No open socket is registered for the client
    #[error("client '{0}' is not connected to this process")]
    ClientNotFound(String),

    /// The socket channel rejected the message
    #[error("failed to push message: {0}")]
    PushFailed(String),
}
