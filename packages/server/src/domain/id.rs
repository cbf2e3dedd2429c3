//! Client / Room 識別子とその採番。
//!
//! 識別子は 5 桁の整数（10000〜99999）。ストア上では文字列として
//! 保存されるため、`Display` / `FromStr` が正引き・逆引きを担う。

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use hiroba_shared::consts::{CLIENT_ID_MAX, CLIENT_ID_MIN, ROOM_ID_MAX, ROOM_ID_MIN};

/// Client identifier (5-digit integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u32);

impl ClientId {
    /// Create a new ClientId from a raw integer
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner integer value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Room identifier (5-digit integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(u32);

impl RoomId {
    /// Create a new RoomId from a raw integer
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner integer value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoomId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// ClientId の採番
///
/// 範囲内のランダムな整数を返す。衝突チェックは行わない（既知の制約）。
pub struct ClientIdFactory;

impl ClientIdFactory {
    /// Generate a fresh random client id
    pub fn generate() -> ClientId {
        ClientId(rand::rng().random_range(CLIENT_ID_MIN..=CLIENT_ID_MAX))
    }
}

/// RoomId の採番。ClientIdFactory と同じ方針。
pub struct RoomIdFactory;

impl RoomIdFactory {
    /// Generate a fresh random room id
    pub fn generate() -> RoomId {
        RoomId(rand::rng().random_range(ROOM_ID_MIN..=ROOM_ID_MAX))
    }
}
