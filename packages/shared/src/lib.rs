//! Shared library for the Hiroba chat backend.
//!
//! Cross-cutting pieces used by every binary: protocol constants,
//! JST time helpers, and logging setup.

pub mod consts;
pub mod logger;
pub mod time;
