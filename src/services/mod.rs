//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room state and the whiteboard action semantics so
//! route handlers can stay focused on protocol translation.

pub mod action;
pub mod broadcast;
pub mod files;
pub mod persistence;
pub mod session;
pub mod undo;
pub mod whiteboard;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}
