//! Frame — the wire message types for whiteboard traffic.
//!
//! ARCHITECTURE
//! ============
//! Clients send one command envelope per request (`{action, obj}`). The
//! server answers by fanning out remote-invocation frames
//! (`{type: "wb", func: "WbArea.<method>(<json>);"}`) that recipients parse
//! and dispatch to their local whiteboard handler.
//!
//! DESIGN
//! ======
//! - The envelope is decoded loosely here (`action` string + raw `obj`);
//!   typed validation per action happens once in `services::action`.
//! - `WbCall` is the recipient-independent base payload. A `Frame` is what
//!   one recipient actually receives after per-recipient projection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// INBOUND
// =============================================================================

/// Raw command envelope as posted by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub obj: Value,
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Client-side handler names understood by the whiteboard UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WbMethod {
    Init,
    Create,
    Load,
    CreateWb,
    RemoveWb,
    ActivateWb,
    SetSlide,
    CreateObj,
    ModifyObj,
    DeleteObj,
    ClearAll,
    ClearSlide,
    SetRole,
}

impl WbMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Create => "create",
            Self::Load => "load",
            Self::CreateWb => "createWb",
            Self::RemoveWb => "removeWb",
            Self::ActivateWb => "activateWb",
            Self::SetSlide => "setSlide",
            Self::CreateObj => "createObj",
            Self::ModifyObj => "modifyObj",
            Self::DeleteObj => "deleteObj",
            Self::ClearAll => "clearAll",
            Self::ClearSlide => "clearSlide",
            Self::SetRole => "setRole",
        }
    }
}

/// A handler invocation before it is rendered for a specific recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct WbCall {
    pub method: WbMethod,
    /// Argument list. `None` renders as an empty call, `init()`.
    pub args: Option<Value>,
}

impl WbCall {
    #[must_use]
    pub fn new(method: WbMethod, args: Value) -> Self {
        Self { method, args: Some(args) }
    }

    #[must_use]
    pub fn bare(method: WbMethod) -> Self {
        Self { method, args: None }
    }

    /// Render as `WbArea.<method>(<json>);`.
    #[must_use]
    pub fn render(&self) -> String {
        let args = self.args.as_ref().map(Value::to_string).unwrap_or_default();
        format!("WbArea.{}({args});", self.method.as_str())
    }
}

/// What a single connected session receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Wb { func: String },
    Error { message: String },
}

impl Frame {
    #[must_use]
    pub fn wb(call: &WbCall) -> Self {
        Self::Wb { func: call.render() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// The rendered `func` string for `wb` frames.
    #[must_use]
    pub fn func(&self) -> Option<&str> {
        match self {
            Self::Wb { func } => Some(func),
            Self::Error { .. } => None,
        }
    }
}

impl From<&WbCall> for Frame {
    fn from(call: &WbCall) -> Self {
        Self::wb(call)
    }
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured logging of rejected or failed actions.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Whether the originator should see this error. Most rejections stay silent.
    fn user_visible(&self) -> bool {
        false
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
