//! Shared identifier and terminal types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one logical session within a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Pseudo-terminal parameters captured from a `pty-req`
///
/// Stored verbatim; nothing here is validated or emulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyParams {
    /// Terminal emulation name (the TERM value)
    pub term: String,
    /// Width in characters
    pub cols: u32,
    /// Height in rows
    pub rows: u32,
    /// Width in pixels
    pub pixel_width: u32,
    /// Height in pixels
    pub pixel_height: u32,
    /// Encoded terminal mode opcodes and their values
    pub modes: Vec<(u8, u32)>,
}

impl PtyParams {
    /// Build parameters with character dimensions only
    pub fn new(term: impl Into<String>, cols: u32, rows: u32) -> Self {
        Self {
            term: term.into(),
            cols,
            rows,
            pixel_width: 0,
            pixel_height: 0,
            modes: Vec::new(),
        }
    }

    /// Environment handed to processes spawned under this terminal
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = Vec::with_capacity(3);
        if !self.term.is_empty() {
            env.push(("TERM".to_string(), self.term.clone()));
        }
        env.push(("COLUMNS".to_string(), self.cols.to_string()));
        env.push(("LINES".to_string(), self.rows.to_string()));
        env
    }
}
