//! Local terminal helpers

use anyhow::{Context, Result};
use crossterm::terminal;

use crate::session::TerminalRequest;

/// Size used when the local terminal cannot be queried
pub const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// Keeps the local terminal in raw mode until dropped
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enable raw mode
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Current terminal size as (columns, rows), or 80x24
pub fn terminal_size() -> (u16, u16) {
    match terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => FALLBACK_SIZE,
    }
}

/// `pty-req` parameters for the local terminal
///
/// The terminal name comes from `$TERM`, falling back to `default_term`.
pub fn local_terminal(default_term: &str) -> TerminalRequest {
    let term = std::env::var("TERM")
        .ok()
        .filter(|term| !term.is_empty())
        .unwrap_or_else(|| default_term.to_string());
    let (cols, rows) = terminal_size();

    TerminalRequest {
        term,
        cols: u32::from(cols),
        rows: u32::from(rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_nonzero() {
        let (cols, rows) = terminal_size();
        assert!(cols > 0);
        assert!(rows > 0);
    }

    #[test]
    fn test_local_terminal_has_a_name() {
        let request = local_terminal("xterm");
        assert!(!request.term.is_empty());
        assert!(request.cols > 0 && request.rows > 0);
    }
}
