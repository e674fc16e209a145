//! The document surface the engine reads from and writes into.
//!
//! The editor itself lives outside this crate. The engine only needs to
//! read and replace the whole text, keep the cursor where the user left it
//! across a replacement, and show a short status line.

use std::sync::{Arc, Mutex, MutexGuard};

/// Cursor position as line and column (both zero-based, column in chars).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub line: usize,
    pub ch: usize,
}

impl Cursor {
    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }

    /// Nearest valid position inside `text`.
    pub fn clamp_to(self, text: &str) -> Self {
        let lines: Vec<&str> = text.split('\n').collect();
        let line = self.line.min(lines.len() - 1);
        let ch = self.ch.min(lines[line].chars().count());
        Self { line, ch }
    }
}

/// Editor-facing collaborator of the sync engine.
pub trait EditorSurface {
    fn text(&self) -> String;

    fn set_text(&mut self, text: &str);

    fn cursor(&self) -> Cursor;

    fn set_cursor(&mut self, cursor: Cursor);

    /// Show a user-visible status line.
    fn set_status(&mut self, status: &str) {
        log::info!("{status}");
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    text: String,
    cursor: Cursor,
    status: String,
    replacements: usize,
}

/// Shared in-memory surface.
///
/// Clones see the same document, so a test or a headless driver can edit
/// the text while an engine owns another handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let surface = Self::new();
        surface.lock().text = text.into();
        surface
    }

    /// Replace the text as a user edit would (no status, no counter bump).
    pub fn edit(&self, text: impl Into<String>) {
        self.lock().text = text.into();
    }

    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    /// How many times the engine replaced the text.
    pub fn replacements(&self) -> usize {
        self.lock().replacements
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EditorSurface for MemorySurface {
    fn text(&self) -> String {
        self.lock().text.clone()
    }

    fn set_text(&mut self, text: &str) {
        let mut state = self.lock();
        state.text = text.to_string();
        state.cursor = state.cursor.clamp_to(text);
        state.replacements += 1;
    }

    fn cursor(&self) -> Cursor {
        self.lock().cursor
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        let mut state = self.lock();
        state.cursor = cursor.clamp_to(&state.text);
    }

    fn set_status(&mut self, status: &str) {
        log::info!("{status}");
        self.lock().status = status.to_string();
    }
}
