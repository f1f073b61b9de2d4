//! The abstract host interface (§6): character commit, preedit display,
//! cursor geometry, candidate-window data. The core never assumes a
//! concrete OS integration; an embedder implements this trait.
//!
//! Grounded on `context.rs::ImeContext`'s "zero abstraction" host data
//! contract, turned into a trait because the core needs to *push* updates
//! to an embedder-owned sink rather than hand back a shared struct the
//! embedder polls.

use crate::candidate::CandidateWord;

/// Screen-space rectangle, used only for candidate-window positioning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Capabilities an embedder provides to the core. Every method is a
/// best-effort notification; the core never blocks on or retries a call.
pub trait Host: Send + Sync {
    /// Deliver final text to the focused field.
    fn commit(&self, text: &str);

    /// Show inline preedit text with the caret at `caret` (char offset).
    fn update_preedit(&self, text: &str, caret: u32);

    /// Remove any inline preedit display.
    fn clear_preedit(&self);

    /// Show the current candidate page.
    fn show_candidates(&self, page_view: &[CandidateWord], page_index: u32, total_pages: u32);

    /// Hide the candidate window.
    fn hide_candidates(&self);

    /// Optional: the embedder's last-known caret geometry, for positioning
    /// the candidate window. `None` if the embedder does not track it.
    fn cursor_rect(&self) -> Option<Rect> {
        None
    }
}
