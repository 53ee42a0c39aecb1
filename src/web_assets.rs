//! Embedded static web assets for the lorebook serve mode.
//!
//! Both files are compiled into the binary via `include_str!` so the binary
//! is fully self-contained; no external asset files need to be distributed.

/// Stylesheet for the serve-mode HTML viewer.
///
/// Loaded from `src/assets/lorebook.css` at compile time.
pub const CSS: &str = include_str!("assets/lorebook.css");

/// JavaScript for the serve-mode HTML viewer.
///
/// Navigation glue only; all content rendering happens server-side. Fetches
/// section fragments into the reader, keeps the URL hash in sync, highlights
/// the active contents entry, and manages the first-visit handbook overlay.
/// Loaded from `src/assets/lorebook.js` at compile time.
pub const JS: &str = include_str!("assets/lorebook.js");
