//! Explicit view state for the terminal surface.
//!
//! Containers keep their lifecycle in a small state record instead of the
//! presentation layer; the drawing code is a projection of these structs.
//! Loads run on worker threads and complete out of order, so every slot
//! carries a monotonically increasing request token and discards completions
//! whose token is stale.

use crate::interpret::DisplayTree;
use crate::source::LoadError;

/// Lifecycle of a content container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// The reusable reader container: one per page, relabeled and reloaded as
/// navigation moves between targets.
#[derive(Debug)]
pub struct SectionSlot {
    /// Target currently owning the slot; `None` before the first navigation.
    pub target: Option<String>,
    /// Container title, from the menu label or the raw target string.
    pub label: String,
    pub status: SlotStatus,
    pub tree: Option<DisplayTree>,
    pub error: Option<String>,
    token: u64,
}

impl SectionSlot {
    pub fn new() -> SectionSlot {
        SectionSlot {
            target: None,
            label: String::new(),
            status: SlotStatus::Unloaded,
            tree: None,
            error: None,
            token: 0,
        }
    }

    /// Begin a load for `target`. Returns the token the worker must echo;
    /// any earlier in-flight load becomes stale from this moment.
    pub fn begin(&mut self, target: &str, label: &str) -> u64 {
        self.token += 1;
        self.target = Some(target.to_string());
        self.label = label.to_string();
        self.status = SlotStatus::Loading;
        self.tree = None;
        self.error = None;
        self.token
    }

    /// Apply a completed load. Returns false when the outcome was stale and
    /// nothing changed.
    pub fn complete(&mut self, token: u64, result: Result<DisplayTree, LoadError>) -> bool {
        if token != self.token || self.status != SlotStatus::Loading {
            return false;
        }
        match result {
            Ok(tree) => {
                self.status = SlotStatus::Loaded;
                self.tree = Some(tree);
                self.error = None;
            }
            Err(err) => {
                self.status = SlotStatus::Failed;
                self.tree = None;
                self.error = Some(err.to_string());
            }
        }
        true
    }

    /// True when the slot already shows a successful load of `target`, in
    /// which case navigating there again should scroll without refetching.
    pub fn is_loaded_for(&self, target: &str) -> bool {
        self.status == SlotStatus::Loaded && self.target.as_deref() == Some(target)
    }
}

/// Handbook document state. One load at startup; `H` reuses the result.
#[derive(Debug)]
pub struct HandbookSlot {
    pub status: SlotStatus,
    pub markdown: Option<String>,
    pub error: Option<String>,
}

impl HandbookSlot {
    pub fn new() -> HandbookSlot {
        HandbookSlot {
            status: SlotStatus::Unloaded,
            markdown: None,
            error: None,
        }
    }

    pub fn begin(&mut self) {
        self.status = SlotStatus::Loading;
    }

    pub fn complete(&mut self, result: Result<String, String>) {
        match result {
            Ok(markdown) => {
                self.status = SlotStatus::Loaded;
                self.markdown = Some(markdown);
                self.error = None;
            }
            Err(err) => {
                self.status = SlotStatus::Failed;
                self.error = Some(err);
            }
        }
    }
}

/// Worker-thread completion, delivered over the event loop's channel.
#[derive(Debug)]
pub enum LoadOutcome {
    Section {
        token: u64,
        result: Result<DisplayTree, LoadError>,
    },
    Handbook {
        result: Result<String, String>,
    },
}

/// Line extent of one mounted view inside the content pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRange {
    pub target: String,
    pub start: usize,
    pub len: usize,
}

// The "current entry" band sits in the upper part of the viewport, between
// these two fractions of its height.
const BAND_TOP_PCT: usize = 20;
const BAND_BOTTOM_PCT: usize = 30;

/// The mounted view crossing the central viewport band, if any. Returns the
/// topmost intersecting view, so at most one entry is ever current.
pub fn active_view(ranges: &[ViewRange], scroll: usize, viewport: usize) -> Option<&ViewRange> {
    if viewport == 0 {
        return None;
    }
    let band_top = scroll + viewport * BAND_TOP_PCT / 100;
    let band_bottom = (scroll + viewport * BAND_BOTTOM_PCT / 100).max(band_top + 1);
    ranges
        .iter()
        .filter(|r| r.len > 0)
        .find(|r| r.start < band_bottom && band_top < r.start + r.len)
}
