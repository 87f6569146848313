use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::remote::FetchError;

// ============================================================================
// Item
// ============================================================================

/// One photo in the feed. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: String,
    pub author: String,
    pub width: i64,
    pub height: i64,
    /// Fetchable image URL; also the cache identity of its renditions.
    pub source_locator: String,
}

impl Item {
    /// Aspect-preserving size for a cell `display_width` points wide.
    ///
    /// Returns `(0.0, 0.0)` when either stored dimension is not positive.
    pub fn displayed_size(&self, display_width: f64) -> (f64, f64) {
        if self.width <= 0 || self.height <= 0 {
            return (0.0, 0.0);
        }
        let ratio = self.height as f64 / self.width as f64;
        (display_width, display_width * ratio)
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Current page number and page size driving the next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page number of the last merged page.
    pub page: u32,
    pub page_size: usize,
}

impl PageCursor {
    pub fn first(page_size: usize) -> Self {
        Self { page: 1, page_size }
    }

    pub fn next_page(&self) -> u32 {
        self.page.saturating_add(1)
    }
}

// ============================================================================
// Lanes
// ============================================================================

/// Trigger kinds that issue fetches. Each lane is single-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Load,
    Reload,
    LoadMore,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lane::Load => "load",
            Lane::Reload => "reload",
            Lane::LoadMore => "load_more",
        };
        f.write_str(name)
    }
}

/// State of one request lane.
///
/// `Failed` does not gate new triggers; it only records how the last
/// attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LaneState {
    #[default]
    Idle,
    InFlight,
    Failed(FetchError),
}

impl LaneState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, LaneState::InFlight)
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// How the latest items emission relates to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemsChange {
    /// Nothing has been emitted yet.
    Initial,
    /// The whole list was replaced by a load or reload.
    Replaced,
    /// Items were appended at `range` (`old_count..new_count`).
    Appended { range: Range<usize> },
}

/// Latest emitted item list, with the change that produced it.
#[derive(Debug, Clone)]
pub struct ItemsUpdate {
    pub items: Arc<Vec<Item>>,
    pub change: ItemsChange,
    /// Increments on every emission.
    pub revision: u64,
}

impl Default for ItemsUpdate {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            change: ItemsChange::Initial,
            revision: 0,
        }
    }
}

/// Result of the most recent search to complete without being superseded.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Issue order of the query (1 for the first search).
    pub generation: u64,
    pub query: String,
    pub items: Arc<Vec<Item>>,
}

/// Discrete engine events, in the order they happened.
///
/// Observables only hold the latest value; this stream lets a consumer see
/// every transition, e.g. to apply each incremental append or count errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A trigger passed its gate and its fetch was issued.
    Started { lane: Lane, page: u32 },
    /// A load or reload replaced the list.
    Replaced { lane: Lane, count: usize },
    /// A load-more appended items at `range`.
    Appended { range: Range<usize> },
    /// A completion arrived after a newer load/reload replaced the list.
    Superseded { lane: Lane },
    /// The fetch and its retry both failed.
    Failed { lane: Lane, error: FetchError },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(width: i64, height: i64) -> Item {
        Item {
            id: "1".into(),
            author: "TQT".into(),
            width,
            height,
            source_locator: "https://example.com/1.jpg".into(),
        }
    }

    #[test]
    fn test_displayed_size_keeps_aspect_ratio() {
        let (w, h) = item(4320, 3240).displayed_size(200.0);
        assert_eq!(w, 200.0);
        assert!((h - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_displayed_size_zero_for_degenerate_item() {
        assert_eq!(item(0, 100).displayed_size(320.0), (0.0, 0.0));
        assert_eq!(item(100, -1).displayed_size(320.0), (0.0, 0.0));
    }

    #[test]
    fn test_lane_state_gate() {
        assert!(LaneState::InFlight.is_in_flight());
        assert!(!LaneState::Idle.is_in_flight());
        assert!(!LaneState::Failed(FetchError::Timeout).is_in_flight());
    }

    #[test]
    fn test_cursor_next_page() {
        let cursor = PageCursor::first(100);
        assert_eq!(cursor.page, 1);
        assert_eq!(cursor.next_page(), 2);
    }
}
