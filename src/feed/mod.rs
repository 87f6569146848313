//! Paginated photo feed orchestration.
//!
//! - **Engine**: single-flight load, reload and load-more lanes over one
//!   shared cursor and item list, with one retry per accepted trigger
//! - **Search**: client-side filter over the last emitted items
//! - **Observables**: latest-value outputs with a single writer
//!
//! # Architecture
//!
//! - [`engine`] - [`FeedEngine`] triggers, gating and merge logic
//! - [`observable`] - [`Observable`], the watch-backed value holder
//! - [`search`] - the pure item filter
//! - [`types`] - items, cursor, lane states and emitted updates
//!
//! # Example
//!
//! ```ignore
//! use photofeed::feed::{EngineConfig, FeedEngine};
//! use photofeed::remote::HttpPageSource;
//!
//! let engine = FeedEngine::new(Arc::new(HttpPageSource::picsum()?), EngineConfig::default());
//! engine.load();
//! let mut items = engine.subscribe_items();
//! items.changed().await?;
//! ```

mod engine;
mod observable;
mod search;
mod types;

pub use engine::{EngineConfig, FeedEngine};
pub use observable::Observable;
pub use search::filter_items;
pub use types::{
    FeedEvent, Item, ItemsChange, ItemsUpdate, Lane, LaneState, PageCursor, SearchResults,
};
