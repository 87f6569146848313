//! Utility functions shared by the remote sources and the image loader.
//!
//! - **Locator validation**: reject locators that cannot or should not be fetched
//! - **Task panics**: convert a panicking background future into an error
//!
//! # Examples
//!
//! ```
//! use photofeed::util::validate_locator;
//!
//! let url = validate_locator("https://picsum.photos/id/237/200/300").unwrap();
//! assert_eq!(url.scheme(), "https");
//! ```

mod locator;
mod task;

pub use locator::{validate_locator, LocatorError};
pub use task::catch_task_panic;
pub(crate) use task::panic_message;
