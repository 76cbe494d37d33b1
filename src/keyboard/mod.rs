//! Keyboard presence detection
//!
//! This module provides:
//! - Device identities and classification
//! - The exclusion filter
//! - One-shot enumeration over a device backend
//! - The presence tracker

pub mod classify;
pub mod constants;
pub mod enumerator;
pub mod tracker;
pub mod types;

// Re-export commonly used items
pub use classify::{classify, is_excluded, ExclusionList};
pub use enumerator::KeyboardEnumerator;
pub use tracker::{PresenceDiff, PresenceTracker};
pub use types::*;
