//! Common Utilities and Types Library
//! 
//! This crate provides shared types, the numerology/frame model and bit
//! utilities used across the fronthaul implementation.

pub mod numerology;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use numerology::*;
pub use types::*;
pub use utils::*;
