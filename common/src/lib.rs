//! fxrelay Common Types
//!
//! Shared types used across the fxrelay workspace: currency codes and pairs,
//! the relay error taxonomy, and clock/timing helpers.

pub mod monetary;
pub mod error;
pub mod time;

pub use monetary::*;
pub use error::*;
pub use time::*;
