//! Process-local store implementations.
//!
//! Used by the daemon's development backends and by every test in the
//! workspace. Both types are cheap `Arc` handles; clones share state.

mod grid;
mod relational;

pub use grid::{MemoryGrid, DEFAULT_SHEET, MAX_ROWS};
pub use relational::{MemoryRelational, DEFAULT_CHANNEL, DEFAULT_POOL_SIZE};
