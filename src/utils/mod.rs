//! Internal containers shared by the semaphore table and the TPS page arena.

mod arena;

pub use arena::{Arena, ArenaId};
