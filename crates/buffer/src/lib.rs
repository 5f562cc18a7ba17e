//! The buffer pool: frames, replacement policies, and pin/latch management.
//!
//! Frames cache one page each. The pool maps page ids to frames, pins pages
//! for callers, and evicts unpinned frames through a pluggable [`Replacer`].
//! Before a dirty page is written back, the log is forced up to the page's
//! LSN (write-ahead rule). Callers synchronize on page bytes with the
//! frame's reader-writer latch, most conveniently through the RAII
//! [`ReadPageGuard`]/[`WritePageGuard`] pair, which releases the latch and
//! the pin together.

mod frame;
mod guard;
mod lru_k;
mod pool;
mod replacer;
#[cfg(test)]
mod tests;

pub use frame::{Frame, PageReadGuard, PageWriteGuard};
pub use guard::{ReadPageGuard, WritePageGuard};
pub use lru_k::LruKReplacer;
pub use pool::BufferPoolManager;
pub use replacer::{ClockReplacer, LruReplacer, Replacer};
