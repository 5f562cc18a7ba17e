//! Shared identifiers, constants, configuration, and the error type used by
//! every storage-layer crate.


use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Size of one on-disk page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Fixed byte buffer backing one page.
pub type PageBuf = [u8; PAGE_SIZE];

/// Index of a buffer-pool frame.
pub type FrameId = usize;

/// Object id assigned by a catalog to tables and indexes.
pub type Oid = u32;

/// Handle for a fixed-size byte block on disk. Id 0 is reserved for the
/// header page; `PageId::INVALID` marks "no page".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub i32);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page inside the heap file.
    pub fn file_offset(self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

/// The page holding the index-name → root-page registry.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Log sequence number. Totally ordered, reflects append order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lsn(pub i32);

impl Lsn {
    pub const INVALID: Lsn = Lsn(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// Identifier a statement uses to chain its log records together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxnId(pub i32);

impl TxnId {
    pub const INVALID: TxnId = TxnId(-1);
}

/// (page id, slot number). Stable for the lifetime of a tuple between insert
/// and apply-delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RecordId {
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn is_valid(self) -> bool {
        self.page_id.is_valid()
    }

    /// Wire form: page id then slot, both 4-byte little-endian.
    pub fn encode(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        out[4..].copy_from_slice(&self.slot.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let page_id = i32::from_le_bytes(bytes[..4].try_into().unwrap());
        let slot = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Self {
            page_id: PageId(page_id),
            slot,
        }
    }
}

/// Canonical error type shared across the storage core.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("out of space: {0}")]
    OutOfSpace(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Which frame-replacement policy the buffer pool runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacerPolicy {
    Lru,
    LruK,
    Clock,
}

/// Runtime configuration, threaded explicitly through constructors.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(64)
///     .build();
/// assert!(config.wal_enabled);
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct Config {
    /// Directory holding the heap file, log file, and state snapshot.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Active replacement policy.
    #[builder(default = ReplacerPolicy::LruK)]
    pub replacer_policy: ReplacerPolicy,
    /// Look-back constant for the LRU-K replacer.
    #[builder(default = 10)]
    pub lru_k: usize,
    /// Whether write-ahead logging is on.
    #[builder(default = true)]
    pub wal_enabled: bool,
    /// How long the background log flusher sleeps between passes.
    #[builder(default = Duration::from_millis(100))]
    pub log_flush_interval: Duration,
    /// File name of the catalog snapshot written by `save_state`.
    #[builder(default = String::from("hmssql_state.db"))]
    pub state_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    pub fn heap_file(&self) -> PathBuf {
        self.data_dir.join("heap.db")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("wal.log")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(&self.state_file)
    }
}
