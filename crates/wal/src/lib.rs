//! Write-ahead logging: record format and the log manager.
//!
//! Every write to a slotted page appends a record here before the page's
//! post-write image may reach disk. Records carry a fixed 20-byte header
//! `(size, lsn, txn_id, prev_lsn, type)` and a type-specific body; the log
//! manager buffers them in memory, assigns LSNs in append order, and flushes
//! via a background worker or on demand (`force_up_to`, commit).

mod manager;
mod record;

pub use manager::LogManager;
pub use record::{LogPayload, LogRecord, LogRecordType, HEADER_SIZE};

use common::{Lsn, TxnId};

/// Per-statement logging cursor: the id stamped into records and the LSN of
/// the statement's most recent record, used to chain `prev_lsn`.
#[derive(Debug)]
pub struct TxnContext {
    pub id: TxnId,
    pub last_lsn: Lsn,
}

impl TxnContext {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            last_lsn: Lsn::INVALID,
        }
    }

    /// A context for maintenance paths that do not belong to a statement.
    pub fn system() -> Self {
        Self::new(TxnId::INVALID)
    }
}
