use buffer::BufferPoolManager;
use common::{DbError, DbResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use wal::{LogManager, LogRecord};

/// Coordinates the quiesce protocol: with writers drained by the caller,
/// force the log, force every dirty page, and append a CHECKPOINT record
/// that marks a recovery-safe point.
pub struct CheckpointManager {
    log: Arc<LogManager>,
    bpm: Arc<BufferPoolManager>,
    in_progress: Mutex<bool>,
}

impl CheckpointManager {
    pub fn new(log: Arc<LogManager>, bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            log,
            bpm,
            in_progress: Mutex::new(false),
        }
    }

    /// Refuses while another checkpoint is running. The caller must have
    /// blocked new write statements and waited for active ones to finish.
    pub fn begin_checkpoint(&self) -> DbResult<()> {
        {
            let mut flag = self.in_progress.lock();
            if *flag {
                return Err(DbError::InvalidState("checkpoint already in progress".into()));
            }
            *flag = true;
        }
        self.log.stop_flush_thread();
        self.log.flush_all()?;
        self.bpm.flush_all()?;
        let lsn = self.log.append(LogRecord::checkpoint());
        self.log.flush_all()?;
        info!(lsn = lsn.0, "checkpoint written");
        Ok(())
    }

    /// Resume the background flusher and release the checkpoint flag.
    /// Always paired with `begin_checkpoint`, including on error paths.
    pub fn end_checkpoint(&self) -> DbResult<()> {
        {
            let mut flag = self.in_progress.lock();
            if !*flag {
                return Err(DbError::InvalidState("no checkpoint in progress".into()));
            }
            *flag = false;
        }
        self.log.run_flush_thread();
        Ok(())
    }

    pub fn is_in_progress(&self) -> bool {
        *self.in_progress.lock()
    }
}
