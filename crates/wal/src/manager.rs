use crate::{LogRecord, TxnContext};
use common::{Config, DbResult, Lsn};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use storage::DiskManager;
use tracing::{debug, warn};

struct LogState {
    buffer: Vec<LogRecord>,
    next_lsn: i32,
    running: bool,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("disk", &self.disk)
            .field("enabled", &self.enabled)
            .field("flush_interval", &self.flush_interval)
            .field("persistent_lsn", &self.persistent_lsn)
            .finish_non_exhaustive()
    }
}

/// Assigns LSNs, buffers records in memory, and pushes them to the disk
/// manager's log file. A background worker flushes every
/// `log_flush_interval` (or earlier when signaled); `force_up_to` flushes
/// synchronously so the buffer pool can honor write-ahead ordering.
pub struct LogManager {
    disk: Arc<DiskManager>,
    enabled: bool,
    flush_interval: Duration,
    state: Mutex<LogState>,
    flush_signal: Condvar,
    persistent_lsn: AtomicI32,
    flush_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(config: &Config, disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            enabled: config.wal_enabled,
            flush_interval: config.log_flush_interval,
            state: Mutex::new(LogState {
                buffer: Vec::new(),
                next_lsn: 0,
                running: false,
            }),
            flush_signal: Condvar::new(),
            persistent_lsn: AtomicI32::new(Lsn::INVALID.0),
            flush_thread: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// LSN of the last record known durable.
    pub fn persistent_lsn(&self) -> Lsn {
        Lsn(self.persistent_lsn.load(Ordering::SeqCst))
    }

    /// The LSN the next appended record will receive.
    pub fn next_lsn(&self) -> Lsn {
        Lsn(self.state.lock().next_lsn)
    }

    /// Assign the next LSN to `record`, buffer it, and return the LSN.
    /// Returns `Lsn::INVALID` when logging is disabled.
    pub fn append(&self, mut record: LogRecord) -> Lsn {
        if !self.enabled {
            return Lsn::INVALID;
        }
        let mut state = self.state.lock();
        let lsn = Lsn(state.next_lsn);
        state.next_lsn += 1;
        record.lsn = lsn;
        state.buffer.push(record);
        lsn
    }

    /// Append on behalf of a statement: stamps the txn id, chains
    /// `prev_lsn`, and advances the statement cursor.
    pub fn append_chained(&self, txn: &mut TxnContext, mut record: LogRecord) -> Lsn {
        record.txn_id = txn.id;
        record.prev_lsn = txn.last_lsn;
        let lsn = self.append(record);
        if lsn.is_valid() {
            txn.last_lsn = lsn;
        }
        lsn
    }

    /// Write every buffered record to the disk log and fsync, advancing
    /// `persistent_lsn`.
    pub fn flush_all(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut LogState) -> DbResult<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        let count = state.buffer.len();
        let mut last = Lsn::INVALID;
        for record in &state.buffer {
            self.disk.write_log(&record.encode())?;
            last = record.lsn;
        }
        self.disk.flush_log()?;
        self.persistent_lsn.store(last.0, Ordering::SeqCst);
        state.buffer.clear();
        debug!(records = count, persistent = last.0, "log flushed");
        Ok(())
    }

    /// Block until every record with an LSN ≤ `lsn` is durable. Called by
    /// the buffer pool before a dirty page may be written out.
    pub fn force_up_to(&self, lsn: Lsn) -> DbResult<()> {
        if !self.enabled || !lsn.is_valid() {
            return Ok(());
        }
        if self.persistent_lsn() >= lsn {
            return Ok(());
        }
        // Flushing the whole buffer covers any lsn that has been handed out;
        // anything larger does not exist yet and needs no waiting.
        self.flush_all()
    }

    /// Start the background flusher. Idempotent.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("wal-flush".into())
            .spawn(move || manager.flush_loop())
            .expect("spawn log flush thread");
        *self.flush_thread.lock() = Some(handle);
        debug!("log flush thread started");
    }

    fn flush_loop(&self) {
        let mut state = self.state.lock();
        while state.running {
            self.flush_signal
                .wait_for(&mut state, self.flush_interval);
            if !state.running {
                break;
            }
            if let Err(err) = self.flush_locked(&mut state) {
                warn!(%err, "background log flush failed");
            }
        }
    }

    /// Signal the worker to exit and join it.
    pub fn stop_flush_thread(&self) {
        {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.flush_signal.notify_all();
        if let Some(handle) = self.flush_thread.lock().take() {
            if handle.join().is_err() {
                warn!("log flush thread panicked");
            }
        }
        debug!("log flush thread stopped");
    }

    pub fn is_flush_thread_running(&self) -> bool {
        self.state.lock().running
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_flush_thread();
        if let Err(err) = self.flush_all() {
            warn!(%err, "final log flush failed");
        }
    }
}
