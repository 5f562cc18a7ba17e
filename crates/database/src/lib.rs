//! The engine facade: everything the SQL layer is allowed to touch.
//!
//! Wires the disk manager, log manager, buffer pool, and per-database
//! catalogs together and exposes the executor surface (scans, tuple
//! mutation, DDL) plus the administrative commands (databases, checkpoint,
//! state snapshots). Nothing above this crate touches pages directly.
//!
//! Write statements are bracketed in BEGIN/COMMIT records (ABORT plus
//! logical undo on failure) and the commit LSN is forced before control
//! returns, so atomicity comes purely from WAL ordering and the two-phase
//! delete protocol.

mod checkpoint;
mod state;
mod writer;

pub use checkpoint::CheckpointManager;
pub use writer::{BufferedWriter, ResultWriter};

use ahash::RandomState;
use btree::TreeIterator;
use buffer::BufferPoolManager;
use catalog::{Catalog, IndexInfo, TableInfo};
use common::{
    Config, DbError, DbResult, Oid, RecordId, TxnId, HEADER_PAGE_ID,
};
use hashbrown::HashMap;
use parking_lot::RwLock;
use state::{DatabaseState, StateSnapshot, TableState};
use std::{
    fs,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
};
use storage::DiskManager;
use table::TableIterator;
use tracing::{info, warn};
use types::{encode_index_key, Column, Schema, SqlType, Tuple, Value};
use wal::{LogManager, LogRecord, TxnContext};

type Map<K, V> = HashMap<K, V, RandomState>;

const DEFAULT_DATABASE: &str = "default";

struct Engines {
    databases: Map<String, Arc<Catalog>>,
    current: String,
}

/// One storage engine instance over one data directory.
pub struct Database {
    config: Config,
    log: Arc<LogManager>,
    bpm: Arc<BufferPoolManager>,
    checkpoint: CheckpointManager,
    /// Write statements hold this shared; a checkpoint takes it exclusive
    /// to drain and fence writers.
    write_gate: RwLock<()>,
    engines: RwLock<Engines>,
    next_txn_id: AtomicI32,
}

impl Database {
    /// Open (or create) the engine under `config.data_dir`, restoring the
    /// catalog snapshot when one exists.
    pub fn open(config: Config) -> DbResult<Database> {
        fs::create_dir_all(&config.data_dir)?;
        let disk = Arc::new(DiskManager::open(&config.heap_file(), &config.log_file())?);
        let log = Arc::new(LogManager::new(&config, Arc::clone(&disk)));
        let bpm = Arc::new(BufferPoolManager::new(
            &config,
            Arc::clone(&disk),
            Arc::clone(&log),
        ));
        // Page 0 is the index-root registry; claim it before any table or
        // index can.
        if disk.num_pages() == 0 {
            let (page_id, _guard) = bpm.new_page_write()?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
        }
        log.run_flush_thread();

        let mut databases = Map::default();
        databases.insert(
            DEFAULT_DATABASE.to_string(),
            Arc::new(Catalog::new(Arc::clone(&bpm), Arc::clone(&log))),
        );
        let database = Database {
            checkpoint: CheckpointManager::new(Arc::clone(&log), Arc::clone(&bpm)),
            config,
            log,
            bpm,
            write_gate: RwLock::new(()),
            engines: RwLock::new(Engines {
                databases,
                current: DEFAULT_DATABASE.to_string(),
            }),
            next_txn_id: AtomicI32::new(0),
        };
        if database.config.state_path().exists() {
            database.load_state()?;
        }
        info!(data_dir = %database.config.data_dir.display(), "engine opened");
        Ok(database)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Catalog of the current database.
    pub fn catalog(&self) -> Arc<Catalog> {
        let engines = self.engines.read();
        Arc::clone(
            engines
                .databases
                .get(&engines.current)
                .expect("current database always resolves"),
        )
    }

    pub fn current_database(&self) -> String {
        self.engines.read().current.clone()
    }

    // ----------------------------------------------------- administration

    pub fn create_database(&self, name: &str) -> DbResult<()> {
        let _gate = self.write_gate.read();
        let mut engines = self.engines.write();
        if engines.databases.contains_key(name) {
            return Err(DbError::AlreadyExists(format!("database '{name}'")));
        }
        self.log.append(LogRecord::create_database(name));
        engines.databases.insert(
            name.to_string(),
            Arc::new(Catalog::new(Arc::clone(&self.bpm), Arc::clone(&self.log))),
        );
        info!(database = name, "database created");
        Ok(())
    }

    pub fn use_database(&self, name: &str) -> DbResult<()> {
        let mut engines = self.engines.write();
        if !engines.databases.contains_key(name) {
            return Err(DbError::NotFound(format!("database '{name}'")));
        }
        engines.current = name.to_string();
        Ok(())
    }

    pub fn list_databases(&self, writer: &mut dyn ResultWriter) -> DbResult<()> {
        writer.header(&["database", "table", "columns"]);
        let engines = self.engines.read();
        let mut names: Vec<&String> = engines.databases.keys().collect();
        names.sort();
        for name in names {
            let catalog = &engines.databases[name];
            let tables = catalog.table_names();
            if tables.is_empty() {
                writer.row(vec![name.clone(), String::new(), String::new()]);
                continue;
            }
            for table in tables {
                let info = catalog.get_table(&table)?;
                let columns = info
                    .schema
                    .columns()
                    .iter()
                    .map(|c| format!("{}:{:?}", c.name, c.ty))
                    .collect::<Vec<String>>()
                    .join(", ");
                writer.row(vec![name.clone(), table, columns]);
            }
        }
        Ok(())
    }

    /// Quiesce writers, force log and pages, and stamp a CHECKPOINT record.
    pub fn checkpoint(&self) -> DbResult<()> {
        let _writers = self.write_gate.write();
        self.checkpoint.begin_checkpoint()?;
        self.checkpoint.end_checkpoint()
    }

    /// Persist the catalog snapshot (`hmssql_state.db`) under a checkpoint.
    pub fn save_state(&self) -> DbResult<()> {
        let _writers = self.write_gate.write();
        self.checkpoint.begin_checkpoint()?;
        let written = self.write_snapshot();
        let resumed = self.checkpoint.end_checkpoint();
        written.and(resumed)
    }

    fn write_snapshot(&self) -> DbResult<()> {
        let snapshot = self.snapshot()?;
        fs::write(self.config.state_path(), snapshot.encode())?;
        info!(file = %self.config.state_path().display(), "state saved");
        Ok(())
    }

    fn snapshot(&self) -> DbResult<StateSnapshot> {
        let engines = self.engines.read();
        let mut names: Vec<&String> = engines.databases.keys().collect();
        names.sort();
        let mut databases = Vec::with_capacity(names.len());
        for name in names {
            let catalog = &engines.databases[name];
            let mut tables = Vec::new();
            for table_name in catalog.table_names() {
                let info = catalog.get_table(&table_name)?;
                tables.push(TableState {
                    name: info.name.clone(),
                    oid: info.oid,
                    columns: info
                        .schema
                        .columns()
                        .iter()
                        .map(|c| (c.name.clone(), c.ty.type_id()))
                        .collect(),
                });
            }
            databases.push(DatabaseState {
                name: name.clone(),
                tables,
            });
        }
        Ok(StateSnapshot {
            databases,
            current: engines.current.clone(),
        })
    }

    fn load_state(&self) -> DbResult<()> {
        let bytes = fs::read(self.config.state_path())?;
        let snapshot = StateSnapshot::decode(&bytes)?;
        {
            let mut engines = self.engines.write();
            for database in &snapshot.databases {
                let catalog = engines
                    .databases
                    .entry(database.name.clone())
                    .or_insert_with(|| {
                        Arc::new(Catalog::new(Arc::clone(&self.bpm), Arc::clone(&self.log)))
                    })
                    .clone();
                for table in &database.tables {
                    if catalog.get_table(&table.name).is_ok() {
                        continue;
                    }
                    let columns = table
                        .columns
                        .iter()
                        .map(|(name, type_id)| {
                            Ok(Column::new(name.clone(), SqlType::from_type_id(*type_id)?))
                        })
                        .collect::<DbResult<Vec<Column>>>()?;
                    catalog.create_table(&table.name, Schema::new(columns))?;
                }
            }
            if engines.databases.contains_key(&snapshot.current) {
                engines.current = snapshot.current.clone();
            }
        }
        info!(databases = snapshot.databases.len(), "state restored");
        Ok(())
    }

    // ------------------------------------------------------------- DDL

    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> DbResult<Oid> {
        let _gate = self.write_gate.read();
        Ok(self.catalog().create_table(name, Schema::new(columns))?.oid)
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_column: &str,
    ) -> DbResult<Oid> {
        let _gate = self.write_gate.read();
        Ok(self
            .catalog()
            .create_index(index_name, table_name, key_column)?
            .oid)
    }

    pub fn create_view(&self, name: &str, query: &str) -> DbResult<()> {
        let _gate = self.write_gate.read();
        self.catalog().create_view(name, query)
    }

    pub fn get_view(&self, name: &str) -> DbResult<String> {
        self.catalog().get_view(name)
    }

    // ------------------------------------------------------------- reads

    /// Sequential scan over a table's live tuples.
    pub fn seq_scan(&self, table: &str) -> DbResult<TableIterator> {
        let info = self.catalog().get_table(table)?;
        Ok(info.heap.iter())
    }

    /// Ordered scan over a whole index.
    pub fn index_scan(&self, index: &str) -> DbResult<TreeIterator> {
        let info = self.catalog().get_index(index)?;
        info.tree.iter()
    }

    /// Ordered scan starting at the first key ≥ `key`.
    pub fn index_scan_from(&self, index: &str, key: &Value) -> DbResult<TreeIterator> {
        let info = self.catalog().get_index(index)?;
        info.tree.iter_from(&encode_index_key(key)?)
    }

    /// Point lookup through an index.
    pub fn index_lookup(&self, index: &str, key: &Value) -> DbResult<Option<RecordId>> {
        let info = self.catalog().get_index(index)?;
        info.tree.get(&encode_index_key(key)?)
    }

    pub fn get_tuple(&self, table: &str, rid: RecordId) -> DbResult<Tuple> {
        self.catalog().get_table(table)?.heap.get_tuple(rid)
    }

    // ------------------------------------------------------------ writes

    fn begin(&self) -> TxnContext {
        let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mut txn = TxnContext::new(id);
        self.log.append_chained(&mut txn, LogRecord::begin());
        txn
    }

    fn commit(&self, txn: &mut TxnContext) -> DbResult<()> {
        let lsn = self.log.append_chained(txn, LogRecord::commit());
        self.log.force_up_to(lsn)
    }

    fn abort<T>(&self, txn: &mut TxnContext, err: DbError) -> DbResult<T> {
        self.log.append_chained(txn, LogRecord::abort());
        Err(err)
    }

    fn index_keys_for(
        schema: &Schema,
        indexes: &[Arc<IndexInfo>],
        tuple: &Tuple,
    ) -> DbResult<Vec<(Arc<IndexInfo>, Vec<u8>)>> {
        indexes
            .iter()
            .map(|index| {
                let value = tuple.value_at(schema, index.key_column)?;
                Ok((Arc::clone(index), encode_index_key(&value)?.to_vec()))
            })
            .collect()
    }

    /// Insert a row and maintain every index on the table. A unique-key
    /// conflict undoes the heap insert and aborts the statement.
    pub fn insert_tuple(&self, table: &str, values: &[Value]) -> DbResult<RecordId> {
        let _gate = self.write_gate.read();
        let catalog = self.catalog();
        let info = catalog.get_table(table)?;
        let tuple = Tuple::from_values(&info.schema, values)?;
        let keys = Self::index_keys_for(&info.schema, &catalog.table_indexes(table)?, &tuple)?;

        let mut txn = self.begin();
        let rid = match info.heap.insert(&tuple.data, &mut txn) {
            Ok(rid) => rid,
            Err(err) => return self.abort(&mut txn, err),
        };
        for (done, (index, key)) in keys.iter().enumerate() {
            let outcome = index.tree.insert(key, rid);
            let err = match outcome {
                Ok(true) => continue,
                Ok(false) => DbError::AlreadyExists(format!(
                    "duplicate key in index '{}'",
                    index.name
                )),
                Err(err) => err,
            };
            for (undo_index, undo_key) in keys.iter().take(done) {
                let _ = undo_index.tree.remove(undo_key);
            }
            // Undoing an insert is a physical delete of the new slot.
            let _ = info.heap.apply_delete(rid, &mut txn);
            return self.abort(&mut txn, err);
        }
        self.commit(&mut txn)?;
        Ok(rid)
    }

    /// Two-phase delete: tombstone, drop index entries, then reclaim the
    /// slot. The tombstone never outlives the statement.
    pub fn delete_tuple(&self, table: &str, rid: RecordId) -> DbResult<()> {
        let _gate = self.write_gate.read();
        let catalog = self.catalog();
        let info = catalog.get_table(table)?;
        let tuple = info.heap.get_tuple(rid)?;
        let keys = Self::index_keys_for(&info.schema, &catalog.table_indexes(table)?, &tuple)?;

        let mut txn = self.begin();
        if let Err(err) = info.heap.mark_delete(rid, &mut txn) {
            return self.abort(&mut txn, err);
        }
        for (done, (index, key)) in keys.iter().enumerate() {
            if let Err(err) = index.tree.remove(key) {
                for (redo_index, redo_key) in keys.iter().take(done) {
                    let _ = redo_index.tree.insert(redo_key, rid);
                }
                let _ = info.heap.rollback_delete(rid, &mut txn);
                return self.abort(&mut txn, err);
            }
        }
        if let Err(err) = info.heap.apply_delete(rid, &mut txn) {
            return self.abort(&mut txn, err);
        }
        self.commit(&mut txn)?;
        Ok(())
    }

    /// Update in place when the image size matches; otherwise delete and
    /// reinsert. Returns the rid the row lives at afterwards.
    pub fn update_tuple(
        &self,
        table: &str,
        rid: RecordId,
        values: &[Value],
    ) -> DbResult<RecordId> {
        let _gate = self.write_gate.read();
        let catalog = self.catalog();
        let info = catalog.get_table(table)?;
        let new_tuple = Tuple::from_values(&info.schema, values)?;
        let old_tuple = info.heap.get_tuple(rid)?;
        let indexes = catalog.table_indexes(table)?;
        let old_keys = Self::index_keys_for(&info.schema, &indexes, &old_tuple)?;
        let new_keys = Self::index_keys_for(&info.schema, &indexes, &new_tuple)?;

        let mut txn = self.begin();
        let in_place = match info.heap.update(rid, &new_tuple.data, &mut txn) {
            Ok(in_place) => in_place,
            Err(err) => return self.abort(&mut txn, err),
        };
        if in_place {
            for ((index, old_key), (_, new_key)) in old_keys.iter().zip(&new_keys) {
                if old_key == new_key {
                    continue;
                }
                if let Err(err) = index.tree.remove(old_key) {
                    return self.abort(&mut txn, err);
                }
                match index.tree.insert(new_key, rid) {
                    Ok(true) => {}
                    Ok(false) => {
                        return self.abort(
                            &mut txn,
                            DbError::AlreadyExists(format!(
                                "duplicate key in index '{}'",
                                index.name
                            )),
                        );
                    }
                    Err(err) => return self.abort(&mut txn, err),
                }
            }
            self.commit(&mut txn)?;
            return Ok(rid);
        }

        // The image changed size: delete the old row and insert the new.
        if let Err(err) = info.heap.mark_delete(rid, &mut txn) {
            return self.abort(&mut txn, err);
        }
        for (index, old_key) in &old_keys {
            if let Err(err) = index.tree.remove(old_key) {
                return self.abort(&mut txn, err);
            }
        }
        if let Err(err) = info.heap.apply_delete(rid, &mut txn) {
            return self.abort(&mut txn, err);
        }
        let new_rid = match info.heap.insert(&new_tuple.data, &mut txn) {
            Ok(new_rid) => new_rid,
            Err(err) => return self.abort(&mut txn, err),
        };
        for (index, new_key) in &new_keys {
            match index.tree.insert(new_key, new_rid) {
                Ok(true) => {}
                Ok(false) => {
                    return self.abort(
                        &mut txn,
                        DbError::AlreadyExists(format!(
                            "duplicate key in index '{}'",
                            index.name
                        )),
                    );
                }
                Err(err) => return self.abort(&mut txn, err),
            }
        }
        self.commit(&mut txn)?;
        Ok(new_rid)
    }

    // Test hook: resolve a table's metadata without going through scans.
    pub fn table_info(&self, table: &str) -> DbResult<Arc<TableInfo>> {
        self.catalog().get_table(table)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.log.stop_flush_thread();
        if let Err(err) = self.log.flush_all() {
            warn!(%err, "final log flush failed");
        }
        if let Err(err) = self.bpm.flush_all() {
            warn!(%err, "final page flush failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("current", &self.current_database())
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}
