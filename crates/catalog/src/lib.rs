//! Per-database metadata: tables, indexes, and view definitions.
//!
//! The catalog owns the live storage handles (each table's heap, each
//! index's tree) because creating either allocates a first page through
//! the buffer pool, and the mapping must be installed atomically under the
//! catalog's write lock.


use ahash::RandomState;
use btree::{BPlusTree, MemcmpComparator};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, Oid};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use table::TableHeap;
use tracing::info;
use types::{encode_index_key, Schema, SqlType, INDEX_KEY_SIZE};
use wal::{LogManager, TxnContext};

type Map<K, V> = HashMap<K, V, RandomState>;

/// A registered table: identity, layout, and its heap.
#[derive(Debug)]
pub struct TableInfo {
    pub oid: Oid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// A registered index: identity, the keyed column, and its tree.
#[derive(Debug)]
pub struct IndexInfo {
    pub oid: Oid,
    pub name: String,
    pub table_name: String,
    pub key_column: usize,
    pub key_size: usize,
    pub tree: Arc<BPlusTree>,
}

struct CatalogInner {
    tables: Map<String, Arc<TableInfo>>,
    table_names_by_oid: Map<Oid, String>,
    indexes: Map<String, Arc<IndexInfo>>,
    index_names_by_oid: Map<Oid, String>,
    table_indexes: Map<String, Vec<Oid>>,
    views: Map<String, String>,
    next_table_oid: Oid,
    next_index_oid: Oid,
}

/// One database's name → metadata maps, readers shared, writers exclusive.
pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    log: Arc<LogManager>,
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>, log: Arc<LogManager>) -> Self {
        Self {
            bpm,
            log,
            inner: RwLock::new(CatalogInner {
                tables: Map::default(),
                table_names_by_oid: Map::default(),
                indexes: Map::default(),
                index_names_by_oid: Map::default(),
                table_indexes: Map::default(),
                views: Map::default(),
                next_table_oid: 0,
                next_index_oid: 0,
            }),
        }
    }

    /// Create a table, allocating its first heap page.
    pub fn create_table(&self, name: &str, schema: Schema) -> DbResult<Arc<TableInfo>> {
        let mut inner = self.inner.write();
        if inner.tables.contains_key(name) {
            return Err(DbError::AlreadyExists(format!("table '{name}'")));
        }
        let mut txn = TxnContext::system();
        let heap = Arc::new(TableHeap::create(
            Arc::clone(&self.bpm),
            Arc::clone(&self.log),
            &mut txn,
        )?);
        let oid = inner.next_table_oid;
        inner.next_table_oid += 1;
        let info = Arc::new(TableInfo {
            oid,
            name: name.to_string(),
            schema,
            heap,
        });
        inner.tables.insert(name.to_string(), Arc::clone(&info));
        inner.table_names_by_oid.insert(oid, name.to_string());
        inner.table_indexes.insert(name.to_string(), Vec::new());
        info!(table = name, oid, "table created");
        Ok(info)
    }

    pub fn get_table(&self, name: &str) -> DbResult<Arc<TableInfo>> {
        self.inner
            .read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))
    }

    pub fn get_table_by_oid(&self, oid: Oid) -> DbResult<Arc<TableInfo>> {
        let inner = self.inner.read();
        let name = inner
            .table_names_by_oid
            .get(&oid)
            .ok_or_else(|| DbError::NotFound(format!("table oid {oid}")))?;
        inner
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table oid {oid}")))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create an ordered index over one integer column and backfill it from
    /// the table's current contents.
    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_column: &str,
    ) -> DbResult<Arc<IndexInfo>> {
        let mut inner = self.inner.write();
        if inner.indexes.contains_key(index_name) {
            return Err(DbError::AlreadyExists(format!("index '{index_name}'")));
        }
        let table = inner
            .tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        let column_idx = table
            .schema
            .column_index(key_column)
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "column '{key_column}' on table '{table_name}'"
                ))
            })?;
        let column = table.schema.column(column_idx)?;
        if !matches!(column.ty, SqlType::Integer | SqlType::BigInt) {
            return Err(DbError::NotSupported(format!(
                "index key column '{key_column}' must be INTEGER or BIGINT"
            )));
        }

        let tree = Arc::new(BPlusTree::new(
            index_name,
            Arc::clone(&self.bpm),
            Arc::new(MemcmpComparator),
            INDEX_KEY_SIZE,
            None,
            None,
        )?);
        let mut backfilled: Vec<[u8; INDEX_KEY_SIZE]> = Vec::new();
        for tuple in table.heap.iter() {
            let tuple = tuple?;
            let value = tuple.value_at(&table.schema, column_idx)?;
            let key = encode_index_key(&value)?;
            if !tree.insert(&key, tuple.rid)? {
                // Unwind the partial build; an emptied tree resets its
                // header-page entry to the invalid root.
                for key in &backfilled {
                    let _ = tree.remove(key);
                }
                return Err(DbError::AlreadyExists(format!(
                    "duplicate key {value} while building index '{index_name}'"
                )));
            }
            backfilled.push(key);
        }

        let oid = inner.next_index_oid;
        inner.next_index_oid += 1;
        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            key_column: column_idx,
            key_size: INDEX_KEY_SIZE,
            tree,
        });
        inner
            .indexes
            .insert(index_name.to_string(), Arc::clone(&info));
        inner
            .index_names_by_oid
            .insert(oid, index_name.to_string());
        inner
            .table_indexes
            .get_mut(table_name)
            .expect("table registered above")
            .push(oid);
        info!(index = index_name, table = table_name, oid, "index created");
        Ok(info)
    }

    pub fn get_index(&self, name: &str) -> DbResult<Arc<IndexInfo>> {
        self.inner
            .read()
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("index '{name}'")))
    }

    pub fn get_index_by_oid(&self, oid: Oid) -> DbResult<Arc<IndexInfo>> {
        let inner = self.inner.read();
        let name = inner
            .index_names_by_oid
            .get(&oid)
            .ok_or_else(|| DbError::NotFound(format!("index oid {oid}")))?;
        inner
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("index oid {oid}")))
    }

    /// Every index defined on `table_name`.
    pub fn table_indexes(&self, table_name: &str) -> DbResult<Vec<Arc<IndexInfo>>> {
        let inner = self.inner.read();
        let oids = inner
            .table_indexes
            .get(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table '{table_name}'")))?;
        Ok(oids
            .iter()
            .filter_map(|oid| {
                inner
                    .index_names_by_oid
                    .get(oid)
                    .and_then(|name| inner.indexes.get(name))
                    .cloned()
            })
            .collect())
    }

    /// Register a view: a name that expands to query text at bind time.
    pub fn create_view(&self, name: &str, query: &str) -> DbResult<()> {
        let mut inner = self.inner.write();
        if inner.views.contains_key(name) {
            return Err(DbError::AlreadyExists(format!("view '{name}'")));
        }
        inner.views.insert(name.to_string(), query.to_string());
        info!(view = name, "view created");
        Ok(())
    }

    pub fn get_view(&self, name: &str) -> DbResult<String> {
        self.inner
            .read()
            .views
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("view '{name}'")))
    }

    pub fn view_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().views.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Catalog")
            .field("tables", &inner.tables.len())
            .field("indexes", &inner.indexes.len())
            .field("views", &inner.views.len())
            .finish()
    }
}
