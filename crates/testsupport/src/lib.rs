//! Shared test fixtures: throwaway engine instances and sample schemas.
//!
//! # Example
//! ```no_run
//! use testsupport::TestDb;
//!
//! let db = TestDb::open();
//! db.engine.create_table("users", testsupport::users_columns()).unwrap();
//! db.engine
//!     .insert_tuple("users", &testsupport::user_row(1, "ada", true))
//!     .unwrap();
//! ```

use common::Config;
use database::Database;
use tempfile::TempDir;
use types::{Column, SqlType, Value};

/// An engine over a temporary directory, torn down on drop.
pub struct TestDb {
    pub dir: TempDir,
    pub engine: Database,
}

impl TestDb {
    pub fn open() -> Self {
        Self::with_pool(64)
    }

    /// Open with a specific buffer-pool size.
    pub fn with_pool(pages: usize) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = Config::builder()
            .data_dir(dir.path().to_path_buf())
            .buffer_pool_pages(pages)
            .build();
        let engine = Database::open(config).expect("open engine");
        Self { dir, engine }
    }

    /// Drop the engine and open a fresh one over the same directory
    /// (restart simulation).
    pub fn reopen(self) -> Self {
        let TestDb { dir, engine } = self;
        drop(engine);
        let config = Config::builder()
            .data_dir(dir.path().to_path_buf())
            .buffer_pool_pages(64)
            .build();
        let engine = Database::open(config).expect("reopen engine");
        Self { dir, engine }
    }
}

/// id BIGINT, name VARCHAR(32), active BOOLEAN.
pub fn users_columns() -> Vec<Column> {
    vec![
        Column::new("id", SqlType::BigInt),
        Column::new("name", SqlType::Varchar(32)),
        Column::new("active", SqlType::Boolean),
    ]
}

pub fn user_row(id: i64, name: &str, active: bool) -> Vec<Value> {
    vec![
        Value::BigInt(id),
        Value::Varchar(name.to_string()),
        Value::Boolean(active),
    ]
}

/// id BIGINT, amount BIGINT: a fixed-width schema where updates can stay
/// in place.
pub fn ledger_columns() -> Vec<Column> {
    vec![
        Column::new("id", SqlType::BigInt),
        Column::new("amount", SqlType::BigInt),
    ]
}

pub fn ledger_row(id: i64, amount: i64) -> Vec<Value> {
    vec![Value::BigInt(id), Value::BigInt(amount)]
}
