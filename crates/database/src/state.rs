//! The binary catalog snapshot written by `save_state`.
//!
//! Layout, all integers little-endian: `[num_databases:u64]` then per
//! database `[name_len:u64][name][num_tables:u64]` with per table
//! `[name_len:u64][name][oid:u32][col_count:u64]` and per column
//! `[name_len:u64][name][type_id:u32]`; the file ends with
//! `[current_len:u64][current_database]`.

use common::{DbError, DbResult, Oid};

#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    pub name: String,
    pub oid: Oid,
    pub columns: Vec<(String, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseState {
    pub name: String,
    pub tables: Vec<TableState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub databases: Vec<DatabaseState>,
    pub current: String,
}

impl StateSnapshot {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u64(&mut out, self.databases.len() as u64);
        for database in &self.databases {
            put_str(&mut out, &database.name);
            put_u64(&mut out, database.tables.len() as u64);
            for table in &database.tables {
                put_str(&mut out, &table.name);
                out.extend_from_slice(&table.oid.to_le_bytes());
                put_u64(&mut out, table.columns.len() as u64);
                for (name, type_id) in &table.columns {
                    put_str(&mut out, name);
                    out.extend_from_slice(&type_id.to_le_bytes());
                }
            }
        }
        put_str(&mut out, &self.current);
        out
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let mut reader = Reader { bytes, at: 0 };
        let num_databases = reader.u64()?;
        let mut databases = Vec::new();
        for _ in 0..num_databases {
            let name = reader.string()?;
            let num_tables = reader.u64()?;
            let mut tables = Vec::new();
            for _ in 0..num_tables {
                let table_name = reader.string()?;
                let oid = reader.u32()?;
                let col_count = reader.u64()?;
                let mut columns = Vec::new();
                for _ in 0..col_count {
                    let column_name = reader.string()?;
                    let type_id = reader.u32()?;
                    columns.push((column_name, type_id));
                }
                tables.push(TableState {
                    name: table_name,
                    oid,
                    columns,
                });
            }
            databases.push(DatabaseState { name, tables });
        }
        let current = reader.string()?;
        Ok(StateSnapshot { databases, current })
    }
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_u64(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> DbResult<&[u8]> {
        let end = self.at.checked_add(len);
        if end.map_or(true, |end| end > self.bytes.len()) {
            return Err(DbError::Corruption("truncated state snapshot".into()));
        }
        let slice = &self.bytes[self.at..self.at + len];
        self.at += len;
        Ok(slice)
    }

    fn u64(&mut self) -> DbResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> DbResult<String> {
        let len = self.u64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DbError::Corruption("state snapshot holds invalid utf-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips() {
        let snapshot = StateSnapshot {
            databases: vec![
                DatabaseState {
                    name: "default".into(),
                    tables: vec![TableState {
                        name: "users".into(),
                        oid: 0,
                        columns: vec![("id".into(), 5), ("name".into(), 7)],
                    }],
                },
                DatabaseState {
                    name: "analytics".into(),
                    tables: vec![],
                },
            ],
            current: "analytics".into(),
        };
        let bytes = snapshot.encode();
        assert_eq!(StateSnapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn truncated_snapshots_are_corruption() {
        let snapshot = StateSnapshot {
            databases: vec![DatabaseState {
                name: "default".into(),
                tables: vec![],
            }],
            current: "default".into(),
        };
        let bytes = snapshot.encode();
        for cut in [1, 8, bytes.len() - 1] {
            assert!(matches!(
                StateSnapshot::decode(&bytes[..cut]),
                Err(DbError::Corruption(_))
            ));
        }
    }
}
