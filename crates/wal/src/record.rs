use common::{DbError, DbResult, Lsn, PageId, RecordId, TxnId};

/// Bytes of the fixed record header: size, lsn, txn id, prev lsn, type.
pub const HEADER_SIZE: usize = 20;

fn body_slice(body: &[u8], at: usize, len: usize) -> DbResult<&[u8]> {
    body.get(at..at + len)
        .ok_or_else(|| DbError::Corruption("truncated log record body".into()))
}

/// Discriminant of a log record, stored as a 4-byte value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    /// A new page was linked into a table heap.
    NewPage = 9,
    CreateDatabase = 10,
    Checkpoint = 11,
}

impl LogRecordType {
    fn from_i32(v: i32) -> DbResult<Self> {
        Ok(match v {
            0 => LogRecordType::Invalid,
            1 => LogRecordType::Insert,
            2 => LogRecordType::MarkDelete,
            3 => LogRecordType::ApplyDelete,
            4 => LogRecordType::RollbackDelete,
            5 => LogRecordType::Update,
            6 => LogRecordType::Begin,
            7 => LogRecordType::Commit,
            8 => LogRecordType::Abort,
            9 => LogRecordType::NewPage,
            10 => LogRecordType::CreateDatabase,
            11 => LogRecordType::Checkpoint,
            other => {
                return Err(DbError::Corruption(format!(
                    "unknown log record type {other}"
                )));
            }
        })
    }
}

/// Type-specific body of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT / CHECKPOINT carry the header only.
    None,
    /// INSERT and the three delete flavors: the affected rid and tuple image.
    Tuple { rid: RecordId, data: Vec<u8> },
    /// UPDATE: rid plus before and after images.
    Update {
        rid: RecordId,
        old: Vec<u8>,
        new: Vec<u8>,
    },
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
    CreateDatabase { name: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub size: i32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    fn with_payload(record_type: LogRecordType, payload: LogPayload) -> Self {
        let body = match &payload {
            LogPayload::None => 0,
            LogPayload::Tuple { data, .. } => 8 + 4 + data.len(),
            LogPayload::Update { old, new, .. } => 8 + 4 + old.len() + 4 + new.len(),
            LogPayload::NewPage { .. } => 8,
            LogPayload::CreateDatabase { name } => 8 + name.len(),
        };
        Self {
            size: (HEADER_SIZE + body) as i32,
            lsn: Lsn::INVALID,
            txn_id: TxnId::INVALID,
            prev_lsn: Lsn::INVALID,
            record_type,
            payload,
        }
    }

    pub fn insert(rid: RecordId, tuple: Vec<u8>) -> Self {
        Self::with_payload(LogRecordType::Insert, LogPayload::Tuple { rid, data: tuple })
    }

    pub fn mark_delete(rid: RecordId, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            LogRecordType::MarkDelete,
            LogPayload::Tuple { rid, data: tuple },
        )
    }

    pub fn apply_delete(rid: RecordId, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            LogRecordType::ApplyDelete,
            LogPayload::Tuple { rid, data: tuple },
        )
    }

    pub fn rollback_delete(rid: RecordId, tuple: Vec<u8>) -> Self {
        Self::with_payload(
            LogRecordType::RollbackDelete,
            LogPayload::Tuple { rid, data: tuple },
        )
    }

    pub fn update(rid: RecordId, old: Vec<u8>, new: Vec<u8>) -> Self {
        Self::with_payload(LogRecordType::Update, LogPayload::Update { rid, old, new })
    }

    pub fn new_page(prev_page_id: PageId, page_id: PageId) -> Self {
        Self::with_payload(
            LogRecordType::NewPage,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    pub fn begin() -> Self {
        Self::with_payload(LogRecordType::Begin, LogPayload::None)
    }

    pub fn commit() -> Self {
        Self::with_payload(LogRecordType::Commit, LogPayload::None)
    }

    pub fn abort() -> Self {
        Self::with_payload(LogRecordType::Abort, LogPayload::None)
    }

    pub fn checkpoint() -> Self {
        Self::with_payload(LogRecordType::Checkpoint, LogPayload::None)
    }

    pub fn create_database(name: impl Into<String>) -> Self {
        Self::with_payload(
            LogRecordType::CreateDatabase,
            LogPayload::CreateDatabase { name: name.into() },
        )
    }

    /// Serialize into the on-disk little-endian form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size as usize);
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.lsn.0.to_le_bytes());
        out.extend_from_slice(&self.txn_id.0.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.0.to_le_bytes());
        out.extend_from_slice(&(self.record_type as i32).to_le_bytes());
        match &self.payload {
            LogPayload::None => {}
            LogPayload::Tuple { rid, data } => {
                out.extend_from_slice(&rid.encode());
                out.extend_from_slice(&(data.len() as i32).to_le_bytes());
                out.extend_from_slice(data);
            }
            LogPayload::Update { rid, old, new } => {
                out.extend_from_slice(&rid.encode());
                out.extend_from_slice(&(old.len() as i32).to_le_bytes());
                out.extend_from_slice(old);
                out.extend_from_slice(&(new.len() as i32).to_le_bytes());
                out.extend_from_slice(new);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                out.extend_from_slice(&prev_page_id.0.to_le_bytes());
                out.extend_from_slice(&page_id.0.to_le_bytes());
            }
            LogPayload::CreateDatabase { name } => {
                out.extend_from_slice(&(name.len() as u64).to_le_bytes());
                out.extend_from_slice(name.as_bytes());
            }
        }
        debug_assert_eq!(out.len(), self.size as usize);
        out
    }

    /// Parse one record from `bytes`, returning it and the bytes consumed.
    pub fn decode(bytes: &[u8]) -> DbResult<(LogRecord, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(DbError::Corruption("truncated log record header".into()));
        }
        let size = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let lsn = Lsn(i32::from_le_bytes(bytes[4..8].try_into().unwrap()));
        let txn_id = TxnId(i32::from_le_bytes(bytes[8..12].try_into().unwrap()));
        let prev_lsn = Lsn(i32::from_le_bytes(bytes[12..16].try_into().unwrap()));
        let record_type = LogRecordType::from_i32(i32::from_le_bytes(
            bytes[16..20].try_into().unwrap(),
        ))?;
        if size < HEADER_SIZE as i32 || bytes.len() < size as usize {
            return Err(DbError::Corruption(format!(
                "log record claims {size} bytes, {} available",
                bytes.len()
            )));
        }
        let body = &bytes[HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Invalid => {
                return Err(DbError::Corruption("invalid log record type".into()));
            }
            LogRecordType::Begin
            | LogRecordType::Commit
            | LogRecordType::Abort
            | LogRecordType::Checkpoint => LogPayload::None,
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let rid = RecordId::decode(body_slice(body, 0, 8)?);
                let len =
                    i32::from_le_bytes(body_slice(body, 8, 4)?.try_into().unwrap()) as usize;
                LogPayload::Tuple {
                    rid,
                    data: body_slice(body, 12, len)?.to_vec(),
                }
            }
            LogRecordType::Update => {
                let rid = RecordId::decode(body_slice(body, 0, 8)?);
                let old_len =
                    i32::from_le_bytes(body_slice(body, 8, 4)?.try_into().unwrap()) as usize;
                let old = body_slice(body, 12, old_len)?.to_vec();
                let at = 12 + old_len;
                let new_len =
                    i32::from_le_bytes(body_slice(body, at, 4)?.try_into().unwrap()) as usize;
                let new = body_slice(body, at + 4, new_len)?.to_vec();
                LogPayload::Update { rid, old, new }
            }
            LogRecordType::NewPage => LogPayload::NewPage {
                prev_page_id: PageId(i32::from_le_bytes(
                    body_slice(body, 0, 4)?.try_into().unwrap(),
                )),
                page_id: PageId(i32::from_le_bytes(
                    body_slice(body, 4, 4)?.try_into().unwrap(),
                )),
            },
            LogRecordType::CreateDatabase => {
                let len =
                    u64::from_le_bytes(body_slice(body, 0, 8)?.try_into().unwrap()) as usize;
                let name = String::from_utf8(body_slice(body, 8, len)?.to_vec())
                    .map_err(|_| DbError::Corruption("database name not utf-8".into()))?;
                LogPayload::CreateDatabase { name }
            }
        };
        Ok((
            LogRecord {
                size,
                lsn,
                txn_id,
                prev_lsn,
                record_type,
                payload,
            },
            size as usize,
        ))
    }

    /// Parse a whole log image into records; used by tests and by a future
    /// recovery replayer.
    pub fn decode_all(mut bytes: &[u8]) -> DbResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while !bytes.is_empty() {
            let (record, used) = LogRecord::decode(bytes)?;
            records.push(record);
            bytes = &bytes[used..];
        }
        Ok(records)
    }
}
