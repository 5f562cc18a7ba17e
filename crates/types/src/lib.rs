//! Column types, values, schemas, and the tuple byte layout.
//!
//! A tuple is opaque bytes plus its record id; interpretation is owned by the
//! schema. Fixed-width columns live at fixed offsets in the inline area;
//! VARCHAR columns store an (offset, length) pair pointing into a tail that
//! grows past the inline area.


use common::{DbError, DbResult, RecordId};
use std::cmp::Ordering;
use std::fmt;

/// Width of the inline (offset, length) indirection a VARCHAR occupies.
const VARCHAR_SLOT: usize = 8;

/// Type tag of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Varchar(u32),
    Timestamp,
}

impl SqlType {
    /// Bytes this type occupies in the inline area of a tuple.
    pub fn inline_size(self) -> usize {
        match self {
            SqlType::Boolean | SqlType::TinyInt => 1,
            SqlType::SmallInt => 2,
            SqlType::Integer => 4,
            SqlType::BigInt | SqlType::Decimal | SqlType::Timestamp => 8,
            SqlType::Varchar(_) => VARCHAR_SLOT,
        }
    }

    /// Stable numeric tag used by the state snapshot.
    pub fn type_id(self) -> u32 {
        match self {
            SqlType::Boolean => 1,
            SqlType::TinyInt => 2,
            SqlType::SmallInt => 3,
            SqlType::Integer => 4,
            SqlType::BigInt => 5,
            SqlType::Decimal => 6,
            SqlType::Varchar(_) => 7,
            SqlType::Timestamp => 8,
        }
    }

    /// Inverse of [`SqlType::type_id`]; VARCHAR lengths are not part of the
    /// snapshot and come back with the default cap.
    pub fn from_type_id(id: u32) -> DbResult<Self> {
        Ok(match id {
            1 => SqlType::Boolean,
            2 => SqlType::TinyInt,
            3 => SqlType::SmallInt,
            4 => SqlType::Integer,
            5 => SqlType::BigInt,
            6 => SqlType::Decimal,
            7 => SqlType::Varchar(128),
            8 => SqlType::Timestamp,
            other => {
                return Err(DbError::Corruption(format!("unknown type id {other}")));
            }
        })
    }
}

/// A typed cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Decimal(f64),
    Varchar(String),
    Timestamp(u64),
}

impl Value {
    pub fn sql_type_matches(&self, ty: SqlType) -> bool {
        matches!(
            (self, ty),
            (Value::Boolean(_), SqlType::Boolean)
                | (Value::TinyInt(_), SqlType::TinyInt)
                | (Value::SmallInt(_), SqlType::SmallInt)
                | (Value::Integer(_), SqlType::Integer)
                | (Value::BigInt(_), SqlType::BigInt)
                | (Value::Decimal(_), SqlType::Decimal)
                | (Value::Varchar(_), SqlType::Varchar(_))
                | (Value::Timestamp(_), SqlType::Timestamp)
        )
    }

    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::TinyInt(a), Value::TinyInt(b)) => Some(a.cmp(b)),
            (Value::SmallInt(a), Value::SmallInt(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

/// One column of a schema: name, type tag, and its fixed inline offset.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    pub offset: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            offset: 0,
        }
    }
}

/// Ordered column list with precomputed inline offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
    inline_size: usize,
}

impl Schema {
    pub fn new(mut columns: Vec<Column>) -> Self {
        let mut offset = 0;
        for column in &mut columns {
            column.offset = offset;
            offset += column.ty.inline_size();
        }
        Self {
            columns,
            inline_size: offset,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> DbResult<&Column> {
        self.columns
            .get(idx)
            .ok_or_else(|| DbError::NotFound(format!("column ordinal {idx}")))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Bytes occupied by the fixed-width area of a tuple in this schema.
    pub fn inline_size(&self) -> usize {
        self.inline_size
    }
}

/// Opaque tuple bytes plus the record id they live at.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    pub data: Vec<u8>,
    pub rid: RecordId,
}

impl Tuple {
    pub fn from_bytes(data: Vec<u8>, rid: RecordId) -> Self {
        Self { data, rid }
    }

    /// Lay out `values` per `schema`. VARCHAR payloads land in the tail, in
    /// column order, each referenced by an inline (offset, length) pair.
    pub fn from_values(schema: &Schema, values: &[Value]) -> DbResult<Tuple> {
        if values.len() != schema.column_count() {
            return Err(DbError::NotSupported(format!(
                "expected {} values, got {}",
                schema.column_count(),
                values.len()
            )));
        }
        let mut data = vec![0u8; schema.inline_size()];
        for (column, value) in schema.columns().iter().zip(values) {
            if !value.sql_type_matches(column.ty) {
                return Err(DbError::NotSupported(format!(
                    "value {value} does not fit column '{}' ({:?})",
                    column.name, column.ty
                )));
            }
            let at = column.offset;
            match value {
                Value::Boolean(v) => data[at] = *v as u8,
                Value::TinyInt(v) => data[at] = *v as u8,
                Value::SmallInt(v) => data[at..at + 2].copy_from_slice(&v.to_le_bytes()),
                Value::Integer(v) => data[at..at + 4].copy_from_slice(&v.to_le_bytes()),
                Value::BigInt(v) => data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Decimal(v) => data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Timestamp(v) => data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Varchar(v) => {
                    let cap = match column.ty {
                        SqlType::Varchar(cap) => cap as usize,
                        _ => unreachable!(),
                    };
                    if v.len() > cap {
                        return Err(DbError::OutOfSpace(format!(
                            "varchar column '{}' capped at {cap} bytes",
                            column.name
                        )));
                    }
                    let tail_offset = data.len() as u32;
                    let len = v.len() as u32;
                    data[at..at + 4].copy_from_slice(&tail_offset.to_le_bytes());
                    data[at + 4..at + 8].copy_from_slice(&len.to_le_bytes());
                    data.extend_from_slice(v.as_bytes());
                }
            }
        }
        Ok(Tuple {
            data,
            rid: RecordId::INVALID,
        })
    }

    /// Decode the value of column `idx`.
    pub fn value_at(&self, schema: &Schema, idx: usize) -> DbResult<Value> {
        let column = schema.column(idx)?;
        let at = column.offset;
        let need = at + column.ty.inline_size();
        if self.data.len() < need {
            return Err(DbError::Corruption(format!(
                "tuple of {} bytes too short for column '{}'",
                self.data.len(),
                column.name
            )));
        }
        Ok(match column.ty {
            SqlType::Boolean => Value::Boolean(self.data[at] != 0),
            SqlType::TinyInt => Value::TinyInt(self.data[at] as i8),
            SqlType::SmallInt => Value::SmallInt(i16::from_le_bytes(
                self.data[at..at + 2].try_into().unwrap(),
            )),
            SqlType::Integer => Value::Integer(i32::from_le_bytes(
                self.data[at..at + 4].try_into().unwrap(),
            )),
            SqlType::BigInt => Value::BigInt(i64::from_le_bytes(
                self.data[at..at + 8].try_into().unwrap(),
            )),
            SqlType::Decimal => Value::Decimal(f64::from_le_bytes(
                self.data[at..at + 8].try_into().unwrap(),
            )),
            SqlType::Timestamp => Value::Timestamp(u64::from_le_bytes(
                self.data[at..at + 8].try_into().unwrap(),
            )),
            SqlType::Varchar(_) => {
                let offset =
                    u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as usize;
                let len =
                    u32::from_le_bytes(self.data[at + 4..at + 8].try_into().unwrap()) as usize;
                let end = offset.checked_add(len).unwrap_or(usize::MAX);
                if end > self.data.len() {
                    return Err(DbError::Corruption(format!(
                        "varchar column '{}' points past the tuple",
                        column.name
                    )));
                }
                let text = std::str::from_utf8(&self.data[offset..end])
                    .map_err(|_| {
                        DbError::Corruption(format!(
                            "varchar column '{}' holds invalid utf-8",
                            column.name
                        ))
                    })?
                    .to_string();
                Value::Varchar(text)
            }
        })
    }

    /// Decode all columns in schema order.
    pub fn values(&self, schema: &Schema) -> DbResult<Vec<Value>> {
        (0..schema.column_count())
            .map(|i| self.value_at(schema, i))
            .collect()
    }
}

/// Width of every index key in bytes.
pub const INDEX_KEY_SIZE: usize = 8;

/// Encode an integer-family value into a fixed 8-byte key whose memcmp order
/// equals the value order (big-endian with the sign bit flipped).
pub fn encode_index_key(value: &Value) -> DbResult<[u8; INDEX_KEY_SIZE]> {
    let raw: i64 = match value {
        Value::Integer(v) => *v as i64,
        Value::BigInt(v) => *v,
        other => {
            return Err(DbError::NotSupported(format!(
                "index keys must be INTEGER or BIGINT, got {other}"
            )));
        }
    };
    Ok(((raw as u64) ^ (1 << 63)).to_be_bytes())
}

/// Inverse of [`encode_index_key`].
pub fn decode_index_key(key: &[u8]) -> DbResult<i64> {
    if key.len() != INDEX_KEY_SIZE {
        return Err(DbError::Corruption(format!(
            "index key of {} bytes, expected {INDEX_KEY_SIZE}",
            key.len()
        )));
    }
    let raw = u64::from_be_bytes(key.try_into().unwrap());
    Ok((raw ^ (1 << 63)) as i64)
}
