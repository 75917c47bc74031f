//! Persisted scalar values and their comparison semantics.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Property value stored on vertices and edges.
///
/// Comparison follows the query language's three-valued semantics: `Null`
/// compared to anything is unknown, `Int` and `Double` compare numerically
/// across types, containers compare structurally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Date(NaiveDate),
    LocalTime(NaiveTime),
    LocalDateTime(NaiveDateTime),
    #[serde(with = "serde_duration")]
    Duration(chrono::Duration),
}

mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &chrono::Duration, ser: S) -> Result<S::Ok, S::Error> {
        value.num_microseconds().unwrap_or(i64::MAX).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<chrono::Duration, D::Error> {
        let micros = i64::deserialize(de)?;
        Ok(chrono::Duration::microseconds(micros))
    }
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::Bool(_) => "Bool",
            PropertyValue::Int(_) => "Int",
            PropertyValue::Double(_) => "Double",
            PropertyValue::String(_) => "String",
            PropertyValue::List(_) => "List",
            PropertyValue::Map(_) => "Map",
            PropertyValue::Date(_) => "Date",
            PropertyValue::LocalTime(_) => "LocalTime",
            PropertyValue::LocalDateTime(_) => "LocalDateTime",
            PropertyValue::Duration(_) => "Duration",
        }
    }

    fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Three-valued equality. `None` means unknown (a null was involved).
    pub fn ternary_eq(&self, other: &PropertyValue) -> Option<bool> {
        match (self, other) {
            (PropertyValue::Null, _) | (_, PropertyValue::Null) => None,
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => Some(a == b),
            (PropertyValue::String(a), PropertyValue::String(b)) => Some(a == b),
            (PropertyValue::Date(a), PropertyValue::Date(b)) => Some(a == b),
            (PropertyValue::LocalTime(a), PropertyValue::LocalTime(b)) => Some(a == b),
            (PropertyValue::LocalDateTime(a), PropertyValue::LocalDateTime(b)) => Some(a == b),
            (PropertyValue::Duration(a), PropertyValue::Duration(b)) => Some(a == b),
            (PropertyValue::List(a), PropertyValue::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                ternary_all(a.iter().zip(b.iter()).map(|(x, y)| x.ternary_eq(y)))
            }
            (PropertyValue::Map(a), PropertyValue::Map(b)) => {
                if a.len() != b.len() || !a.keys().eq(b.keys()) {
                    return Some(false);
                }
                ternary_all(a.values().zip(b.values()).map(|(x, y)| x.ternary_eq(y)))
            }
            _ => match (self.as_double(), other.as_double()) {
                (Some(a), Some(b)) => Some(a == b),
                _ => Some(false),
            },
        }
    }

    /// Ordered comparison as defined by the language: only null, numbers and
    /// strings are mutually ordered. `Ok(None)` means unknown (null operand),
    /// `Err` means the operand types have no defined ordering.
    pub fn ternary_cmp(&self, other: &PropertyValue) -> Result<Option<Ordering>, ()> {
        match (self, other) {
            (PropertyValue::Null, _) | (_, PropertyValue::Null) => Ok(None),
            (PropertyValue::String(a), PropertyValue::String(b)) => Ok(Some(a.cmp(b))),
            _ => match (self.as_double(), other.as_double()) {
                (Some(a), Some(b)) => Ok(Some(cmp_f64(a, b))),
                _ => Err(()),
            },
        }
    }

    /// Whether the value may appear as a key in the label+property index.
    /// Null and containers are excluded from both equality and range lookups.
    pub fn is_indexable(&self) -> bool {
        !matches!(
            self,
            PropertyValue::Null | PropertyValue::List(_) | PropertyValue::Map(_)
        )
    }

    /// Total order used by the label+property index: values are ranked by
    /// type first (bool < numbers < strings < temporals), numerically inside
    /// the number rank. Only meaningful for indexable values.
    pub fn index_cmp(&self, other: &PropertyValue) -> Ordering {
        let (ra, rb) = (self.index_rank(), other.index_rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::Date(a), PropertyValue::Date(b)) => a.cmp(b),
            (PropertyValue::LocalTime(a), PropertyValue::LocalTime(b)) => a.cmp(b),
            (PropertyValue::LocalDateTime(a), PropertyValue::LocalDateTime(b)) => a.cmp(b),
            (PropertyValue::Duration(a), PropertyValue::Duration(b)) => a.cmp(b),
            _ => match (self.as_double(), other.as_double()) {
                (Some(a), Some(b)) => cmp_f64(a, b),
                _ => Ordering::Equal,
            },
        }
    }

    /// Whether two values order within the same type family in the index
    /// (Int and Double share the numeric family).
    pub fn in_same_order_family(&self, other: &PropertyValue) -> bool {
        self.index_rank() == other.index_rank()
    }

    fn index_rank(&self) -> u8 {
        match self {
            PropertyValue::Null => 0,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Int(_) | PropertyValue::Double(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::Date(_) => 4,
            PropertyValue::LocalTime(_) => 5,
            PropertyValue::LocalDateTime(_) => 6,
            PropertyValue::Duration(_) => 7,
            PropertyValue::List(_) => 8,
            PropertyValue::Map(_) => 9,
        }
    }
}

fn ternary_all(mut results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut saw_unknown = false;
    if results.any(|r| match r {
        Some(false) => true,
        Some(true) => false,
        None => {
            saw_unknown = true;
            false
        }
    }) {
        return Some(false);
    }
    if saw_unknown {
        None
    } else {
        Some(true)
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ord) => ord,
        // NaN sorts after every number so the index order stays total.
        None => a.is_nan().cmp(&b.is_nan()),
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v:?}"),
            PropertyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            PropertyValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            PropertyValue::Date(v) => write!(f, "{v}"),
            PropertyValue::LocalTime(v) => write!(f, "{v}"),
            PropertyValue::LocalDateTime(v) => write!(f, "{v}"),
            PropertyValue::Duration(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_MAP: u8 = 6;
const TAG_DATE: u8 = 7;
const TAG_LOCAL_TIME: u8 = 8;
const TAG_LOCAL_DATE_TIME: u8 = 9;
const TAG_DURATION: u8 = 10;

impl PropertyValue {
    /// Appends the binary encoding used by the WAL, snapshots and the
    /// replication stream: a type tag followed by a little-endian payload.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            PropertyValue::Null => out.push(TAG_NULL),
            PropertyValue::Bool(v) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*v));
            }
            PropertyValue::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PropertyValue::Double(v) => {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PropertyValue::String(v) => {
                out.push(TAG_STRING);
                encode_str(v, out);
            }
            PropertyValue::List(items) => {
                out.push(TAG_LIST);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            PropertyValue::Map(entries) => {
                out.push(TAG_MAP);
                out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                for (key, value) in entries {
                    encode_str(key, out);
                    value.encode_into(out);
                }
            }
            PropertyValue::Date(v) => {
                out.push(TAG_DATE);
                out.extend_from_slice(&v.num_days_from_ce().to_le_bytes());
            }
            PropertyValue::LocalTime(v) => {
                out.push(TAG_LOCAL_TIME);
                out.extend_from_slice(&v.num_seconds_from_midnight().to_le_bytes());
                out.extend_from_slice(&v.nanosecond().to_le_bytes());
            }
            PropertyValue::LocalDateTime(v) => {
                out.push(TAG_LOCAL_DATE_TIME);
                out.extend_from_slice(&v.date().num_days_from_ce().to_le_bytes());
                out.extend_from_slice(&v.time().num_seconds_from_midnight().to_le_bytes());
                out.extend_from_slice(&v.time().nanosecond().to_le_bytes());
            }
            PropertyValue::Duration(v) => {
                out.push(TAG_DURATION);
                out.extend_from_slice(&v.num_microseconds().unwrap_or(i64::MAX).to_le_bytes());
            }
        }
    }

    /// Decodes a value from `buf` starting at `*pos`, advancing the cursor.
    pub fn decode(buf: &[u8], pos: &mut usize) -> StorageResult<PropertyValue> {
        let tag = take(buf, pos, 1)?[0];
        match tag {
            TAG_NULL => Ok(PropertyValue::Null),
            TAG_BOOL => Ok(PropertyValue::Bool(take(buf, pos, 1)?[0] != 0)),
            TAG_INT => Ok(PropertyValue::Int(decode_i64(buf, pos)?)),
            TAG_DOUBLE => {
                let bits = decode_i64(buf, pos)? as u64;
                Ok(PropertyValue::Double(f64::from_bits(bits)))
            }
            TAG_STRING => Ok(PropertyValue::String(decode_str(buf, pos)?)),
            TAG_LIST => {
                let count = decode_u32(buf, pos)? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(PropertyValue::decode(buf, pos)?);
                }
                Ok(PropertyValue::List(items))
            }
            TAG_MAP => {
                let count = decode_u32(buf, pos)? as usize;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = decode_str(buf, pos)?;
                    entries.insert(key, PropertyValue::decode(buf, pos)?);
                }
                Ok(PropertyValue::Map(entries))
            }
            TAG_DATE => {
                let days = decode_i32(buf, pos)?;
                NaiveDate::from_num_days_from_ce_opt(days)
                    .map(PropertyValue::Date)
                    .ok_or_else(|| StorageError::Corruption("date out of range".into()))
            }
            TAG_LOCAL_TIME => {
                let (secs, nanos) = (decode_u32(buf, pos)?, decode_u32(buf, pos)?);
                NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .map(PropertyValue::LocalTime)
                    .ok_or_else(|| StorageError::Corruption("time out of range".into()))
            }
            TAG_LOCAL_DATE_TIME => {
                let days = decode_i32(buf, pos)?;
                let (secs, nanos) = (decode_u32(buf, pos)?, decode_u32(buf, pos)?);
                let date = NaiveDate::from_num_days_from_ce_opt(days)
                    .ok_or_else(|| StorageError::Corruption("date out of range".into()))?;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                    .ok_or_else(|| StorageError::Corruption("time out of range".into()))?;
                Ok(PropertyValue::LocalDateTime(NaiveDateTime::new(date, time)))
            }
            TAG_DURATION => Ok(PropertyValue::Duration(chrono::Duration::microseconds(
                decode_i64(buf, pos)?,
            ))),
            _ => Err(StorageError::Corruption(format!(
                "unknown property value tag {tag}"
            ))),
        }
    }
}

pub(crate) fn encode_str(value: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

pub(crate) fn decode_str(buf: &[u8], pos: &mut usize) -> StorageResult<String> {
    let len = decode_u32(buf, pos)? as usize;
    let bytes = take(buf, pos, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StorageError::Corruption("invalid UTF-8 in encoded string".into()))
}

pub(crate) fn decode_u32(buf: &[u8], pos: &mut usize) -> StorageResult<u32> {
    let bytes = take(buf, pos, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn decode_i32(buf: &[u8], pos: &mut usize) -> StorageResult<i32> {
    Ok(decode_u32(buf, pos)? as i32)
}

pub(crate) fn decode_u64(buf: &[u8], pos: &mut usize) -> StorageResult<u64> {
    let bytes = take(buf, pos, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

pub(crate) fn decode_i64(buf: &[u8], pos: &mut usize) -> StorageResult<i64> {
    Ok(decode_u64(buf, pos)? as i64)
}

pub(crate) fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> StorageResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .ok_or_else(|| StorageError::Corruption("encoded length overflow".into()))?;
    if end > buf.len() {
        return Err(StorageError::Corruption("encoded value truncated".into()));
    }
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ternary_eq_null_is_unknown() {
        assert_eq!(PropertyValue::Null.ternary_eq(&PropertyValue::Int(1)), None);
        assert_eq!(PropertyValue::Null.ternary_eq(&PropertyValue::Null), None);
    }

    #[test]
    fn ternary_eq_numeric_cross_type() {
        assert_eq!(
            PropertyValue::Int(2).ternary_eq(&PropertyValue::Double(2.0)),
            Some(true)
        );
        assert_eq!(
            PropertyValue::Int(2).ternary_eq(&PropertyValue::String("2".into())),
            Some(false)
        );
    }

    #[test]
    fn ternary_eq_lists_propagate_unknown() {
        let a = PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Null]);
        let b = PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Null]);
        assert_eq!(a.ternary_eq(&b), None);
        let c = PropertyValue::List(vec![PropertyValue::Int(2), PropertyValue::Null]);
        assert_eq!(a.ternary_eq(&c), Some(false));
    }

    #[test]
    fn ordered_cmp_limited_to_numbers_and_strings() {
        assert_eq!(
            PropertyValue::Int(1).ternary_cmp(&PropertyValue::Double(1.5)),
            Ok(Some(Ordering::Less))
        );
        assert!(PropertyValue::Bool(true)
            .ternary_cmp(&PropertyValue::Int(1))
            .is_err());
        assert_eq!(PropertyValue::Null.ternary_cmp(&PropertyValue::Int(1)), Ok(None));
    }

    #[test]
    fn codec_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("k".to_owned(), PropertyValue::Double(2.5));
        let values = vec![
            PropertyValue::Null,
            PropertyValue::Bool(true),
            PropertyValue::Int(-42),
            PropertyValue::Double(1.25),
            PropertyValue::String("hello".into()),
            PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Null]),
            PropertyValue::Map(map),
            PropertyValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            PropertyValue::LocalTime(NaiveTime::from_hms_opt(23, 59, 1).unwrap()),
            PropertyValue::LocalDateTime(NaiveDateTime::new(
                NaiveDate::from_ymd_opt(1999, 12, 31).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            )),
            PropertyValue::Duration(chrono::Duration::microseconds(777)),
        ];
        for value in values {
            let mut buf = Vec::new();
            value.encode_into(&mut buf);
            let mut pos = 0;
            let decoded = PropertyValue::decode(&buf, &mut pos).unwrap();
            assert_eq!(pos, buf.len());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn index_order_ranks_types() {
        let mut values = vec![
            PropertyValue::String("a".into()),
            PropertyValue::Int(3),
            PropertyValue::Bool(false),
            PropertyValue::Double(2.5),
        ];
        values.sort_by(|a, b| a.index_cmp(b));
        assert_eq!(values[0], PropertyValue::Bool(false));
        assert_eq!(values[1], PropertyValue::Double(2.5));
        assert_eq!(values[2], PropertyValue::Int(3));
        assert_eq!(values[3], PropertyValue::String("a".into()));
    }
}
