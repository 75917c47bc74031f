//! Buffer primitives shared by the WAL, snapshot and replication encodings.
//! Every durable artifact is framed with a crc32 over its payload.

use crate::error::{StorageError, StorageResult};
use crate::value::{self, PropertyValue};

pub fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_str(out: &mut Vec<u8>, value: &str) {
    value::encode_str(value, out);
}

pub fn put_value(out: &mut Vec<u8>, value: &PropertyValue) {
    value.encode_into(out);
}

/// Cursor over an in-memory buffer with bounds-checked reads.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        value::take(self.buf, &mut self.pos, len)
    }

    pub fn get_u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> StorageResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> StorageResult<u32> {
        value::decode_u32(self.buf, &mut self.pos)
    }

    pub fn get_u64(&mut self) -> StorageResult<u64> {
        value::decode_u64(self.buf, &mut self.pos)
    }

    pub fn get_str(&mut self) -> StorageResult<String> {
        value::decode_str(self.buf, &mut self.pos)
    }

    pub fn get_value(&mut self) -> StorageResult<PropertyValue> {
        PropertyValue::decode(self.buf, &mut self.pos)
    }

    pub fn expect_magic(&mut self, magic: &[u8; 4], what: &str) -> StorageResult<()> {
        let bytes = self.take(4)?;
        if bytes != magic {
            return Err(StorageError::Corruption(format!("bad {what} magic")));
        }
        Ok(())
    }
}
