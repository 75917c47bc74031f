//! Durable key-value store for authentication data and engine metadata,
//! kept under `<data_dir>/auth/`. Unrelated to the graph itself: consumers
//! read and write opaque string pairs.
//!
//! Writes rewrite the whole image to a temporary file and rename it into
//! place, with a crc32 trailer to reject torn files on load.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use crate::durability::codec::{self, ByteReader};
use crate::error::{StorageError, StorageResult};

const KV_MAGIC: [u8; 4] = *b"QVKV";
const KV_FILE: &str = "kvstore";

#[derive(Debug)]
pub struct KvStore {
    dir: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl KvStore {
    /// Opens the store, loading the existing image when present. A corrupt
    /// image is treated as empty rather than failing bring-up.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(KV_FILE);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match Self::decode(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding corrupt key-value image");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            dir,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> StorageResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.into(), value.into());
        self.persist(&entries)
    }

    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(key).is_some();
        if removed {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let mut out = Vec::new();
        out.extend_from_slice(&KV_MAGIC);
        codec::put_u32(&mut out, entries.len() as u32);
        for (key, value) in entries {
            codec::put_str(&mut out, key);
            codec::put_str(&mut out, value);
        }
        let crc = codec::crc_of(&out);
        codec::put_u32(&mut out, crc);
        let tmp = self.dir.join(format!("{KV_FILE}.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.dir.join(KV_FILE))?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> StorageResult<BTreeMap<String, String>> {
        if bytes.len() < 12 {
            return Err(StorageError::Corruption("key-value image too small".into()));
        }
        let body_end = bytes.len() - 4;
        let mut tail = ByteReader::new(&bytes[body_end..]);
        if codec::crc_of(&bytes[..body_end]) != tail.get_u32()? {
            return Err(StorageError::Corruption("key-value image hash mismatch".into()));
        }
        let mut reader = ByteReader::new(&bytes[..body_end]);
        reader.expect_magic(&KV_MAGIC, "key-value store")?;
        let count = reader.get_u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = reader.get_str()?;
            let value = reader.get_str()?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_across_reopen() -> StorageResult<()> {
        let dir = tempfile::tempdir()?;
        {
            let store = KvStore::open(dir.path())?;
            store.put("user:admin", "hash:abc")?;
            store.put("version", "1")?;
            assert!(store.delete("version")?);
            assert!(!store.delete("missing")?);
        }
        let store = KvStore::open(dir.path())?;
        assert_eq!(store.get("user:admin").as_deref(), Some("hash:abc"));
        assert_eq!(store.get("version"), None);
        assert_eq!(store.keys(), vec!["user:admin".to_owned()]);
        Ok(())
    }
}
