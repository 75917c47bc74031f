//! Write-ahead log: one self-framed record per state delta.
//!
//! File layout: a magic prefix and format version, then a sequence of
//! records `{len, type, tx_id, payload, crc32}`. Label, edge-type and
//! property names travel as strings so a log is readable by any storage
//! instance; ids are re-interned on decode. A truncated or corrupt tail is
//! detected by the framing and discarded.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::delta::{Delta, ElementRef};
use crate::storage::Storage;
use crate::types::{EdgeTypeId, Gid, LabelId, PropertyId, TxId};

use super::codec::{self, ByteReader};

pub(crate) const WAL_MAGIC: [u8; 4] = *b"QVWL";
pub(crate) const WAL_VERSION: u16 = 1;

const REC_TXN_BEGIN: u8 = 1;
const REC_TXN_COMMIT: u8 = 2;
const REC_TXN_ABORT: u8 = 3;
const REC_CREATE_VERTEX: u8 = 4;
const REC_DELETE_VERTEX: u8 = 5;
const REC_ADD_LABEL: u8 = 6;
const REC_REMOVE_LABEL: u8 = 7;
const REC_SET_PROPERTY: u8 = 8;
const REC_REMOVE_PROPERTY: u8 = 9;
const REC_CREATE_EDGE: u8 = 10;
const REC_DELETE_EDGE: u8 = 11;
const REC_BUILD_LABEL_INDEX: u8 = 12;
const REC_DROP_LABEL_INDEX: u8 = 13;
const REC_BUILD_LABEL_PROPERTY_INDEX: u8 = 14;
const REC_DROP_LABEL_PROPERTY_INDEX: u8 = 15;
const REC_CREATE_EXISTENCE_CONSTRAINT: u8 = 16;
const REC_DROP_EXISTENCE_CONSTRAINT: u8 = 17;
const REC_CREATE_UNIQUENESS_CONSTRAINT: u8 = 18;
const REC_DROP_UNIQUENESS_CONSTRAINT: u8 = 19;

const ELEM_VERTEX: u8 = 0;
const ELEM_EDGE: u8 = 1;

/// One decoded WAL record.
#[derive(Debug, PartialEq)]
pub enum WalRecord {
    Begin,
    Commit,
    Abort,
    Delta(Delta),
}

fn element_tag(target: &ElementRef) -> (u8, Gid) {
    match target {
        ElementRef::Vertex(gid) => (ELEM_VERTEX, *gid),
        ElementRef::Edge(gid) => (ELEM_EDGE, *gid),
    }
}

fn encode_delta_payload(storage: &Storage, delta: &Delta, out: &mut Vec<u8>) -> u8 {
    match delta {
        Delta::CreateVertex { gid } => {
            codec::put_u64(out, gid.0);
            REC_CREATE_VERTEX
        }
        Delta::DeleteVertex { gid } => {
            codec::put_u64(out, gid.0);
            REC_DELETE_VERTEX
        }
        Delta::AddLabel { gid, label } => {
            codec::put_u64(out, gid.0);
            codec::put_str(out, &storage.labels.name_of(label.0));
            REC_ADD_LABEL
        }
        Delta::RemoveLabel { gid, label } => {
            codec::put_u64(out, gid.0);
            codec::put_str(out, &storage.labels.name_of(label.0));
            REC_REMOVE_LABEL
        }
        Delta::SetProperty {
            target,
            property,
            value,
        } => {
            let (tag, gid) = element_tag(target);
            codec::put_u8(out, tag);
            codec::put_u64(out, gid.0);
            codec::put_str(out, &storage.properties.name_of(property.0));
            codec::put_value(out, value);
            REC_SET_PROPERTY
        }
        Delta::RemoveProperty { target, property } => {
            let (tag, gid) = element_tag(target);
            codec::put_u8(out, tag);
            codec::put_u64(out, gid.0);
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_REMOVE_PROPERTY
        }
        Delta::CreateEdge {
            gid,
            from,
            to,
            edge_type,
        } => {
            codec::put_u64(out, gid.0);
            codec::put_u64(out, from.0);
            codec::put_u64(out, to.0);
            codec::put_str(out, &storage.edge_types.name_of(edge_type.0));
            REC_CREATE_EDGE
        }
        Delta::DeleteEdge { gid } => {
            codec::put_u64(out, gid.0);
            REC_DELETE_EDGE
        }
        Delta::BuildLabelIndex { label } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            REC_BUILD_LABEL_INDEX
        }
        Delta::DropLabelIndex { label } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            REC_DROP_LABEL_INDEX
        }
        Delta::BuildLabelPropertyIndex { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_BUILD_LABEL_PROPERTY_INDEX
        }
        Delta::DropLabelPropertyIndex { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_DROP_LABEL_PROPERTY_INDEX
        }
        Delta::CreateExistenceConstraint { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_CREATE_EXISTENCE_CONSTRAINT
        }
        Delta::DropExistenceConstraint { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_DROP_EXISTENCE_CONSTRAINT
        }
        Delta::CreateUniquenessConstraint { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_CREATE_UNIQUENESS_CONSTRAINT
        }
        Delta::DropUniquenessConstraint { label, property } => {
            codec::put_str(out, &storage.labels.name_of(label.0));
            codec::put_str(out, &storage.properties.name_of(property.0));
            REC_DROP_UNIQUENESS_CONSTRAINT
        }
    }
}

/// Appends one framed record: `{len, type, tx_id, payload, crc32}` with the
/// crc covering type, tx id and payload.
fn put_record(out: &mut Vec<u8>, kind: u8, tx_id: TxId, payload: &[u8]) {
    let body_len = 1 + 8 + payload.len();
    codec::put_u32(out, body_len as u32);
    let body_start = out.len();
    codec::put_u8(out, kind);
    codec::put_u64(out, tx_id.0);
    out.extend_from_slice(payload);
    let crc = codec::crc_of(&out[body_start..]);
    codec::put_u32(out, crc);
}

/// Encodes a committed transaction as its WAL record stream:
/// `TxnBegin`, one record per delta, `TxnCommit`. The same bytes feed the
/// replication stream.
pub(crate) fn encode_transaction(storage: &Storage, tx_id: TxId, deltas: &[Delta]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + deltas.len() * 32);
    put_record(&mut out, REC_TXN_BEGIN, tx_id, &[]);
    let mut payload = Vec::new();
    for delta in deltas {
        payload.clear();
        let kind = encode_delta_payload(storage, delta, &mut payload);
        put_record(&mut out, kind, tx_id, &payload);
    }
    put_record(&mut out, REC_TXN_COMMIT, tx_id, &[]);
    out
}

fn decode_delta(kind: u8, storage: &Storage, reader: &mut ByteReader<'_>) -> StorageResult<Delta> {
    let delta = match kind {
        REC_CREATE_VERTEX => Delta::CreateVertex {
            gid: Gid(reader.get_u64()?),
        },
        REC_DELETE_VERTEX => Delta::DeleteVertex {
            gid: Gid(reader.get_u64()?),
        },
        REC_ADD_LABEL => Delta::AddLabel {
            gid: Gid(reader.get_u64()?),
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
        },
        REC_REMOVE_LABEL => Delta::RemoveLabel {
            gid: Gid(reader.get_u64()?),
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
        },
        REC_SET_PROPERTY => {
            let tag = reader.get_u8()?;
            let gid = Gid(reader.get_u64()?);
            let property = PropertyId(storage.properties.intern(&reader.get_str()?));
            let value = reader.get_value()?;
            Delta::SetProperty {
                target: decode_element(tag, gid)?,
                property,
                value,
            }
        }
        REC_REMOVE_PROPERTY => {
            let tag = reader.get_u8()?;
            let gid = Gid(reader.get_u64()?);
            let property = PropertyId(storage.properties.intern(&reader.get_str()?));
            Delta::RemoveProperty {
                target: decode_element(tag, gid)?,
                property,
            }
        }
        REC_CREATE_EDGE => Delta::CreateEdge {
            gid: Gid(reader.get_u64()?),
            from: Gid(reader.get_u64()?),
            to: Gid(reader.get_u64()?),
            edge_type: EdgeTypeId(storage.edge_types.intern(&reader.get_str()?)),
        },
        REC_DELETE_EDGE => Delta::DeleteEdge {
            gid: Gid(reader.get_u64()?),
        },
        REC_BUILD_LABEL_INDEX => Delta::BuildLabelIndex {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
        },
        REC_DROP_LABEL_INDEX => Delta::DropLabelIndex {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
        },
        REC_BUILD_LABEL_PROPERTY_INDEX => Delta::BuildLabelPropertyIndex {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        REC_DROP_LABEL_PROPERTY_INDEX => Delta::DropLabelPropertyIndex {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        REC_CREATE_EXISTENCE_CONSTRAINT => Delta::CreateExistenceConstraint {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        REC_DROP_EXISTENCE_CONSTRAINT => Delta::DropExistenceConstraint {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        REC_CREATE_UNIQUENESS_CONSTRAINT => Delta::CreateUniquenessConstraint {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        REC_DROP_UNIQUENESS_CONSTRAINT => Delta::DropUniquenessConstraint {
            label: LabelId(storage.labels.intern(&reader.get_str()?)),
            property: PropertyId(storage.properties.intern(&reader.get_str()?)),
        },
        other => {
            return Err(StorageError::Corruption(format!(
                "unknown WAL record type {other}"
            )))
        }
    };
    Ok(delta)
}

fn decode_element(tag: u8, gid: Gid) -> StorageResult<ElementRef> {
    match tag {
        ELEM_VERTEX => Ok(ElementRef::Vertex(gid)),
        ELEM_EDGE => Ok(ElementRef::Edge(gid)),
        _ => Err(StorageError::Corruption("unknown element tag".into())),
    }
}

/// Decodes the next record, or `None` at a clean end of stream. A partial
/// or corrupt record raises `Corruption`; callers treat it as the log tail.
pub(crate) fn decode_record(
    reader: &mut ByteReader<'_>,
    storage: &Storage,
) -> StorageResult<Option<(TxId, WalRecord)>> {
    if reader.is_empty() {
        return Ok(None);
    }
    let body_len = reader.get_u32()? as usize;
    if body_len < 1 + 8 {
        return Err(StorageError::Corruption("WAL record too short".into()));
    }
    let body = reader.take(body_len)?;
    let crc = reader.get_u32()?;
    if codec::crc_of(body) != crc {
        return Err(StorageError::Corruption("WAL record checksum mismatch".into()));
    }
    let mut body_reader = ByteReader::new(body);
    let kind = body_reader.get_u8()?;
    let tx_id = TxId(body_reader.get_u64()?);
    let record = match kind {
        REC_TXN_BEGIN => WalRecord::Begin,
        REC_TXN_COMMIT => WalRecord::Commit,
        REC_TXN_ABORT => WalRecord::Abort,
        other => WalRecord::Delta(decode_delta(other, storage, &mut body_reader)?),
    };
    Ok(Some((tx_id, record)))
}

/// Reads a WAL file, stopping at (and discarding) a corrupt or truncated
/// tail.
pub(crate) fn read_wal_file(
    path: &std::path::Path,
    storage: &Storage,
) -> StorageResult<Vec<(TxId, WalRecord)>> {
    let bytes = std::fs::read(path)?;
    let mut reader = ByteReader::new(&bytes);
    reader.expect_magic(&WAL_MAGIC, "WAL")?;
    let version = reader.get_u16()?;
    if version != WAL_VERSION {
        return Err(StorageError::Corruption(format!(
            "unsupported WAL version {version}"
        )));
    }
    let mut records = Vec::new();
    loop {
        match decode_record(&mut reader, storage) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding partial WAL tail");
                break;
            }
        }
    }
    Ok(records)
}

struct ActiveWal {
    file: File,
    path: PathBuf,
    created_at: u64,
    bytes: u64,
    records: u64,
    max_tx: u64,
}

/// Appends committed transactions to the active WAL file, rotating by size
/// or record count. The filename of a sealed file encodes the highest
/// transaction id it contains.
#[derive(Debug)]
pub struct WalWriter {
    dir: PathBuf,
    size_limit: u64,
    delta_limit: u64,
    current: Option<ActiveWal>,
}

impl std::fmt::Debug for ActiveWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWal")
            .field("path", &self.path)
            .field("records", &self.records)
            .finish()
    }
}

impl WalWriter {
    pub fn open(dir: PathBuf, size_limit: u64, delta_limit: u64) -> StorageResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            size_limit,
            delta_limit,
            current: None,
        })
    }

    /// Writes the transaction's record stream and syncs it to disk; commit
    /// acknowledgement depends on this returning.
    pub fn append_transaction(
        &mut self,
        storage: &Storage,
        tx_id: TxId,
        deltas: &[Delta],
    ) -> StorageResult<()> {
        let encoded = encode_transaction(storage, tx_id, deltas);
        if self.current.is_none() {
            self.start_file()?;
        }
        let active = self
            .current
            .as_mut()
            .ok_or_else(|| StorageError::Corruption("WAL writer has no active file".into()))?;
        active.file.write_all(&encoded)?;
        active.file.sync_data()?;
        active.bytes += encoded.len() as u64;
        active.records += deltas.len() as u64 + 2;
        active.max_tx = active.max_tx.max(tx_id.0);
        if active.bytes >= self.size_limit || active.records >= self.delta_limit {
            self.seal()?;
        }
        Ok(())
    }

    fn start_file(&mut self) -> StorageResult<()> {
        let mut created_at = super::unix_timestamp();
        // A restart within the same second must not truncate the previous
        // run's active file.
        while self.dir.join(super::wal_current_name(created_at)).exists() {
            created_at += 1;
        }
        let path = self.dir.join(super::wal_current_name(created_at));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        let mut header = Vec::with_capacity(6);
        header.extend_from_slice(&WAL_MAGIC);
        codec::put_u16(&mut header, WAL_VERSION);
        file.write_all(&header)?;
        file.sync_data()?;
        debug!(path = %path.display(), "started WAL file");
        self.current = Some(ActiveWal {
            file,
            path,
            created_at,
            bytes: header.len() as u64,
            records: 0,
            max_tx: 0,
        });
        Ok(())
    }

    /// Seals the active file, renaming it so its name carries the highest
    /// transaction id it holds.
    pub fn seal(&mut self) -> StorageResult<()> {
        let Some(active) = self.current.take() else {
            return Ok(());
        };
        active.file.sync_all()?;
        drop(active.file);
        let sealed = self
            .dir
            .join(super::wal_file_name(active.created_at, active.max_tx));
        std::fs::rename(&active.path, &sealed)?;
        debug!(path = %sealed.display(), records = active.records, "sealed WAL file");
        Ok(())
    }
}
