//! Record type - the unit appended to the file store's log

use crate::model::Hash;
use crate::store::Batch;
use serde::{Deserialize, Serialize};

/// Type tag for records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// One atomic batch of writes
    Batch,
    /// The full contents of the store, written by compaction
    Snapshot,
}

impl RecordKind {
    pub fn as_byte(&self) -> u8 {
        match self {
            RecordKind::Batch => 0,
            RecordKind::Snapshot => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordKind::Batch),
            1 => Some(RecordKind::Snapshot),
            _ => None,
        }
    }
}

/// A typed, compressed chunk of the log
#[derive(Clone, Debug)]
pub struct Record {
    pub kind: RecordKind,
    /// The batch, uncompressed
    pub batch: Batch,
}

impl Record {
    pub fn new(kind: RecordKind, batch: Batch) -> Self {
        Record { kind, batch }
    }

    /// Serialize and compress for storage: type byte followed by zstd data
    pub fn compress(&self) -> crate::Result<Vec<u8>> {
        let data = bincode::serialize(&self.batch)?;
        let mut output = vec![self.kind.as_byte()];
        output.extend(zstd::encode_all(data.as_slice(), 3)?);
        Ok(output)
    }

    /// Decompress a record payload produced by [`Record::compress`]
    pub fn decompress(data: &[u8]) -> crate::Result<Self> {
        let (&kind, compressed) = data
            .split_first()
            .ok_or_else(|| crate::Error::InvalidFile("empty record".into()))?;
        let kind = RecordKind::from_byte(kind)
            .ok_or_else(|| crate::Error::InvalidFile(format!("invalid record type: {kind}")))?;

        let data = zstd::decode_all(compressed)?;
        Ok(Record {
            kind,
            batch: bincode::deserialize(&data)?,
        })
    }

    /// Checksum over a compressed payload, including its type byte
    pub fn checksum(payload: &[u8]) -> Hash {
        Hash::digest(payload)
    }
}
