//! Single-file store with an append-only log of atomic batches
//!
//! File format:
//! ```text
//! [HEADER: 16 bytes]
//!   - magic: 8 bytes ("IAVL_DB\0")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!
//! [RECORDS: variable]
//!   - length: 4 bytes (u32 LE)
//!   - checksum: 32 bytes (SHA-256 of the payload)
//!   - payload: `length` bytes (see `Record::compress`)
//! ```
//!
//! The whole log is replayed into memory on open. A frame that runs past the
//! end of the file is the tail of an interrupted write; it is discarded and the
//! file truncated, so every batch is either fully present or absent. A complete
//! frame that fails its checksum or does not decode is corruption: open fails
//! with [`Error::InvalidFile`] and the file is left untouched.

use super::record::{Record, RecordKind};
use super::{Batch, BatchOp, KvStore};
use crate::model::HASH_LEN;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HEADER_SIZE: u64 = 16;
const FRAME_HEADER: usize = 4 + HASH_LEN;

/// Outcome of reading one frame from the log
enum Frame {
    Complete(Record, usize),
    /// Runs past the end of the file
    Incomplete,
    Corrupt(&'static str),
}

/// Open file plus the offset where the next record goes
struct LogFile {
    file: File,
    write_offset: u64,
}

/// A [`KvStore`] persisted to a single file
pub struct FileStore {
    /// Path to the database file
    path: PathBuf,
    log: RwLock<LogFile>,
    /// Replayed contents
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// fsync after every batch
    sync_on_write: bool,
}

impl FileStore {
    /// Create a new database file, replacing any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::write_new_file(&path, None)?;

        Ok(FileStore {
            path,
            log: RwLock::new(LogFile {
                file,
                write_offset: HEADER_SIZE,
            }),
            entries: RwLock::new(BTreeMap::new()),
            sync_on_write: true,
        })
    }

    /// Open an existing database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::InvalidFile("truncated header".into()))?;
        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&header[8..12]);
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let mut log = Vec::new();
        file.read_to_end(&mut log)?;

        let mut entries = BTreeMap::new();
        let mut pos = 0usize;
        let mut records = 0usize;
        while pos < log.len() {
            match Self::read_frame(&log[pos..]) {
                Frame::Complete(record, used) => {
                    apply(&mut entries, record);
                    pos += used;
                    records += 1;
                }
                Frame::Incomplete => {
                    warn!(
                        path = %path.display(),
                        offset = HEADER_SIZE + pos as u64,
                        discarded = log.len() - pos,
                        "discarding incomplete tail record"
                    );
                    break;
                }
                Frame::Corrupt(reason) => {
                    return Err(Error::InvalidFile(format!(
                        "corrupt record at offset {}: {}",
                        HEADER_SIZE + pos as u64,
                        reason
                    )));
                }
            }
        }

        let write_offset = HEADER_SIZE + pos as u64;
        if pos < log.len() {
            file.set_len(write_offset)?;
        }
        info!(path = %path.display(), records, entries = entries.len(), "opened file store");

        Ok(FileStore {
            path,
            log: RwLock::new(LogFile { file, write_offset }),
            entries: RwLock::new(entries),
            sync_on_write: true,
        })
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Choose whether every batch is fsynced before `write` returns
    pub fn with_sync(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log as a single snapshot record of the live entries
    pub fn compact(&self) -> Result<()> {
        let mut log = self.log.write();
        let entries = self.entries.read();

        let mut batch = Batch::new();
        for (key, value) in entries.iter() {
            batch.set(key.clone(), value.clone());
        }
        let frame = Self::frame(&Record::new(RecordKind::Snapshot, batch))?;

        let tmp = self.path.with_extension("compact");
        let file = Self::write_new_file(&tmp, Some(&frame))?;
        std::fs::rename(&tmp, &self.path)?;

        log.file = file;
        log.write_offset = HEADER_SIZE + frame.len() as u64;
        info!(path = %self.path.display(), entries = entries.len(), "compacted file store");
        Ok(())
    }

    fn write_new_file(path: &Path, body: Option<&[u8]>) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        if let Some(body) = body {
            file.write_all(body)?;
        }
        file.sync_all()?;
        Ok(file)
    }

    fn frame(record: &Record) -> Result<Vec<u8>> {
        let payload = record.compress()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::InvalidFile("record larger than 4 GiB".into()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(Record::checksum(&payload).as_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Parse one frame from the start of `buf`
    fn read_frame(buf: &[u8]) -> Frame {
        let Some(header) = buf.get(0..FRAME_HEADER) else {
            return Frame::Incomplete;
        };
        let mut len = [0u8; 4];
        len.copy_from_slice(&header[0..4]);
        let len = u32::from_le_bytes(len) as usize;
        let Some(payload) = buf.get(FRAME_HEADER..FRAME_HEADER + len) else {
            return Frame::Incomplete;
        };
        if Record::checksum(payload).as_bytes()[..] != header[4..] {
            return Frame::Corrupt("checksum mismatch");
        }
        match Record::decompress(payload) {
            Ok(record) => Frame::Complete(record, FRAME_HEADER + len),
            Err(_) => Frame::Corrupt("undecodable payload"),
        }
    }
}

fn apply(entries: &mut BTreeMap<Vec<u8>, Vec<u8>>, record: Record) {
    if record.kind == RecordKind::Snapshot {
        entries.clear();
    }
    for op in record.batch.into_ops() {
        match op {
            BatchOp::Set { key, value } => {
                entries.insert(key, value);
            }
            BatchOp::Delete { key } => {
                entries.remove(&key);
            }
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, batch: Batch) -> Result<()> {
        let record = Record::new(RecordKind::Batch, batch);
        let frame = Self::frame(&record)?;

        {
            let mut log = self.log.write();
            let offset = log.write_offset;

            let written = log
                .file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| log.file.write_all(&frame))
                .and_then(|_| {
                    if self.sync_on_write {
                        log.file.sync_data()
                    } else {
                        Ok(())
                    }
                });
            if let Err(e) = written {
                // drop whatever part of the frame reached the file
                let _ = log.file.set_len(offset);
                return Err(e.into());
            }

            log.write_offset = offset + frame.len() as u64;
            debug!(offset, bytes = frame.len(), ops = record.batch.len(), "appended batch");
            apply(&mut self.entries.write(), record);
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn sync(&self) -> Result<()> {
        self.log.write().file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.log.get_mut().file.sync_all();
    }
}
