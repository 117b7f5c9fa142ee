//! Sequential command-log reader and writer.
//!
//! Records are serialized RESP arrays, written strictly append-only.
//! The reader streams records back in write order and reports the byte
//! offset it has consumed, which the rewrite path uses to split the log
//! into a compacted prefix and a live tail.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cinder_protocol::{ProtocolError, Reply};
use thiserror::Error;
use tracing::warn;

/// Read granularity for the replay reader.
const READ_CHUNK: usize = 64 * 1024;

/// Errors produced by log I/O.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt log record: {0}")]
    Corrupt(#[from] ProtocolError),
}

/// Appends RESP-encoded command records to the log file.
pub struct LogWriter {
    file: File,
    path: PathBuf,
}

impl LogWriter {
    /// Opens (or creates) the log in append mode.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Appends one serialized record. The bytes of a record are written
    /// in a single `write_all`, so a crash can truncate the tail record
    /// but never interleave two records.
    pub fn append(&mut self, record: &Reply) -> io::Result<()> {
        self.file.write_all(&record.to_bytes())
    }

    /// Flushes file contents to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Current size of the log in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns `true` when the log holds no records.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Streams records out of a log file in write order.
///
/// When `max_bytes` is set, the reader never consumes past that prefix —
/// the rewrite path uses this to replay exactly the snapshot it measured
/// while new records keep arriving behind it.
pub struct LogReader {
    file: File,
    buf: Vec<u8>,
    pos: usize,
    fetched: u64,
    limit: Option<u64>,
    consumed: u64,
    exhausted: bool,
}

impl LogReader {
    /// Opens the log for replay. A missing file is not an error — it is
    /// an empty log (first startup).
    pub fn open(path: impl AsRef<Path>, max_bytes: Option<u64>) -> io::Result<Option<Self>> {
        let file = match File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Self {
            file,
            buf: Vec::new(),
            pos: 0,
            fetched: 0,
            limit: max_bytes,
            consumed: 0,
            exhausted: false,
        }))
    }

    /// Bytes consumed by the records returned so far. After the reader
    /// reports end-of-stream this is the clean prefix length.
    pub fn offset(&self) -> u64 {
        self.consumed
    }

    /// Returns the next record, or `None` at end-of-stream.
    ///
    /// A truncated record at the tail (the process died mid-append) is
    /// treated as end-of-stream, not an error. Structural corruption
    /// before the tail surfaces as `Corrupt`.
    pub fn next_record(&mut self) -> Result<Option<Reply>, PersistenceError> {
        loop {
            match cinder_protocol::parse_reply(&self.buf[self.pos..]) {
                Ok(Some((record, n))) => {
                    self.pos += n;
                    self.consumed += n as u64;
                    return Ok(Some(record));
                }
                Ok(None) => {
                    if !self.fill()? {
                        // no more file data. a partial frame left in the
                        // buffer is a torn tail write.
                        if self.pos < self.buf.len() {
                            warn!(
                                offset = self.consumed,
                                "log ends with a truncated record, ignoring tail"
                            );
                        }
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads another chunk from the file, honoring the byte bound.
    /// Returns `false` once the file (or the bound) is exhausted.
    fn fill(&mut self) -> io::Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let want = match self.limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(self.fetched);
                (remaining as usize).min(READ_CHUNK)
            }
            None => READ_CHUNK,
        };
        if want == 0 {
            self.exhausted = true;
            return Ok(false);
        }

        // compact the already-consumed prefix before growing
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let start = self.buf.len();
        self.buf.resize(start + want, 0);
        let n = self.file.read(&mut self.buf[start..])?;
        self.buf.truncate(start + n);
        if n == 0 {
            self.exhausted = true;
            return Ok(false);
        }
        self.fetched += n as u64;
        Ok(true)
    }
}

/// Copies everything from `offset` to the end of `src` into `dst`.
/// Returns the number of bytes copied. Used by rewrite to carry the
/// live tail over into the compacted log.
pub fn copy_from_offset(src: &Path, offset: u64, dst: &mut impl Write) -> io::Result<u64> {
    let mut file = File::open(src)?;
    file.seek(SeekFrom::Start(offset))?;
    io::copy(&mut file, dst)
}

/// Atomically replaces the live log with the freshly written one.
pub fn swap_in(tmp: &Path, live: &Path) -> io::Result<()> {
    std::fs::rename(tmp, live)
}
