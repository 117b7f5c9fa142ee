//! Append-only log engine.
//!
//! Every successful mutation enqueues `{database index, command line}`
//! onto a bounded queue consumed by one dedicated writer thread — the
//! only code that touches the log file on the live path. The queue is a
//! `sync_channel`, so producers block when it fills: a slow log
//! throttles clients instead of dropping records.
//!
//! The writer runs on a plain OS thread rather than a tokio task
//! because it does blocking file I/O record by record.
//!
//! Whenever a record's target database differs from the previously
//! written record's, the writer first emits a synthetic `SELECT` so a
//! replay selects along the same path. The mutex around the log file
//! doubles as the pausing lock: rewrite holds it across the snapshot
//! and swap boundaries, and the writer takes it per record, so no
//! record can interleave with either boundary.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use cinder_protocol::{cmd_line, CmdLine, Reply};
use cinder_persistence::log::{self, LogReader, LogWriter};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cmd::CommandTable;
use crate::commands::entity_to_cmd;
use crate::conn::{Connection, VirtualConnection};
use crate::router::Router;

/// Queue capacity. Producers block once this many records are pending.
const QUEUE_CAPACITY: usize = 1 << 16;

struct Record {
    db_index: usize,
    line: CmdLine,
}

/// The log file plus the database index of the last written record.
/// Guarded by the pausing mutex.
struct LogState {
    writer: LogWriter,
    current_db: usize,
}

/// The append-only log engine.
pub struct Aof {
    path: PathBuf,
    tx: Mutex<Option<SyncSender<Record>>>,
    done: Mutex<Option<Receiver<()>>>,
    state: Arc<Mutex<LogState>>,
}

/// The synthetic database-select record.
fn select_record(index: usize) -> Reply {
    Reply::from_cmd_line(cmd_line(&["SELECT", &index.to_string()]))
}

impl Aof {
    /// Opens the log and starts the writer thread.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Aof> {
        let path = path.into();
        let writer = LogWriter::open(&path)?;
        let state = Arc::new(Mutex::new(LogState {
            writer,
            current_db: 0,
        }));

        let (tx, rx) = sync_channel::<Record>(QUEUE_CAPACITY);
        let (done_tx, done_rx) = channel::<()>();
        let writer_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("cinder-aof".into())
            .spawn(move || {
                write_loop(rx, writer_state);
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            path,
            tx: Mutex::new(Some(tx)),
            done: Mutex::new(Some(done_rx)),
            state,
        })
    }

    /// Enqueues one record. Blocks while the queue is full; drops the
    /// record only if the engine has already been closed.
    pub fn append(&self, db_index: usize, line: CmdLine) {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(Record { db_index, line });
        }
    }

    /// Stops accepting records, drains the queue, waits for the writer
    /// to finish its last write, and syncs the file. No enqueued record
    /// is lost.
    pub fn close(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        if let Some(done) = self.done.lock().take() {
            let _ = done.recv();
        }
        let mut st = self.state.lock();
        if let Err(e) = st.writer.sync() {
            warn!("log sync on close failed: {e}");
        }
        info!("append-only log closed");
    }

    /// Replays the log into `router`, optionally bounded to the first
    /// `max_bytes` of the file. Individual bad records are logged and
    /// skipped; only end-of-stream stops the replay.
    pub fn load(&self, router: &Router, max_bytes: Option<u64>) {
        let reader = match LogReader::open(&self.path, max_bytes) {
            Ok(Some(reader)) => reader,
            Ok(None) => return,
            Err(e) => {
                warn!("cannot open log for replay: {e}");
                return;
            }
        };
        replay(reader, router);
    }

    /// Compacts the log: replays the current contents into a fresh
    /// embedded router, writes that state out as a minimal log, splices
    /// in whatever the live writer appended meanwhile, and atomically
    /// swaps the result in for the old file.
    pub fn rewrite(&self, table: Arc<CommandTable>, databases: usize) -> io::Result<()> {
        // snapshot boundary: flush and measure under the pausing lock
        let (snapshot_len, snapshot_db) = {
            let mut st = self.state.lock();
            st.writer.sync()?;
            (st.writer.len()?, st.current_db)
        };

        // rebuild state from the snapshot prefix; the live writer keeps
        // appending behind the boundary while this runs
        let scratch = Router::embedded(table, databases);
        match LogReader::open(&self.path, Some(snapshot_len)) {
            Ok(Some(reader)) => {
                replay(reader, &scratch);
            }
            Ok(None) => {}
            Err(e) => return Err(e),
        }

        // dump the scratch state as a brand-new minimal log
        let rewrite_path = rewrite_path(&self.path);
        match std::fs::remove_file(&rewrite_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        {
            let mut out = LogWriter::open(&rewrite_path)?;
            for db in scratch.databases() {
                if db.key_count() == 0 {
                    continue;
                }
                out.append(&select_record(db.index()))?;
                let mut io_err: Option<io::Error> = None;
                db.for_each(|key, value, expiry| {
                    if let Err(e) = out.append(&Reply::from_cmd_line(entity_to_cmd(key, value))) {
                        io_err = Some(e);
                        return false;
                    }
                    if let Some(at) = expiry {
                        let line = cmd_line(&["PEXPIREAT", key, &at.to_string()]);
                        if let Err(e) = out.append(&Reply::from_cmd_line(line)) {
                            io_err = Some(e);
                            return false;
                        }
                    }
                    true
                });
                if let Some(e) = io_err {
                    return Err(e);
                }
            }
            // tail records were written with this database selected
            out.append(&select_record(snapshot_db))?;
            out.sync()?;
        }

        // splice the live tail and swap, with the writer paused
        {
            let mut st = self.state.lock();
            st.writer.sync()?;

            let mut tail_dst = std::fs::OpenOptions::new()
                .append(true)
                .open(&rewrite_path)?;
            let copied = log::copy_from_offset(&self.path, snapshot_len, &mut tail_dst)?;
            tail_dst.sync_all()?;
            drop(tail_dst);

            log::swap_in(&rewrite_path, &self.path)?;

            // reopen on the new file and re-anchor the selected database
            st.writer = LogWriter::open(&self.path)?;
            let current = st.current_db;
            st.writer.append(&select_record(current))?;
            st.writer.sync()?;
            debug!(tail_bytes = copied, "live tail carried into rewritten log");
        }

        info!("append-only log rewritten");
        Ok(())
    }

    /// Current size of the log file.
    pub fn len(&self) -> io::Result<u64> {
        self.state.lock().writer.len()
    }
}

fn rewrite_path(live: &Path) -> PathBuf {
    let mut name = live.file_name().unwrap_or_default().to_os_string();
    name.push(".rewrite");
    live.with_file_name(name)
}

fn write_loop(rx: Receiver<Record>, state: Arc<Mutex<LogState>>) {
    while let Ok(record) = rx.recv() {
        let mut st = state.lock();
        if record.db_index != st.current_db {
            if let Err(e) = st.writer.append(&select_record(record.db_index)) {
                warn!("log select write failed, dropping record: {e}");
                continue;
            }
            st.current_db = record.db_index;
        }
        if let Err(e) = st.writer.append(&Reply::from_cmd_line(record.line)) {
            // one lost record must not take the writer down
            warn!("log write failed, record dropped: {e}");
        }
    }
}

/// Drives a reader's records through a router behind a bare virtual
/// connection (it carries nothing but the selected-database field).
/// Returns the byte offset of the last complete record consumed.
fn replay(mut reader: LogReader, router: &Router) -> u64 {
    let conn: Arc<dyn Connection> = Arc::new(VirtualConnection::new());
    let mut applied = 0u64;
    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                let Some(line) = record.into_cmd_line() else {
                    warn!("log record is not a command array, skipping");
                    continue;
                };
                if let Reply::Error(msg) = router.exec(&conn, &line) {
                    warn!(%msg, "log record failed to apply, skipping");
                }
                applied += 1;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("log replay stopped on corrupt record: {e}");
                break;
            }
        }
    }
    debug!(records = applied, "log replay finished");
    reader.offset()
}
