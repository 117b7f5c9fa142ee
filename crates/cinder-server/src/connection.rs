//! Per-client session: socket I/O plus the engine's connection
//! capability trait.
//!
//! Each accepted socket gets one read task (this module's `handle`)
//! and one writer task. All outbound traffic — command replies and
//! pub/sub pushes alike — funnels through a single channel into the
//! writer, which keeps the byte stream well-ordered without holding a
//! lock across socket writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashSet;
use bytes::{Buf, BytesMut};
use cinder_core::{Connection, Router};
use cinder_protocol::{parse_reply, CmdLine, Reply};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read buffer granularity.
const READ_CHUNK: usize = 4 * 1024;

#[derive(Default)]
struct SessionState {
    db: usize,
    password: String,
    subs: AHashSet<String>,
    multi: bool,
    queue: Vec<CmdLine>,
    watching: Vec<(String, u32)>,
}

/// A live TCP client session.
pub struct ClientConnection {
    id: u64,
    state: Mutex<SessionState>,
    out: mpsc::UnboundedSender<Reply>,
    closed: AtomicBool,
}

impl ClientConnection {
    fn new(out: mpsc::UnboundedSender<Reply>) -> Self {
        Self {
            id: cinder_core::conn::next_conn_id(),
            state: Mutex::new(SessionState::default()),
            out,
            closed: AtomicBool::new(false),
        }
    }
}

impl Connection for ClientConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, reply: &Reply) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if self.out.send(reply.clone()).is_err() {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn selected_db(&self) -> usize {
        self.state.lock().db
    }

    fn select_db(&self, index: usize) {
        self.state.lock().db = index;
    }

    fn set_password(&self, password: &str) {
        self.state.lock().password = password.to_string();
    }

    fn password(&self) -> String {
        self.state.lock().password.clone()
    }

    fn subscribe(&self, channel: &str) {
        self.state.lock().subs.insert(channel.to_string());
    }

    fn unsubscribe(&self, channel: &str) {
        self.state.lock().subs.remove(channel);
    }

    fn subs_count(&self) -> usize {
        self.state.lock().subs.len()
    }

    fn channels(&self) -> Vec<String> {
        self.state.lock().subs.iter().cloned().collect()
    }

    fn in_multi(&self) -> bool {
        self.state.lock().multi
    }

    fn set_multi(&self, active: bool) {
        let mut state = self.state.lock();
        state.multi = active;
        if !active {
            state.queue.clear();
            state.watching.clear();
        }
    }

    fn enqueue_cmd(&self, line: CmdLine) {
        self.state.lock().queue.push(line);
    }

    fn queued_cmds(&self) -> Vec<CmdLine> {
        self.state.lock().queue.clone()
    }

    fn watch_key(&self, key: &str, version: u32) {
        let mut state = self.state.lock();
        if !state.watching.iter().any(|(k, _)| k == key) {
            state.watching.push((key.to_string(), version));
        }
    }

    fn watching(&self) -> Vec<(String, u32)> {
        self.state.lock().watching.clone()
    }
}

/// Drives one client connection until it disconnects or sends
/// malformed protocol data.
pub async fn handle(stream: TcpStream, router: Arc<Router>) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    let (mut reader, mut writer) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Reply>();
    let conn = Arc::new(ClientConnection::new(out_tx));
    let conn_dyn: Arc<dyn Connection> = Arc::clone(&conn) as Arc<dyn Connection>;

    let writer_task = tokio::spawn(async move {
        let mut buf = BytesMut::new();
        while let Some(reply) = out_rx.recv().await {
            buf.clear();
            reply.serialize(&mut buf);
            if buf.is_empty() {
                continue;
            }
            if writer.write_all(&buf).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    debug!(%peer, "client connected");
    let mut input = BytesMut::with_capacity(READ_CHUNK);
    'session: loop {
        // drain every complete frame already buffered
        loop {
            match parse_reply(&input) {
                Ok(Some((frame, consumed))) => {
                    input.advance(consumed);
                    match frame.into_cmd_line() {
                        Some(line) => {
                            let reply = router.exec(&conn_dyn, &line);
                            conn.send(&reply);
                        }
                        None => {
                            conn.send(&Reply::error(
                                "ERR protocol error: expected an array of bulk strings",
                            ));
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // connection-level error: report it and hang up
                    warn!(%peer, "protocol error: {e}");
                    conn.send(&Reply::error(format!("ERR protocol error: {e}")));
                    break 'session;
                }
            }
        }

        match reader.read_buf(&mut input).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, "read failed: {e}");
                break;
            }
        }
    }

    debug!(%peer, "client disconnected");
    router.after_client_close(&conn_dyn);
    drop(conn_dyn);
    drop(conn);
    let _ = writer_task.await;
    Ok(())
}
