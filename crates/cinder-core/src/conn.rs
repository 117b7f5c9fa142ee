//! The connection capability trait.
//!
//! The engine never owns a socket. Everything it needs from a client
//! session — selected database, authentication state, subscriptions,
//! transaction state, the watch set, and a reply sink for pub/sub
//! pushes — goes through this narrow interface. The TCP session in the
//! server crate implements it for real clients; [`VirtualConnection`]
//! implements it for AOF replay (which only needs the selected-database
//! field) and for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use cinder_protocol::{CmdLine, Reply};
use parking_lot::Mutex;

/// Capabilities the engine requires from a client session.
pub trait Connection: Send + Sync {
    /// Stable identity for subscriber bookkeeping.
    fn id(&self) -> u64;

    /// Pushes a reply outside the request/response cycle (pub/sub
    /// deliveries, subscription acknowledgements).
    fn send(&self, reply: &Reply);

    fn selected_db(&self) -> usize;
    fn select_db(&self, index: usize);

    fn set_password(&self, password: &str);
    fn password(&self) -> String;

    fn subscribe(&self, channel: &str);
    fn unsubscribe(&self, channel: &str);
    fn subs_count(&self) -> usize;
    fn channels(&self) -> Vec<String>;

    /// Whether a MULTI block is open.
    fn in_multi(&self) -> bool;

    /// Opens or closes the MULTI block. Closing clears the command
    /// queue and the watch set.
    fn set_multi(&self, active: bool);

    fn enqueue_cmd(&self, line: CmdLine);
    fn queued_cmds(&self) -> Vec<CmdLine>;

    /// Records the version observed for a watched key. The first
    /// observation wins; watching an already-watched key is a no-op.
    fn watch_key(&self, key: &str, version: u32);

    /// The watch set: keys and the versions captured when WATCH ran.
    fn watching(&self) -> Vec<(String, u32)>;
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique connection id.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Default)]
struct SessionState {
    db: usize,
    password: String,
    subs: AHashSet<String>,
    multi: bool,
    queue: Vec<CmdLine>,
    watching: Vec<(String, u32)>,
}

/// In-process connection with no socket behind it.
///
/// Carries the full session state so tests can drive transactions and
/// subscriptions; the AOF replay path uses one purely for its
/// selected-database field. Replies pushed via [`Connection::send`] are
/// buffered for inspection.
#[derive(Debug)]
pub struct VirtualConnection {
    id: u64,
    state: Mutex<SessionState>,
    sent: Mutex<Vec<Reply>>,
}

impl VirtualConnection {
    pub fn new() -> Self {
        Self {
            id: next_conn_id(),
            state: Mutex::new(SessionState::default()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Drains and returns the buffered pushed replies.
    pub fn take_sent(&self) -> Vec<Reply> {
        std::mem::take(&mut self.sent.lock())
    }
}

impl Default for VirtualConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for VirtualConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, reply: &Reply) {
        self.sent.lock().push(reply.clone());
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
