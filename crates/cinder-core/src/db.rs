//! One numbered logical database.
//!
//! Composes the sharded dictionaries (data, expiry deadlines, version
//! counters), the key lock manager, and the expiration engine, and
//! executes decoded commands against them: resolve the command, bump
//! versions for its write keys, take the key locks in one sorted pass,
//! run the executor, release.
//!
//! A flush must not interleave with any other access, so every entry
//! point passes through a barrier: readers and writers hold it shared
//! for the duration of their dictionary access, flush holds it
//! exclusively while clearing.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cinder_protocol::{CmdLine, Reply};
use parking_lot::RwLock;
use tracing::debug;

use crate::cmd::{validate_arity, CommandTable};
use crate::conn::Connection;
use crate::dict::ShardedDict;
use crate::lock::KeyLocks;
use crate::txn;
use crate::types::Value;
use crate::wheel::WheelHandle;

/// Receives every mutating command for the append-only log.
pub type AofSink = Arc<dyn Fn(CmdLine) + Send + Sync>;

/// Milliseconds since the Unix epoch.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The deletion-task key for an expiring data key. Deterministic, so
/// rescheduling replaces the previous task instead of duplicating it.
fn expire_task_key(key: &str) -> String {
    format!("expire:{key}")
}

pub struct Db {
    index: usize,
    data: ShardedDict<Value>,
    expiries: ShardedDict<u64>,
    versions: ShardedDict<u32>,
    /// Flush barrier. Shared for normal access, exclusive for flush.
    barrier: RwLock<()>,
    /// Replaced wholesale by flush; in-flight holders keep the old
    /// table alive through their own `Arc`.
    locker: RwLock<Arc<KeyLocks>>,
    wheel: Option<WheelHandle>,
    aof_sink: RwLock<Option<AofSink>>,
    table: Arc<CommandTable>,
    /// Handed to scheduled deletion tasks so a pending timer never
    /// keeps a dropped database alive.
    me: Weak<Db>,
}

impl Db {
    /// Creates a live database with concurrent dictionaries and the
    /// full lock table. `wheel` drives active expiration; without it
    /// only lazy expiration applies.
    pub fn concurrent(index: usize, table: Arc<CommandTable>, wheel: Option<WheelHandle>) -> Arc<Db> {
        Arc::new_cyclic(|me| Db {
            index,
            data: ShardedDict::concurrent(),
            expiries: ShardedDict::concurrent(),
            versions: ShardedDict::concurrent(),
            barrier: RwLock::new(()),
            locker: RwLock::new(Arc::new(KeyLocks::concurrent())),
            wheel,
            aof_sink: RwLock::new(None),
            table,
            me: me.clone(),
        })
    }

    /// Creates a single-segment database for embedded use (AOF replay
    /// and rewrite scratch state).
    pub fn embedded(index: usize, table: Arc<CommandTable>) -> Arc<Db> {
        Arc::new_cyclic(|me| Db {
            index,
            data: ShardedDict::single(),
            expiries: ShardedDict::single(),
            versions: ShardedDict::single(),
            barrier: RwLock::new(()),
            locker: RwLock::new(Arc::new(KeyLocks::single())),
            wheel: None,
            aof_sink: RwLock::new(None),
            table,
            me: me.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Installs the append-only-log hook.
    pub fn set_aof_sink(&self, sink: AofSink) {
        *self.aof_sink.write() = Some(sink);
    }

    /// Forwards a mutating command line to the log, if logging is on.
    pub fn add_aof(&self, line: CmdLine) {
        if let Some(sink) = self.aof_sink.read().as_ref() {
            sink(line);
        }
    }

    /// The current lock table.
    pub fn locks(&self) -> Arc<KeyLocks> {
        self.locker.read().clone()
    }

    // -----------------------------------------------------------------
    // command execution
    // -----------------------------------------------------------------

    /// Executes one decoded command for a connection, routing
    /// transaction-control commands and queueing while a MULTI block is
    /// open.
    pub fn exec(&self, conn: &dyn Connection, line: &CmdLine) -> Reply {
        let Some(name_bytes) = line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();

        match name.as_str() {
            "multi" => {
                if line.len() != 1 {
                    return Reply::arg_num_error(&name);
                }
                txn::start_multi(conn)
            }
            "discard" => {
                if line.len() != 1 {
                    return Reply::arg_num_error(&name);
                }
                txn::discard_multi(conn)
            }
            "exec" => {
                if line.len() != 1 {
                    return Reply::arg_num_error(&name);
                }
                txn::exec_multi(self, conn)
            }
            "watch" => {
                if line.len() < 2 {
                    return Reply::arg_num_error(&name);
                }
                txn::watch(self, conn, &line[1..])
            }
            _ => {
                if conn.in_multi() {
                    conn.enqueue_cmd(line.clone());
                    Reply::queued()
                } else {
                    self.exec_normal(line)
                }
            }
        }
    }

    /// Executes a command with version bumping and key locking.
    pub fn exec_normal(&self, line: &CmdLine) -> Reply {
        let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();
        let Some(cmd) = self.table.get(&name) else {
            return Reply::error(format!("ERR unknown command '{name}'"));
        };
        if !validate_arity(cmd.arity, line.len()) {
            return Reply::arg_num_error(&name);
        }

        let (write_keys, read_keys) = (cmd.prepare)(&line[1..]);
        self.bump_versions(&write_keys);

        let locks = self.locks();
        let _guard = locks.lock(&write_keys, &read_keys);
        (cmd.executor)(self, &line[1..])
    }

    /// Executes a command assuming the caller already holds the key
    /// locks and has handled version bumping — the EXEC batch path.
    pub fn exec_with_lock(&self, line: &CmdLine) -> Reply {
        let Some(name_bytes) = line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();
        let Some(cmd) = self.table.get(&name) else {
            return Reply::error(format!("ERR unknown command '{name}'"));
        };
        if !validate_arity(cmd.arity, line.len()) {
            return Reply::arg_num_error(&name);
        }
        (cmd.executor)(self, &line[1..])
    }

    /// Commands that restore the state a command is about to destroy.
    pub fn undo_logs(&self, line: &CmdLine) -> Vec<CmdLine> {
        let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();
        let Some(cmd) = self.table.get(&name) else {
            return Vec::new();
        };
        match cmd.undo {
            Some(undo) => undo(self, &line[1..]),
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // entity access
    // -----------------------------------------------------------------

    /// Looks up a live (non-expired) value.
    pub fn get_entity(&self, key: &str) -> Option<Value> {
        let _b = self.barrier.read();
        let value = self.data.get(key)?;
        if self.is_expired(key) {
            return None;
        }
        Some(value)
    }

    /// Binds a value. Returns 1 on insert, 0 on replace.
    pub fn put_entity(&self, key: String, value: Value) -> usize {
        let _b = self.barrier.read();
        self.data.put(key, value)
    }

    pub fn put_if_exists(&self, key: String, value: Value) -> usize {
        let _b = self.barrier.read();
        self.data.put_if_exists(key, value)
    }

    pub fn put_if_absent(&self, key: String, value: Value) -> usize {
        let _b = self.barrier.read();
        self.data.put_if_absent(key, value)
    }

    /// Removes a key, its deadline, and its scheduled deletion task.
    /// The version counter survives: it keeps counting across
    /// delete/recreate so watchers can never miss a change.
    pub fn remove(&self, key: &str) -> usize {
        let _b = self.barrier.read();
        self.remove_inner(key)
    }

    fn remove_inner(&self, key: &str) -> usize {
        let existed = self.data.remove(key);
        self.expiries.remove(key);
        if let Some(wheel) = &self.wheel {
            wheel.cancel(&expire_task_key(key));
        }
        existed
    }

    /// Removes several keys, returning how many existed.
    pub fn remove_keys(&self, keys: &[String]) -> usize {
        let _b = self.barrier.read();
        keys.iter().map(|k| self.remove_inner(k)).sum()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    /// Clears the whole database. Blocks until in-flight accesses
    /// drain, then empties all three dictionaries and resets the lock
    /// table.
    pub fn flush(&self) {
        let _b = self.barrier.write();
        self.data.clear();
        self.expiries.clear();
        self.versions.clear();
        let slots = self.locker.read().slots();
        *self.locker.write() = Arc::new(KeyLocks::new(slots));
    }

    /// Visits every live entry with its optional expiry deadline.
    pub fn for_each(&self, mut visitor: impl FnMut(&str, &Value, Option<u64>) -> bool) {
        self.data
            .for_each(|key, value| visitor(key, value, self.expiries.get(key)));
    }

    /// All live keys.
    pub fn keys(&self) -> Vec<String> {
        self.data.keys()
    }

    // -----------------------------------------------------------------
    // expiration
    // -----------------------------------------------------------------

    /// Records an absolute deadline for `key` and (re)schedules its
    /// deletion task. A task fired for a superseded deadline finds the
    /// stored deadline changed and stands down.
    pub fn set_expiry(&self, key: &str, at_ms: u64) {
        let _b = self.barrier.read();
        self.expiries.put(key.to_string(), at_ms);

        let Some(wheel) = &self.wheel else {
            return;
        };
        let db = self.me.clone();
        let key_owned = key.to_string();
        let delay = Duration::from_millis(at_ms.saturating_sub(unix_now_ms()));
        wheel.schedule(expire_task_key(key), delay, move || {
            if let Some(db) = db.upgrade() {
                db.scheduled_expire(&key_owned, at_ms);
            }
        });
    }

    /// Timer-fired deletion: takes the key's write lock, re-reads the
    /// deadline, and deletes only if the deadline that scheduled this
    /// task is still in force and has passed.
    fn scheduled_expire(&self, key: &str, scheduled_at: u64) {
        let keys = vec![key.to_string()];
        let locks = self.locks();
        let _guard = locks.lock_writes(&keys);

        let Some(deadline) = self.expiries.get(key) else {
            return;
        };
        if deadline == scheduled_at && unix_now_ms() >= deadline {
            debug!(key, db = self.index, "expired key removed by timer");
            self.remove(key);
        }
    }

    /// Clears the deadline and cancels the deletion task. Returns
    /// whether a deadline existed.
    pub fn persist_key(&self, key: &str) -> bool {
        let _b = self.barrier.read();
        let existed = self.expiries.remove(key) == 1;
        if existed {
            if let Some(wheel) = &self.wheel {
                wheel.cancel(&expire_task_key(key));
            }
        }
        existed
    }

    /// Lazy expiration: reports whether the key's deadline has passed,
    /// removing the key as a side effect when it has. Idempotent — a
    /// second call finds no deadline and reports false.
    pub fn is_expired(&self, key: &str) -> bool {
        let Some(deadline) = self.expiries.get(key) else {
            return false;
        };
        let expired = unix_now_ms() >= deadline;
        if expired {
            self.remove_inner(key);
        }
        expired
    }

    /// The stored deadline, if any.
    pub fn expiry_ms(&self, key: &str) -> Option<u64> {
        self.expiries.get(key)
    }

    // -----------------------------------------------------------------
    // version counters
    // -----------------------------------------------------------------

    /// Bumps the version of each key once. The increment is atomic per
    /// key: concurrent writers each land a distinct version.
    pub fn bump_versions(&self, keys: &[String]) {
        for key in keys {
            self.versions
                .compute(key, |v| v.copied().unwrap_or(0).wrapping_add(1));
        }
    }

    /// Current version of a key; an unseen key is at version 0.
    pub fn version(&self, key: &str) -> u32 {
        self.versions.get(key).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cinder_protocol::cmd_line;

    fn live_db() -> Arc<Db> {
        Db::concurrent(0, Arc::new(CommandTable::standard()), None)
    }

    #[test]
    fn exec_normal_round_trip() {
        let db = live_db();
        assert_eq!(db.exec_normal(&cmd_line(&["SET", "k", "v"])), Reply::ok());
        assert_eq!(
            db.exec_normal(&cmd_line(&["GET", "k"])),
            Reply::Bulk(Bytes::from("v"))
        );
    }

    #[test]
    fn unknown_command_and_arity_errors() {
        let db = live_db();
        assert!(db.exec_normal(&cmd_line(&["NOSUCH"])).is_error());
        assert!(db.exec_normal(&cmd_line(&["GET"])).is_error());
        assert!(db.exec_normal(&cmd_line(&["GET", "a", "b"])).is_error());
    }

    #[test]
    fn versions_bump_once_per_write() {
        let db = live_db();
        assert_eq!(db.version("k"), 0);
        db.exec_normal(&cmd_line(&["SET", "k", "1"]));
        assert_eq!(db.version("k"), 1);
        db.exec_normal(&cmd_line(&["SET", "k", "2"]));
        assert_eq!(db.version("k"), 2);
        // reads leave versions alone
        db.exec_normal(&cmd_line(&["GET", "k"]));
        assert_eq!(db.version("k"), 2);
    }

    #[test]
    fn version_survives_delete_and_recreate() {
        let db = live_db();
        db.exec_normal(&cmd_line(&["SET", "k", "1"]));
        db.exec_normal(&cmd_line(&["DEL", "k"]));
        let after_delete = db.version("k");
        assert_eq!(after_delete, 2);
        db.exec_normal(&cmd_line(&["SET", "k", "1"]));
        assert_eq!(db.version("k"), 3);
    }

    #[test]
    fn zero_duration_ttl_expires_immediately_and_idempotently() {
        let db = live_db();
        db.put_entity("k".into(), Value::String(Bytes::from("v")));
        db.set_expiry("k", unix_now_ms());

        assert_eq!(db.get_entity("k"), None);
        // the removal already happened; a second check must not
        // double-count
        assert!(!db.is_expired("k"));
        assert_eq!(db.remove("k"), 0);
    }

    #[test]
    fn persist_clears_deadline() {
        let db = live_db();
        db.put_entity("k".into(), Value::String(Bytes::from("v")));
        db.set_expiry("k", unix_now_ms() + 60_000);
        assert!(db.expiry_ms("k").is_some());
        assert!(db.persist_key("k"));
        assert!(!db.persist_key("k"));
        assert!(db.expiry_ms("k").is_none());
        assert!(db.get_entity("k").is_some());
    }

    #[test]
    fn flush_clears_everything_including_versions() {
        let db = live_db();
        db.exec_normal(&cmd_line(&["SET", "k", "v"]));
        db.set_expiry("k", unix_now_ms() + 60_000);
        db.flush();
        assert_eq!(db.key_count(), 0);
        assert_eq!(db.version("k"), 0);
        assert!(db.expiry_ms("k").is_none());
        // the database stays usable after the lock-table reset
        assert_eq!(db.exec_normal(&cmd_line(&["SET", "k", "v"])), Reply::ok());
    }

    #[test]
    fn remove_keys_counts_existing_only() {
        let db = live_db();
        db.put_entity("a".into(), Value::String(Bytes::from("1")));
        db.put_entity("b".into(), Value::String(Bytes::from("2")));
        let removed = db.remove_keys(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn timer_driven_expiration_deletes_key() {
        let table = Arc::new(CommandTable::standard());
        let db = Db::concurrent(0, table, Some(WheelHandle::spawn()));
        db.put_entity("k".into(), Value::String(Bytes::from("v")));
        db.set_expiry("k", unix_now_ms() + 50);

        tokio::time::sleep(Duration::from_millis(600)).await;
        // the timer removed it without any read touching the key
        assert_eq!(db.data.get("k"), None);
        assert!(db.expiry_ms("k").is_none());
    }

    #[tokio::test]
    async fn superseded_deadline_does_not_delete() {
        let table = Arc::new(CommandTable::standard());
        let db = Db::concurrent(0, table, Some(WheelHandle::spawn()));
        db.put_entity("k".into(), Value::String(Bytes::from("v")));
        db.set_expiry("k", unix_now_ms() + 100);
        // push the deadline out before the first task fires
        db.set_expiry("k", unix_now_ms() + 60_000);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(db.get_entity("k").is_some());
    }
}
