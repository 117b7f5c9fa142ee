//! Optimistic transactions: WATCH / MULTI / EXEC / DISCARD.
//!
//! WATCH captures the current version of each named key in the
//! connection's watch set. MULTI switches the connection into queueing
//! mode; EXEC validates that no watched key's version moved, then
//! applies the whole queue atomically under the union of its key locks,
//! rolling back on a mid-batch error so the batch is all-or-nothing.
//!
//! The version counters for the batch's write keys are bumped once, as
//! a single version event, after validation and before the locks are
//! taken. A WATCH racing the batch may observe the pre- or post-batch
//! version; that coarseness is accepted at single-key granularity.

use ahash::AHashSet;
use bytes::Bytes;
use cinder_protocol::{CmdLine, Reply};
use tracing::debug;

use crate::cmd::validate_arity;
use crate::conn::Connection;
use crate::db::Db;

/// MULTI: opens a queueing block.
pub fn start_multi(conn: &dyn Connection) -> Reply {
    if conn.in_multi() {
        return Reply::error("ERR MULTI calls can not be nested");
    }
    conn.set_multi(true);
    Reply::ok()
}

/// DISCARD: drops the queue and the watch set.
pub fn discard_multi(conn: &dyn Connection) -> Reply {
    if !conn.in_multi() {
        return Reply::error("ERR DISCARD without MULTI");
    }
    conn.set_multi(false);
    Reply::ok()
}

/// WATCH: records each key's current version for EXEC-time validation.
pub fn watch(db: &Db, conn: &dyn Connection, keys: &[Bytes]) -> Reply {
    if conn.in_multi() {
        return Reply::error("ERR WATCH inside MULTI is not allowed");
    }
    for raw in keys {
        let key = String::from_utf8_lossy(raw).into_owned();
        let version = db.version(&key);
        conn.watch_key(&key, version);
    }
    Reply::ok()
}

/// EXEC: validates the watch set and applies the queued batch.
pub fn exec_multi(db: &Db, conn: &dyn Connection) -> Reply {
    if !conn.in_multi() {
        return Reply::error("ERR EXEC without MULTI");
    }
    let queue = conn.queued_cmds();
    let watching = conn.watching();
    conn.set_multi(false);
    execute_batch(db, &queue, &watching)
}

/// Applies a command batch atomically against one database.
pub(crate) fn execute_batch(
    db: &Db,
    cmds: &[CmdLine],
    watching: &[(String, u32)],
) -> Reply {
    // refuse the batch outright if any queued line is unexecutable;
    // nothing has been applied yet
    for line in cmds {
        let Some(name_bytes) = line.first() else {
            return Reply::error("ERR empty command in transaction");
        };
        let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();
        match db.table().get(&name) {
            None => return Reply::error(format!("ERR unknown command '{name}'")),
            Some(cmd) if !validate_arity(cmd.arity, line.len()) => {
                return Reply::arg_num_error(&name);
            }
            Some(_) => {}
        }
    }

    // optimistic validation: any watched key whose version moved since
    // WATCH aborts the batch with no side effects
    for (key, captured) in watching {
        if db.version(key) != *captured {
            debug!(key, "watched key changed, aborting transaction");
            return Reply::NullArray;
        }
    }

    // the union of every queued command's key sets, deduplicated;
    // watched keys join the read side so they stay stable while the
    // batch applies
    let mut write_keys: Vec<String> = Vec::new();
    let mut read_keys: Vec<String> = Vec::new();
    let mut seen_w = AHashSet::new();
    let mut seen_r = AHashSet::new();
    for line in cmds {
        let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();
        // validated above, so the lookup cannot miss
        let Some(cmd) = db.table().get(&name) else {
            return Reply::error(format!("ERR unknown command '{name}'"));
        };
        let (w, r) = (cmd.prepare)(&line[1..]);
        for key in w {
            if seen_w.insert(key.clone()) {
                write_keys.push(key);
            }
        }
        for key in r {
            if seen_r.insert(key.clone()) {
                read_keys.push(key);
            }
        }
    }
    for (key, _) in watching {
        if seen_r.insert(key.clone()) {
            read_keys.push(key.clone());
        }
    }

    // one version event for the whole batch, before lock acquisition
    db.bump_versions(&write_keys);

    let locks = db.locks();
    let _guard = locks.lock(&write_keys, &read_keys);

    let mut results = Vec::with_capacity(cmds.len());
    let mut undo_stack: Vec<Vec<CmdLine>> = Vec::with_capacity(cmds.len());

    for line in cmds {
        // capture the rollback recipe before touching state
        undo_stack.push(db.undo_logs(line));
        let reply = db.exec_with_lock(line);
        if reply.is_error() {
            // the failing command applied nothing, so its own undo log
            // is dropped; everything before it is unwound in reverse
            undo_stack.pop();
            for logs in undo_stack.iter().rev() {
                for undo_line in logs {
                    db.exec_with_lock(undo_line);
                }
            }
            debug!("transaction rolled back after command error");
            return reply;
        }
        results.push(reply);
    }

    Reply::Array(results)
}
