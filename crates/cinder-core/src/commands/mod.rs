//! Command executors, key-set preparers, and undo generators.
//!
//! Every command registers three things: an executor, a prepare
//! function naming the keys it will write and read (consumed by the
//! lock manager and version counters before the executor runs), and —
//! for writes that can appear inside a transaction — an undo generator
//! that captures restore commands from the pre-command state.
//!
//! Mutations follow the clone-modify-replace discipline: the executor
//! reads the value handle, clones it, mutates the clone, and puts it
//! back, all under the key's write lock.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod sets;
pub mod strings;
pub mod sys;
pub mod zsets;

use bytes::Bytes;
use cinder_protocol::{cmd_line, CmdLine, Reply};
use smallvec::SmallVec;

use crate::cmd::CommandTable;
use crate::db::Db;
use crate::types::Value;

/// Registers every built-in command into the table.
pub fn register_all(table: &mut CommandTable) {
    strings::register(table);
    keys::register(table);
    hashes::register(table);
    lists::register(table);
    sets::register(table);
    zsets::register(table);
    sys::register(table);
}

// ---------------------------------------------------------------------
// argument helpers
// ---------------------------------------------------------------------

pub(crate) fn arg_str(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

pub(crate) fn parse_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

pub(crate) fn parse_f64(arg: &Bytes) -> Option<f64> {
    let v: f64 = std::str::from_utf8(arg).ok()?.parse().ok()?;
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// Formats a score the way the wire protocol expects: integral values
/// without a fraction, everything else in shortest decimal form.
pub(crate) fn format_float(v: f64) -> String {
    if v == f64::INFINITY {
        "inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e17 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Clamps a possibly-negative (from-the-end) index pair to a concrete
/// inclusive window over a collection of length `len`. `None` when the
/// window is empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let s = if start < 0 { len + start } else { start }.max(0);
    let e = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if s > e || s >= len {
        return None;
    }
    Some((s as usize, e as usize))
}

// ---------------------------------------------------------------------
// typed entity access
// ---------------------------------------------------------------------

pub(crate) fn get_as_string(db: &Db, key: &str) -> Result<Option<Bytes>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(Value::String(b)) => Ok(Some(b)),
        Some(_) => Err(Reply::wrong_type_error()),
    }
}

pub(crate) fn get_as_list(
    db: &Db,
    key: &str,
) -> Result<Option<std::collections::VecDeque<Bytes>>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(Value::List(l)) => Ok(Some(l)),
        Some(_) => Err(Reply::wrong_type_error()),
    }
}

pub(crate) fn get_as_hash(
    db: &Db,
    key: &str,
) -> Result<Option<ahash::AHashMap<String, Bytes>>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(Value::Hash(h)) => Ok(Some(h)),
        Some(_) => Err(Reply::wrong_type_error()),
    }
}

pub(crate) fn get_as_set(db: &Db, key: &str) -> Result<Option<ahash::AHashSet<String>>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(Value::Set(s)) => Ok(Some(s)),
        Some(_) => Err(Reply::wrong_type_error()),
    }
}

pub(crate) fn get_as_zset(db: &Db, key: &str) -> Result<Option<crate::zset::SortedSet>, Reply> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(Value::SortedSet(z)) => Ok(Some(z)),
        Some(_) => Err(Reply::wrong_type_error()),
    }
}

// ---------------------------------------------------------------------
// prepare functions
// ---------------------------------------------------------------------

pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (vec![arg_str(&args[0])], Vec::new())
}

pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), vec![arg_str(&args[0])])
}

pub(crate) fn write_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().map(arg_str).collect(), Vec::new())
}

pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(arg_str).collect())
}

/// For key/value pair argument lists (MSET): the even positions are
/// keys.
pub(crate) fn write_even_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().step_by(2).map(arg_str).collect(), Vec::new())
}

/// RENAME-style: both named keys are written.
pub(crate) fn write_two_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (
        vec![arg_str(&args[0]), arg_str(&args[1])],
        Vec::new(),
    )
}

// ---------------------------------------------------------------------
// undo-log generation
// ---------------------------------------------------------------------

/// Restore commands for a set of keys: delete whatever the command
/// leaves behind, then recreate the captured value and its deadline.
pub(crate) fn rollback_keys<'a>(
    db: &Db,
    keys: impl IntoIterator<Item = &'a str>,
) -> Vec<CmdLine> {
    let mut out = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => out.push(cmd_line(&["DEL", key])),
            Some(value) => {
                out.push(cmd_line(&["DEL", key]));
                out.push(entity_to_cmd(key, &value));
                out.push(expiry_restore_cmd(db, key));
            }
        }
    }
    out
}

/// The command line that recreates a value under `key`.
pub(crate) fn entity_to_cmd(key: &str, value: &Value) -> CmdLine {
    let key_bytes = Bytes::copy_from_slice(key.as_bytes());
    match value {
        Value::String(data) => vec![Bytes::from_static(b"SET"), key_bytes, data.clone()],
        Value::List(items) => {
            let mut line = vec![Bytes::from_static(b"RPUSH"), key_bytes];
            line.extend(items.iter().cloned());
            line
        }
        Value::Hash(map) => {
            let mut line = vec![Bytes::from_static(b"HSET"), key_bytes];
            for (field, val) in map {
                line.push(Bytes::copy_from_slice(field.as_bytes()));
                line.push(val.clone());
            }
            line
        }
        Value::Set(members) => {
            let mut line = vec![Bytes::from_static(b"SADD"), key_bytes];
            line.extend(members.iter().map(|m| Bytes::copy_from_slice(m.as_bytes())));
            line
        }
        Value::SortedSet(zset) => {
            let mut line = vec![Bytes::from_static(b"ZADD"), key_bytes];
            for (member, score) in zset.iter() {
                line.push(Bytes::from(format_float(score)));
                line.push(Bytes::copy_from_slice(member.as_bytes()));
            }
            line
        }
    }
}

/// The command line that restores a key's expiration state: an
/// absolute deadline when one is set, PERSIST otherwise.
pub(crate) fn expiry_restore_cmd(db: &Db, key: &str) -> CmdLine {
    match db.expiry_ms(key) {
        Some(deadline) => cmd_line(&["PEXPIREAT", key, &deadline.to_string()]),
        None => cmd_line(&["PERSIST", key]),
    }
}

/// Undo for commands whose first argument is their only write key.
pub(crate) fn undo_first_key(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let key = arg_str(&args[0]);
    rollback_keys(db, [key.as_str()])
}

/// Undo for commands that write every argument key (DEL).
pub(crate) fn undo_all_keys(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let keys: SmallVec<[String; 4]> = args.iter().map(arg_str).collect();
    rollback_keys(db, keys.iter().map(String::as_str))
}

/// Undo for key/value pair argument lists (MSET).
pub(crate) fn undo_even_keys(db: &Db, args: &[Bytes]) -> Vec<CmdLine> {
    let keys: SmallVec<[String; 4]> = args.iter().step_by(2).map(arg_str).collect();
    rollback_keys(db, keys.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn db() -> Arc<Db> {
        Db::concurrent(0, Arc::new(CommandTable::standard()), None)
    }

    #[test]
    fn normalize_range_positive_and_negative() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 4)));
        assert_eq!(normalize_range(1, 3, 5), Some((1, 3)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(9, 12, 5), None);
        assert_eq!(normalize_range(0, 0, 0), None);
        // stop past the end clamps
        assert_eq!(normalize_range(2, 100, 5), Some((2, 4)));
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(-2.0), "-2");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn rollback_absent_key_is_plain_delete() {
        let db = db();
        let logs = rollback_keys(&db, ["ghost"]);
        assert_eq!(logs, vec![cmd_line(&["DEL", "ghost"])]);
    }

    #[test]
    fn rollback_existing_key_recreates_value_and_ttl() {
        let db = db();
        db.exec_normal(&cmd_line(&["SET", "k", "v"]));
        let logs = rollback_keys(&db, ["k"]);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0], cmd_line(&["DEL", "k"]));
        assert_eq!(logs[1], cmd_line(&["SET", "k", "v"]));
        assert_eq!(logs[2], cmd_line(&["PERSIST", "k"]));
    }

    #[test]
    fn entity_to_cmd_recreates_each_type() {
        let db = db();
        db.exec_normal(&cmd_line(&["RPUSH", "l", "a", "b"]));
        db.exec_normal(&cmd_line(&["ZADD", "z", "1.5", "m"]));

        let list = db.get_entity("l").unwrap();
        assert_eq!(entity_to_cmd("l", &list), cmd_line(&["RPUSH", "l", "a", "b"]));

        let zset = db.get_entity("z").unwrap();
        assert_eq!(
            entity_to_cmd("z", &zset),
            cmd_line(&["ZADD", "z", "1.5", "m"])
        );
    }

    #[test]
    fn replaying_rollback_restores_state() {
        let db = db();
        db.exec_normal(&cmd_line(&["RPUSH", "l", "a", "b"]));
        let logs = rollback_keys(&db, ["l"]);

        // clobber the key, then replay the undo log
        db.exec_normal(&cmd_line(&["DEL", "l"]));
        db.exec_normal(&cmd_line(&["RPUSH", "l", "x"]));
        for line in &logs {
            assert!(!db.exec_with_lock(line).is_error());
        }
        let restored = db.get_entity("l").unwrap();
        assert_eq!(
            entity_to_cmd("l", &restored),
            cmd_line(&["RPUSH", "l", "a", "b"])
        );
    }
}
