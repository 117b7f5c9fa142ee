//! Generic key commands: existence, deletion, renaming, TTL handling,
//! and pattern listing.
//!
//! Relative TTL commands are persisted in absolute form (`PEXPIREAT`)
//! so a log replayed later reproduces the same deadlines instead of
//! restarting the clock.

use bytes::Bytes;
use cinder_protocol::{cmd_line, Reply};

use super::{
    arg_str, parse_i64, read_all_keys, read_first_key, undo_all_keys, undo_first_key,
    write_all_keys, write_first_key, write_two_keys,
};
use crate::cmd::{no_keys, CommandTable};
use crate::db::{unix_now_ms, Db};

pub fn register(table: &mut CommandTable) {
    table.register("del", exec_del, write_all_keys, Some(undo_all_keys), -2);
    table.register("exists", exec_exists, read_all_keys, None, -2);
    table.register("type", exec_type, read_first_key, None, 2);
    table.register("rename", exec_rename, write_two_keys, Some(undo_rename), 3);
    table.register("renamenx", exec_renamenx, write_two_keys, Some(undo_rename), 3);
    table.register("expire", exec_expire, write_first_key, Some(undo_first_key), 3);
    table.register("expireat", exec_expireat, write_first_key, Some(undo_first_key), 3);
    table.register("pexpire", exec_pexpire, write_first_key, Some(undo_first_key), 3);
    table.register("pexpireat", exec_pexpireat, write_first_key, Some(undo_first_key), 3);
    table.register("ttl", exec_ttl, read_first_key, None, 2);
    table.register("pttl", exec_pttl, read_first_key, None, 2);
    table.register("persist", exec_persist, write_first_key, Some(undo_first_key), 2);
    table.register("keys", exec_keys, no_keys, None, 2);
    table.register("flushdb", exec_flushdb, no_keys, None, -1);
}

fn exec_del(db: &Db, args: &[Bytes]) -> Reply {
    let keys: Vec<String> = args.iter().map(arg_str).collect();
    let removed = db.remove_keys(&keys);
    if removed > 0 {
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"DEL")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(removed as i64)
}

fn exec_exists(db: &Db, args: &[Bytes]) -> Reply {
    let count = args
        .iter()
        .filter(|raw| db.get_entity(&arg_str(raw)).is_some())
        .count();
    Reply::Integer(count as i64)
}

fn exec_type(db: &Db, args: &[Bytes]) -> Reply {
    match db.get_entity(&arg_str(&args[0])) {
        Some(value) => Reply::Simple(value.type_name().to_string()),
        None => Reply::Simple("none".to_string()),
    }
}

fn undo_rename(db: &Db, args: &[Bytes]) -> Vec<cinder_protocol::CmdLine> {
    let src = arg_str(&args[0]);
    let dst = arg_str(&args[1]);
    super::rollback_keys(db, [src.as_str(), dst.as_str()])
}

fn exec_rename(db: &Db, args: &[Bytes]) -> Reply {
    rename(db, args, false)
}

fn exec_renamenx(db: &Db, args: &[Bytes]) -> Reply {
    rename(db, args, true)
}

fn rename(db: &Db, args: &[Bytes], only_if_absent: bool) -> Reply {
    let src = arg_str(&args[0]);
    let dst = arg_str(&args[1]);

    let Some(value) = db.get_entity(&src) else {
        return Reply::error("ERR no such key");
    };
    if only_if_absent && db.get_entity(&dst).is_some() {
        return Reply::Integer(0);
    }
    let deadline = db.expiry_ms(&src);

    db.remove(&src);
    db.put_entity(dst.clone(), value);
    match deadline {
        Some(at) => db.set_expiry(&dst, at),
        None => {
            db.persist_key(&dst);
        }
    }

    db.add_aof(vec![
        Bytes::from_static(b"RENAME"),
        args[0].clone(),
        args[1].clone(),
    ]);
    if only_if_absent {
        Reply::Integer(1)
    } else {
        Reply::ok()
    }
}

fn exec_expire(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(secs) => set_deadline(db, &args[0], unix_now_ms() as i64 + secs * 1000),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

fn exec_pexpire(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(ms) => set_deadline(db, &args[0], unix_now_ms() as i64 + ms),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

fn exec_expireat(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(secs) => set_deadline(db, &args[0], secs * 1000),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

fn exec_pexpireat(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(ms) => set_deadline(db, &args[0], ms),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

/// Shared tail of the expire family: record the absolute deadline and
/// log it in time-independent form.
fn set_deadline(db: &Db, raw_key: &Bytes, at_ms: i64) -> Reply {
    let key = arg_str(raw_key);
    if db.get_entity(&key).is_none() {
        return Reply::Integer(0);
    }
    let at_ms = at_ms.max(0) as u64;
    db.set_expiry(&key, at_ms);
    db.add_aof(cmd_line(&["PEXPIREAT", &key, &at_ms.to_string()]));
    Reply::Integer(1)
}

fn exec_ttl(db: &Db, args: &[Bytes]) -> Reply {
    remaining(db, &args[0], 1000)
}

fn exec_pttl(db: &Db, args: &[Bytes]) -> Reply {
    remaining(db, &args[0], 1)
}

fn remaining(db: &Db, raw_key: &Bytes, unit_ms: u64) -> Reply {
    let key = arg_str(raw_key);
    if db.get_entity(&key).is_none() {
        return Reply::Integer(-2);
    }
    match db.expiry_ms(&key) {
        None => Reply::Integer(-1),
        Some(deadline) => {
            let left = deadline.saturating_sub(unix_now_ms());
            // round up so a deadline 1ms away still reports one unit
            Reply::Integer(left.div_ceil(unit_ms) as i64)
        }
    }
}

fn exec_persist(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return Reply::Integer(0);
    }
    if db.persist_key(&key) {
        db.add_aof(cmd_line(&["PERSIST", &key]));
        Reply::Integer(1)
    } else {
        Reply::Integer(0)
    }
}

fn exec_keys(db: &Db, args: &[Bytes]) -> Reply {
    let pattern = arg_str(&args[0]);
    let mut matched: Vec<String> = db
        .keys()
        .into_iter()
        .filter(|key| glob_match(&pattern, key) && !db.is_expired(key))
        .collect();
    matched.sort();
    Reply::multi_bulk(matched.into_iter().map(Bytes::from))
}

fn exec_flushdb(db: &Db, _args: &[Bytes]) -> Reply {
    db.flush();
    db.add_aof(cmd_line(&["FLUSHDB"]));
    Reply::ok()
}

/// Glob matcher for KEYS: `*` any run, `?` any one, `[a-c]` classes,
/// backslash escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    match_here(pattern.as_bytes(), text.as_bytes())
}

fn match_here(pat: &[u8], text: &[u8]) -> bool {
    match pat.first() {
        None => text.is_empty(),
        Some(b'*') => {
            // greedy star: try every suffix
            (0..=text.len()).any(|skip| match_here(&pat[1..], &text[skip..]))
        }
        Some(b'?') => !text.is_empty() && match_here(&pat[1..], &text[1..]),
        Some(b'[') => {
            let Some(close) = pat.iter().position(|&c| c == b']') else {
                return false;
            };
            let Some(&ch) = text.first() else {
                return false;
            };
            class_contains(&pat[1..close], ch) && match_here(&pat[close + 1..], &text[1..])
        }
        Some(b'\\') if pat.len() > 1 => {
            !text.is_empty() && pat[1] == text[0] && match_here(&pat[2..], &text[1..])
        }
        Some(&c) => !text.is_empty() && c == text[0] && match_here(&pat[1..], &text[1..]),
    }
}

fn class_contains(class: &[u8], ch: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= ch && ch <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == ch {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::CommandTable;
    use std::sync::Arc;

    fn db() -> Arc<Db> {
        Db::concurrent(0, Arc::new(CommandTable::standard()), None)
    }

    fn run(db: &Db, parts: &[&str]) -> Reply {
        db.exec_normal(&cmd_line(parts))
    }

    #[test]
    fn del_and_exists() {
        let db = db();
        run(&db, &["MSET", "a", "1", "b", "2"]);
        assert_eq!(run(&db, &["EXISTS", "a", "b", "c"]), Reply::Integer(2));
        assert_eq!(run(&db, &["DEL", "a", "c"]), Reply::Integer(1));
        assert_eq!(run(&db, &["EXISTS", "a"]), Reply::Integer(0));
    }

    #[test]
    fn type_reports_each_kind() {
        let db = db();
        run(&db, &["SET", "s", "v"]);
        run(&db, &["RPUSH", "l", "v"]);
        run(&db, &["ZADD", "z", "1", "m"]);
        assert_eq!(run(&db, &["TYPE", "s"]), Reply::Simple("string".into()));
        assert_eq!(run(&db, &["TYPE", "l"]), Reply::Simple("list".into()));
        assert_eq!(run(&db, &["TYPE", "z"]), Reply::Simple("zset".into()));
        assert_eq!(run(&db, &["TYPE", "nope"]), Reply::Simple("none".into()));
    }

    #[test]
    fn rename_moves_value_and_deadline() {
        let db = db();
        run(&db, &["SET", "a", "v"]);
        run(&db, &["PEXPIRE", "a", "60000"]);
        assert_eq!(run(&db, &["RENAME", "a", "b"]), Reply::ok());
        assert_eq!(run(&db, &["GET", "a"]), Reply::Null);
        assert_eq!(run(&db, &["GET", "b"]), Reply::Bulk(Bytes::from("v")));
        assert!(db.expiry_ms("b").is_some());
        assert!(run(&db, &["RENAME", "ghost", "x"]).is_error());
    }

    #[test]
    fn renamenx_respects_existing_target() {
        let db = db();
        run(&db, &["SET", "a", "1"]);
        run(&db, &["SET", "b", "2"]);
        assert_eq!(run(&db, &["RENAMENX", "a", "b"]), Reply::Integer(0));
        assert_eq!(run(&db, &["RENAMENX", "a", "c"]), Reply::Integer(1));
    }

    #[test]
    fn expire_then_ttl_then_persist() {
        let db = db();
        run(&db, &["SET", "k", "v"]);
        assert_eq!(run(&db, &["TTL", "k"]), Reply::Integer(-1));
        assert_eq!(run(&db, &["EXPIRE", "k", "100"]), Reply::Integer(1));
        match run(&db, &["TTL", "k"]) {
            Reply::Integer(secs) => assert!((1..=100).contains(&secs)),
            other => panic!("unexpected ttl reply: {other:?}"),
        }
        assert_eq!(run(&db, &["PERSIST", "k"]), Reply::Integer(1));
        assert_eq!(run(&db, &["TTL", "k"]), Reply::Integer(-1));
        assert_eq!(run(&db, &["PERSIST", "k"]), Reply::Integer(0));
    }

    #[test]
    fn ttl_reports_missing_key() {
        let db = db();
        assert_eq!(run(&db, &["TTL", "ghost"]), Reply::Integer(-2));
        assert_eq!(run(&db, &["PTTL", "ghost"]), Reply::Integer(-2));
    }

    #[test]
    fn expire_on_missing_key_is_zero() {
        let db = db();
        assert_eq!(run(&db, &["EXPIRE", "ghost", "10"]), Reply::Integer(0));
    }

    #[test]
    fn past_pexpireat_expires_lazily() {
        let db = db();
        run(&db, &["SET", "k", "v"]);
        assert_eq!(run(&db, &["PEXPIREAT", "k", "1"]), Reply::Integer(1));
        assert_eq!(run(&db, &["GET", "k"]), Reply::Null);
    }

    #[test]
    fn keys_with_patterns() {
        let db = db();
        run(&db, &["MSET", "user:1", "a", "user:2", "b", "order:1", "c"]);
        assert_eq!(
            run(&db, &["KEYS", "user:*"]),
            Reply::multi_bulk([Bytes::from("user:1"), Bytes::from("user:2")])
        );
        assert_eq!(
            run(&db, &["KEYS", "*:1"]),
            Reply::multi_bulk([Bytes::from("order:1"), Bytes::from("user:1")])
        );
    }

    #[test]
    fn flushdb_empties_database() {
        let db = db();
        run(&db, &["MSET", "a", "1", "b", "2"]);
        assert_eq!(run(&db, &["FLUSHDB"]), Reply::ok());
        assert_eq!(db.key_count(), 0);
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("user:*", "user:42"));
        assert!(!glob_match("user:*", "order:42"));
        assert!(glob_match("h?llo", "hello"));
        assert!(glob_match("h?llo", "hallo"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[a-e]llo", "hbllo"));
        assert!(!glob_match("h[a-e]llo", "hzllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(glob_match("literal\\*", "literal*"));
        assert!(!glob_match("literal\\*", "literalx"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }
}
