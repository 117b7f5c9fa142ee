//! String commands.

use bytes::Bytes;
use cinder_protocol::{cmd_line, Reply};

use super::{
    arg_str, get_as_string, parse_i64, read_all_keys, read_first_key, undo_even_keys,
    undo_first_key, write_even_keys, write_first_key,
};
use crate::cmd::CommandTable;
use crate::db::{unix_now_ms, Db};
use crate::types::Value;

pub fn register(table: &mut CommandTable) {
    table.register("set", exec_set, write_first_key, Some(undo_first_key), -3);
    table.register("setnx", exec_setnx, write_first_key, Some(undo_first_key), 3);
    table.register("setex", exec_setex, write_first_key, Some(undo_first_key), 4);
    table.register("psetex", exec_psetex, write_first_key, Some(undo_first_key), 4);
    table.register("getset", exec_getset, write_first_key, Some(undo_first_key), 3);
    table.register("mset", exec_mset, write_even_keys, Some(undo_even_keys), -3);
    table.register("msetnx", exec_msetnx, write_even_keys, Some(undo_even_keys), -3);
    table.register("get", exec_get, read_first_key, None, 2);
    table.register("mget", exec_mget, read_all_keys, None, -2);
    table.register("incr", exec_incr, write_first_key, Some(undo_first_key), 2);
    table.register("decr", exec_decr, write_first_key, Some(undo_first_key), 2);
    table.register("incrby", exec_incrby, write_first_key, Some(undo_first_key), 3);
    table.register("decrby", exec_decrby, write_first_key, Some(undo_first_key), 3);
    table.register("strlen", exec_strlen, read_first_key, None, 2);
    table.register("append", exec_append, write_first_key, Some(undo_first_key), 3);
}

/// Insert policy parsed from SET's NX/XX flags.
#[derive(PartialEq)]
enum SetPolicy {
    Upsert,
    IfAbsent,
    IfExists,
}

fn exec_get(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    match get_as_string(db, &key) {
        Err(e) => e,
        Ok(None) => Reply::Null,
        Ok(Some(data)) => Reply::Bulk(data),
    }
}

fn exec_set(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let value = args[1].clone();

    let mut policy = SetPolicy::Upsert;
    let mut ttl_ms: Option<u64> = None;

    let mut i = 2;
    while i < args.len() {
        match arg_str(&args[i]).to_ascii_uppercase().as_str() {
            "NX" if policy == SetPolicy::Upsert => policy = SetPolicy::IfAbsent,
            "XX" if policy == SetPolicy::Upsert => policy = SetPolicy::IfExists,
            unit @ ("EX" | "PX") => {
                if ttl_ms.is_some() || i + 1 >= args.len() {
                    return Reply::error("ERR syntax error");
                }
                let Some(n) = parse_i64(&args[i + 1]).filter(|n| *n > 0) else {
                    return Reply::error("ERR invalid expire time in 'set' command");
                };
                ttl_ms = Some(if unit == "EX" {
                    (n as u64) * 1000
                } else {
                    n as u64
                });
                i += 1;
            }
            _ => return Reply::error("ERR syntax error"),
        }
        i += 1;
    }

    let stored = match policy {
        SetPolicy::Upsert => {
            db.put_entity(key.clone(), Value::String(value.clone()));
            true
        }
        SetPolicy::IfAbsent => db.put_if_absent(key.clone(), Value::String(value.clone())) > 0,
        SetPolicy::IfExists => db.put_if_exists(key.clone(), Value::String(value.clone())) > 0,
    };
    if !stored {
        return Reply::Null;
    }

    // a plain SET discards any previous deadline
    match ttl_ms {
        Some(ms) => {
            let deadline = unix_now_ms() + ms;
            db.set_expiry(&key, deadline);
            db.add_aof(vec![Bytes::from_static(b"SET"), args[0].clone(), value]);
            db.add_aof(cmd_line(&["PEXPIREAT", &key, &deadline.to_string()]));
        }
        None => {
            db.persist_key(&key);
            db.add_aof(vec![Bytes::from_static(b"SET"), args[0].clone(), value]);
        }
    }
    Reply::ok()
}

fn exec_setnx(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let inserted = db.put_if_absent(key, Value::String(args[1].clone()));
    if inserted > 0 {
        db.add_aof(vec![
            Bytes::from_static(b"SET"),
            args[0].clone(),
            args[1].clone(),
        ]);
    }
    Reply::Integer(inserted as i64)
}

fn exec_setex(db: &Db, args: &[Bytes]) -> Reply {
    set_with_ttl(db, args, 1000, "setex")
}

fn exec_psetex(db: &Db, args: &[Bytes]) -> Reply {
    set_with_ttl(db, args, 1, "psetex")
}

fn set_with_ttl(db: &Db, args: &[Bytes], unit_ms: u64, cmd: &str) -> Reply {
    let key = arg_str(&args[0]);
    let Some(n) = parse_i64(&args[1]).filter(|n| *n > 0) else {
        return Reply::error(format!("ERR invalid expire time in '{cmd}' command"));
    };
    let value = args[2].clone();
    let deadline = unix_now_ms() + (n as u64) * unit_ms;

    db.put_entity(key.clone(), Value::String(value.clone()));
    db.set_expiry(&key, deadline);
    db.add_aof(vec![Bytes::from_static(b"SET"), args[0].clone(), value]);
    db.add_aof(cmd_line(&["PEXPIREAT", &key, &deadline.to_string()]));
    Reply::ok()
}

fn exec_getset(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let old = match get_as_string(db, &key) {
        Err(e) => return e,
        Ok(v) => v,
    };
    db.put_entity(key.clone(), Value::String(args[1].clone()));
    db.persist_key(&key);
    db.add_aof(vec![
        Bytes::from_static(b"SET"),
        args[0].clone(),
        args[1].clone(),
    ]);
    old.map_or(Reply::Null, Reply::Bulk)
}

fn exec_mset(db: &Db, args: &[Bytes]) -> Reply {
    if args.len() % 2 != 0 {
        return Reply::arg_num_error("mset");
    }
    for pair in args.chunks_exact(2) {
        db.put_entity(arg_str(&pair[0]), Value::String(pair[1].clone()));
    }
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"MSET")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::ok()
}

fn exec_msetnx(db: &Db, args: &[Bytes]) -> Reply {
    if args.len() % 2 != 0 {
        return Reply::arg_num_error("msetnx");
    }
    // all-or-nothing: a single existing key blocks every write
    for pair in args.chunks_exact(2) {
        if db.get_entity(&arg_str(&pair[0])).is_some() {
            return Reply::Integer(0);
        }
    }
    for pair in args.chunks_exact(2) {
        db.put_entity(arg_str(&pair[0]), Value::String(pair[1].clone()));
    }
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"MSET")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(1)
}

fn exec_mget(db: &Db, args: &[Bytes]) -> Reply {
    Reply::multi_bulk_opt(args.iter().map(|raw| {
        let key = arg_str(raw);
        match get_as_string(db, &key) {
            Ok(v) => v,
            // MGET reports wrong-typed keys as missing
            Err(_) => None,
        }
    }))
}

fn exec_incr(db: &Db, args: &[Bytes]) -> Reply {
    incr_by(db, args, 1, "INCR")
}

fn exec_decr(db: &Db, args: &[Bytes]) -> Reply {
    incr_by(db, args, -1, "DECR")
}

fn exec_incrby(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(delta) => incr_by(db, args, delta, "INCRBY"),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

fn exec_decrby(db: &Db, args: &[Bytes]) -> Reply {
    match parse_i64(&args[1]) {
        Some(delta) => incr_by(db, args, -delta, "DECRBY"),
        None => Reply::error("ERR value is not an integer or out of range"),
    }
}

fn incr_by(db: &Db, args: &[Bytes], delta: i64, name: &'static str) -> Reply {
    let key = arg_str(&args[0]);
    let current = match get_as_string(db, &key) {
        Err(e) => return e,
        Ok(Some(data)) => match parse_i64(&data) {
            Some(n) => n,
            None => return Reply::error("ERR value is not an integer or out of range"),
        },
        Ok(None) => 0,
    };
    let Some(next) = current.checked_add(delta) else {
        return Reply::error("ERR increment or decrement would overflow");
    };
    db.put_entity(key, Value::String(Bytes::from(next.to_string())));
    db.add_aof({
        let mut line = vec![Bytes::from_static(name.as_bytes())];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(next)
}

fn exec_strlen(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_string(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(data)) => Reply::Integer(data.len() as i64),
    }
}

fn exec_append(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let mut data = match get_as_string(db, &key) {
        Err(e) => return e,
        Ok(Some(data)) => data.to_vec(),
        Ok(None) => Vec::new(),
    };
    data.extend_from_slice(&args[1]);
    let len = data.len();
    db.put_entity(key, Value::String(Bytes::from(data)));
    db.add_aof(vec![
        Bytes::from_static(b"APPEND"),
        args[0].clone(),
        args[1].clone(),
    ]);
    Reply::Integer(len as i64)
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
    fn set_get_round_trip() {
        let db = db();
        assert_eq!(run(&db, &["SET", "k", "v"]), Reply::ok());
        assert_eq!(run(&db, &["GET", "k"]), Reply::Bulk(Bytes::from("v")));
        assert_eq!(run(&db, &["GET", "missing"]), Reply::Null);
    }

    #[test]
    fn set_nx_and_xx_flags() {
        let db = db();
        assert_eq!(run(&db, &["SET", "k", "1", "XX"]), Reply::Null);
        assert_eq!(run(&db, &["SET", "k", "1", "NX"]), Reply::ok());
        assert_eq!(run(&db, &["SET", "k", "2", "NX"]), Reply::Null);
        assert_eq!(run(&db, &["SET", "k", "2", "XX"]), Reply::ok());
        assert_eq!(run(&db, &["GET", "k"]), Reply::Bulk(Bytes::from("2")));
    }

    #[test]
    fn set_with_ttl_records_deadline() {
        let db = db();
        run(&db, &["SET", "k", "v", "PX", "60000"]);
        assert!(db.expiry_ms("k").is_some());
        // a plain SET wipes the deadline again
        run(&db, &["SET", "k", "v2"]);
        assert!(db.expiry_ms("k").is_none());
    }

    #[test]
    fn set_rejects_bad_syntax() {
        let db = db();
        assert!(run(&db, &["SET", "k", "v", "BOGUS"]).is_error());
        assert!(run(&db, &["SET", "k", "v", "EX"]).is_error());
        assert!(run(&db, &["SET", "k", "v", "EX", "0"]).is_error());
        assert!(run(&db, &["SET", "k", "v", "EX", "ten"]).is_error());
    }

    #[test]
    fn setnx_only_first_wins() {
        let db = db();
        assert_eq!(run(&db, &["SETNX", "k", "a"]), Reply::Integer(1));
        assert_eq!(run(&db, &["SETNX", "k", "b"]), Reply::Integer(0));
        assert_eq!(run(&db, &["GET", "k"]), Reply::Bulk(Bytes::from("a")));
    }

    #[test]
    fn setex_requires_positive_ttl() {
        let db = db();
        assert!(run(&db, &["SETEX", "k", "0", "v"]).is_error());
        assert_eq!(run(&db, &["SETEX", "k", "100", "v"]), Reply::ok());
        assert!(db.expiry_ms("k").is_some());
    }

    #[test]
    fn getset_returns_old_value() {
        let db = db();
        assert_eq!(run(&db, &["GETSET", "k", "new"]), Reply::Null);
        assert_eq!(
            run(&db, &["GETSET", "k", "newer"]),
            Reply::Bulk(Bytes::from("new"))
        );
    }

    #[test]
    fn mset_mget() {
        let db = db();
        assert_eq!(run(&db, &["MSET", "a", "1", "b", "2"]), Reply::ok());
        assert_eq!(
            run(&db, &["MGET", "a", "b", "c"]),
            Reply::multi_bulk_opt([
                Some(Bytes::from("1")),
                Some(Bytes::from("2")),
                None
            ])
        );
    }

    #[test]
    fn msetnx_all_or_nothing() {
        let db = db();
        run(&db, &["SET", "b", "taken"]);
        assert_eq!(run(&db, &["MSETNX", "a", "1", "b", "2"]), Reply::Integer(0));
        assert_eq!(run(&db, &["GET", "a"]), Reply::Null);
        assert_eq!(run(&db, &["MSETNX", "x", "1", "y", "2"]), Reply::Integer(1));
    }

    #[test]
    fn incr_decr_family() {
        let db = db();
        assert_eq!(run(&db, &["INCR", "n"]), Reply::Integer(1));
        assert_eq!(run(&db, &["INCRBY", "n", "9"]), Reply::Integer(10));
        assert_eq!(run(&db, &["DECR", "n"]), Reply::Integer(9));
        assert_eq!(run(&db, &["DECRBY", "n", "4"]), Reply::Integer(5));
    }

    #[test]
    fn incr_rejects_non_integers_and_overflow() {
        let db = db();
        run(&db, &["SET", "s", "abc"]);
        assert!(run(&db, &["INCR", "s"]).is_error());
        run(&db, &["SET", "big", &i64::MAX.to_string()]);
        assert!(run(&db, &["INCR", "big"]).is_error());
    }

    #[test]
    fn wrong_type_is_reported() {
        let db = db();
        run(&db, &["RPUSH", "l", "x"]);
        assert_eq!(run(&db, &["GET", "l"]), Reply::wrong_type_error());
        assert_eq!(run(&db, &["INCR", "l"]), Reply::wrong_type_error());
    }

    #[test]
    fn append_and_strlen() {
        let db = db();
        assert_eq!(run(&db, &["APPEND", "k", "abc"]), Reply::Integer(3));
        assert_eq!(run(&db, &["APPEND", "k", "def"]), Reply::Integer(6));
        assert_eq!(run(&db, &["STRLEN", "k"]), Reply::Integer(6));
        assert_eq!(run(&db, &["STRLEN", "none"]), Reply::Integer(0));
    }
}
