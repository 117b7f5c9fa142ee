//! Hash commands.

use ahash::AHashMap;
use bytes::Bytes;
use cinder_protocol::Reply;

use super::{
    arg_str, get_as_hash, parse_i64, read_first_key, undo_first_key, write_first_key,
};
use crate::cmd::CommandTable;
use crate::db::Db;
use crate::types::Value;

pub fn register(table: &mut CommandTable) {
    table.register("hset", exec_hset, write_first_key, Some(undo_first_key), -4);
    table.register("hsetnx", exec_hsetnx, write_first_key, Some(undo_first_key), 4);
    table.register("hget", exec_hget, read_first_key, None, 3);
    table.register("hexists", exec_hexists, read_first_key, None, 3);
    table.register("hdel", exec_hdel, write_first_key, Some(undo_first_key), -3);
    table.register("hlen", exec_hlen, read_first_key, None, 2);
    table.register("hmget", exec_hmget, read_first_key, None, -3);
    table.register("hkeys", exec_hkeys, read_first_key, None, 2);
    table.register("hvals", exec_hvals, read_first_key, None, 2);
    table.register("hgetall", exec_hgetall, read_first_key, None, 2);
    table.register("hincrby", exec_hincrby, write_first_key, Some(undo_first_key), 4);
}

fn exec_hset(db: &Db, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return Reply::arg_num_error("hset");
    }
    let key = arg_str(&args[0]);
    let mut map = match get_as_hash(db, &key) {
        Err(e) => return e,
        Ok(map) => map.unwrap_or_default(),
    };

    let mut added = 0;
    for pair in args[1..].chunks_exact(2) {
        if map.insert(arg_str(&pair[0]), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    db.put_entity(key, Value::Hash(map));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"HSET")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(added)
}

fn exec_hsetnx(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    let mut map = match get_as_hash(db, &key) {
        Err(e) => return e,
        Ok(map) => map.unwrap_or_default(),
    };
    if map.contains_key(&field) {
        return Reply::Integer(0);
    }
    map.insert(field, args[2].clone());
    db.put_entity(key, Value::Hash(map));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"HSET")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(1)
}

fn exec_hget(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Null,
        Ok(Some(map)) => map
            .get(&arg_str(&args[1]))
            .cloned()
            .map_or(Reply::Null, Reply::Bulk),
    }
}

fn exec_hexists(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(map)) => Reply::Integer(map.contains_key(&arg_str(&args[1])) as i64),
    }
}

fn exec_hdel(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let mut map = match get_as_hash(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(map)) => map,
    };

    let mut removed = 0;
    for field in &args[1..] {
        if map.remove(&arg_str(field)).is_some() {
            removed += 1;
        }
    }
    if removed > 0 {
        // dropping the last field removes the key itself
        if map.is_empty() {
            db.remove(&key);
        } else {
            db.put_entity(key, Value::Hash(map));
        }
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"HDEL")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(removed)
}

fn exec_hlen(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(map)) => Reply::Integer(map.len() as i64),
    }
}

fn exec_hmget(db: &Db, args: &[Bytes]) -> Reply {
    let map = match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => return e,
        Ok(map) => map.unwrap_or_default(),
    };
    Reply::multi_bulk_opt(args[1..].iter().map(|f| map.get(&arg_str(f)).cloned()))
}

/// Field listings are sorted so replies are deterministic.
fn sorted_fields(map: &AHashMap<String, Bytes>) -> Vec<String> {
    let mut fields: Vec<String> = map.keys().cloned().collect();
    fields.sort();
    fields
}

fn exec_hkeys(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(map)) => {
            Reply::multi_bulk(sorted_fields(&map).into_iter().map(Bytes::from))
        }
    }
}

fn exec_hvals(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(map)) => Reply::multi_bulk(
            sorted_fields(&map)
                .into_iter()
                .map(|f| map[&f].clone()),
        ),
    }
}

fn exec_hgetall(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_hash(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(map)) => {
            let mut items = Vec::with_capacity(map.len() * 2);
            for field in sorted_fields(&map) {
                items.push(Bytes::from(field.clone()));
                items.push(map[&field].clone());
            }
            Reply::multi_bulk(items)
        }
    }
}

fn exec_hincrby(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let field = arg_str(&args[1]);
    let Some(delta) = parse_i64(&args[2]) else {
        return Reply::error("ERR value is not an integer or out of range");
    };

    let mut map = match get_as_hash(db, &key) {
        Err(e) => return e,
        Ok(map) => map.unwrap_or_default(),
    };
    let current = match map.get(&field) {
        Some(raw) => match parse_i64(raw) {
            Some(n) => n,
            None => return Reply::error("ERR hash value is not an integer"),
        },
        None => 0,
    };
    let Some(next) = current.checked_add(delta) else {
        return Reply::error("ERR increment or decrement would overflow");
    };
    map.insert(field, Bytes::from(next.to_string()));
    db.put_entity(key, Value::Hash(map));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"HINCRBY")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(next)
}
