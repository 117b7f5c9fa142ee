//! Set commands.
//!
//! Member listings in replies are sorted so output is deterministic
//! regardless of hash iteration order.

use ahash::AHashSet;
use bytes::Bytes;
use cinder_protocol::Reply;

use super::{arg_str, get_as_set, read_all_keys, read_first_key, undo_first_key, write_first_key};
use crate::cmd::CommandTable;
use crate::db::Db;
use crate::types::Value;

pub fn register(table: &mut CommandTable) {
    table.register("sadd", exec_sadd, write_first_key, Some(undo_first_key), -3);
    table.register("srem", exec_srem, write_first_key, Some(undo_first_key), -3);
    table.register("sismember", exec_sismember, read_first_key, None, 3);
    table.register("scard", exec_scard, read_first_key, None, 2);
    table.register("smembers", exec_smembers, read_first_key, None, 2);
    table.register("sinter", exec_sinter, read_all_keys, None, -2);
    table.register("sunion", exec_sunion, read_all_keys, None, -2);
    table.register("sdiff", exec_sdiff, read_all_keys, None, -2);
}

fn exec_sadd(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let mut set = match get_as_set(db, &key) {
        Err(e) => return e,
        Ok(set) => set.unwrap_or_default(),
    };
    let mut added = 0;
    for member in &args[1..] {
        if set.insert(arg_str(member)) {
            added += 1;
        }
    }
    db.put_entity(key, Value::Set(set));
    if added > 0 {
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"SADD")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(added)
}

fn exec_srem(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let mut set = match get_as_set(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(set)) => set,
    };
    let mut removed = 0;
    for member in &args[1..] {
        if set.remove(&arg_str(member)) {
            removed += 1;
        }
    }
    if removed > 0 {
        if set.is_empty() {
            db.remove(&key);
        } else {
            db.put_entity(key, Value::Set(set));
        }
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"SREM")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(removed)
}

fn exec_sismember(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_set(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(set)) => Reply::Integer(set.contains(&arg_str(&args[1])) as i64),
    }
}

fn exec_scard(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_set(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(set)) => Reply::Integer(set.len() as i64),
    }
}

fn members_reply(set: AHashSet<String>) -> Reply {
    let mut members: Vec<String> = set.into_iter().collect();
    members.sort();
    Reply::multi_bulk(members.into_iter().map(Bytes::from))
}

fn exec_smembers(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_set(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(set)) => members_reply(set),
    }
}

/// Loads each named key as a set, treating missing keys as empty.
fn load_sets(db: &Db, args: &[Bytes]) -> Result<Vec<AHashSet<String>>, Reply> {
    args.iter()
        .map(|raw| Ok(get_as_set(db, &arg_str(raw))?.unwrap_or_default()))
        .collect()
}

fn exec_sinter(db: &Db, args: &[Bytes]) -> Reply {
    let sets = match load_sets(db, args) {
        Err(e) => return e,
        Ok(sets) => sets,
    };
    let mut iter = sets.into_iter();
    let first = iter.next().unwrap_or_default();
    let result = iter.fold(first, |acc, s| {
        acc.into_iter().filter(|m| s.contains(m)).collect()
    });
    members_reply(result)
}

fn exec_sunion(db: &Db, args: &[Bytes]) -> Reply {
    let sets = match load_sets(db, args) {
        Err(e) => return e,
        Ok(sets) => sets,
    };
    let mut result = AHashSet::new();
    for set in sets {
        result.extend(set);
    }
    members_reply(result)
}

fn exec_sdiff(db: &Db, args: &[Bytes]) -> Reply {
    let sets = match load_sets(db, args) {
        Err(e) => return e,
        Ok(sets) => sets,
    };
    let mut iter = sets.into_iter();
    let first = iter.next().unwrap_or_default();
    let result = iter.fold(first, |acc, s| {
        acc.into_iter().filter(|m| !s.contains(m)).collect()
    });
    members_reply(result)
}
