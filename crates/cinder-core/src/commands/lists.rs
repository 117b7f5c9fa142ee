//! List commands.

use std::collections::VecDeque;

use bytes::Bytes;
use cinder_protocol::Reply;

use super::{
    arg_str, get_as_list, normalize_range, parse_i64, read_first_key, undo_first_key,
    write_first_key,
};
use crate::cmd::CommandTable;
use crate::db::Db;
use crate::types::Value;

pub fn register(table: &mut CommandTable) {
    table.register("lpush", exec_lpush, write_first_key, Some(undo_first_key), -3);
    table.register("lpushx", exec_lpushx, write_first_key, Some(undo_first_key), -3);
    table.register("rpush", exec_rpush, write_first_key, Some(undo_first_key), -3);
    table.register("rpushx", exec_rpushx, write_first_key, Some(undo_first_key), -3);
    table.register("lpop", exec_lpop, write_first_key, Some(undo_first_key), 2);
    table.register("rpop", exec_rpop, write_first_key, Some(undo_first_key), 2);
    table.register("llen", exec_llen, read_first_key, None, 2);
    table.register("lindex", exec_lindex, read_first_key, None, 3);
    table.register("lset", exec_lset, write_first_key, Some(undo_first_key), 4);
    table.register("lrange", exec_lrange, read_first_key, None, 4);
    table.register("lrem", exec_lrem, write_first_key, Some(undo_first_key), 4);
}

fn push(db: &Db, args: &[Bytes], front: bool, require_existing: bool, name: &'static str) -> Reply {
    let key = arg_str(&args[0]);
    let mut list = match get_as_list(db, &key) {
        Err(e) => return e,
        Ok(Some(list)) => list,
        Ok(None) => {
            if require_existing {
                return Reply::Integer(0);
            }
            VecDeque::new()
        }
    };

    for item in &args[1..] {
        if front {
            list.push_front(item.clone());
        } else {
            list.push_back(item.clone());
        }
    }
    let len = list.len();
    db.put_entity(key, Value::List(list));
    db.add_aof({
        let mut line = vec![Bytes::from_static(name.as_bytes())];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(len as i64)
}

fn exec_lpush(db: &Db, args: &[Bytes]) -> Reply {
    push(db, args, true, false, "LPUSH")
}

fn exec_lpushx(db: &Db, args: &[Bytes]) -> Reply {
    push(db, args, true, true, "LPUSH")
}

fn exec_rpush(db: &Db, args: &[Bytes]) -> Reply {
    push(db, args, false, false, "RPUSH")
}

fn exec_rpushx(db: &Db, args: &[Bytes]) -> Reply {
    push(db, args, false, true, "RPUSH")
}

fn pop(db: &Db, args: &[Bytes], front: bool, name: &'static str) -> Reply {
    let key = arg_str(&args[0]);
    let mut list = match get_as_list(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Null,
        Ok(Some(list)) => list,
    };

    let taken = if front {
        list.pop_front()
    } else {
        list.pop_back()
    };
    let Some(item) = taken else {
        return Reply::Null;
    };
    // an emptied list disappears with its key
    if list.is_empty() {
        db.remove(&key);
    } else {
        db.put_entity(key, Value::List(list));
    }
    db.add_aof(vec![Bytes::from_static(name.as_bytes()), args[0].clone()]);
    Reply::Bulk(item)
}

fn exec_lpop(db: &Db, args: &[Bytes]) -> Reply {
    pop(db, args, true, "LPOP")
}

fn exec_rpop(db: &Db, args: &[Bytes]) -> Reply {
    pop(db, args, false, "RPOP")
}

fn exec_llen(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_list(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(list)) => Reply::Integer(list.len() as i64),
    }
}

fn exec_lindex(db: &Db, args: &[Bytes]) -> Reply {
    let Some(index) = parse_i64(&args[1]) else {
        return Reply::error("ERR value is not an integer or out of range");
    };
    let list = match get_as_list(db, &arg_str(&args[0])) {
        Err(e) => return e,
        Ok(None) => return Reply::Null,
        Ok(Some(list)) => list,
    };
    let len = list.len() as i64;
    let pos = if index < 0 { len + index } else { index };
    if pos < 0 || pos >= len {
        return Reply::Null;
    }
    Reply::Bulk(list[pos as usize].clone())
}

fn exec_lset(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let Some(index) = parse_i64(&args[1]) else {
        return Reply::error("ERR value is not an integer or out of range");
    };
    let mut list = match get_as_list(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::error("ERR no such key"),
        Ok(Some(list)) => list,
    };
    let len = list.len() as i64;
    let pos = if index < 0 { len + index } else { index };
    if pos < 0 || pos >= len {
        return Reply::error("ERR index out of range");
    }
    list[pos as usize] = args[2].clone();
    db.put_entity(key, Value::List(list));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"LSET")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::ok()
}

fn exec_lrange(db: &Db, args: &[Bytes]) -> Reply {
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return Reply::error("ERR value is not an integer or out of range");
    };
    let list = match get_as_list(db, &arg_str(&args[0])) {
        Err(e) => return e,
        Ok(None) => return Reply::Array(Vec::new()),
        Ok(Some(list)) => list,
    };
    match normalize_range(start, stop, list.len() as i64) {
        None => Reply::Array(Vec::new()),
        Some((s, e)) => Reply::multi_bulk(list.iter().skip(s).take(e - s + 1).cloned()),
    }
}

fn exec_lrem(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let Some(count) = parse_i64(&args[1]) else {
        return Reply::error("ERR value is not an integer or out of range");
    };
    let target = &args[2];
    let list = match get_as_list(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(list)) => list,
    };

    // count > 0: first n from the head; count < 0: first n from the
    // tail; count == 0: all occurrences
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs() as usize
    };
    let from_tail = count < 0;

    let mut removed = 0;
    let mut kept: VecDeque<Bytes> = VecDeque::with_capacity(list.len());
    let mut feed: Box<dyn Iterator<Item = Bytes>> = if from_tail {
        Box::new(list.into_iter().rev())
    } else {
        Box::new(list.into_iter())
    };
    for item in &mut feed {
        if removed < limit && item == *target {
            removed += 1;
        } else if from_tail {
            kept.push_front(item);
        } else {
            kept.push_back(item);
        }
    }

    if removed > 0 {
        if kept.is_empty() {
            db.remove(&key);
        } else {
            db.put_entity(key, Value::List(kept));
        }
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"LREM")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(removed as i64)
}
