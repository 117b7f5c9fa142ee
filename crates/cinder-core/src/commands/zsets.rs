//! Sorted-set commands.

use bytes::Bytes;
use cinder_protocol::Reply;

use super::{
    arg_str, format_float, get_as_zset, normalize_range, parse_f64, parse_i64, read_first_key,
    undo_first_key, write_first_key,
};
use crate::cmd::CommandTable;
use crate::db::Db;
use crate::types::Value;
use crate::zset::{ScoreBound, SortedSet};

pub fn register(table: &mut CommandTable) {
    table.register("zadd", exec_zadd, write_first_key, Some(undo_first_key), -4);
    table.register("zscore", exec_zscore, read_first_key, None, 3);
    table.register("zincrby", exec_zincrby, write_first_key, Some(undo_first_key), 4);
    table.register("zcard", exec_zcard, read_first_key, None, 2);
    table.register("zrank", exec_zrank, read_first_key, None, 3);
    table.register("zrevrank", exec_zrevrank, read_first_key, None, 3);
    table.register("zcount", exec_zcount, read_first_key, None, 4);
    table.register("zrange", exec_zrange, read_first_key, None, -4);
    table.register("zrevrange", exec_zrevrange, read_first_key, None, -4);
    table.register("zrangebyscore", exec_zrangebyscore, read_first_key, None, -4);
    table.register(
        "zrevrangebyscore",
        exec_zrevrangebyscore,
        read_first_key,
        None,
        -4,
    );
    table.register("zrem", exec_zrem, write_first_key, Some(undo_first_key), -3);
    table.register(
        "zremrangebyscore",
        exec_zremrangebyscore,
        write_first_key,
        Some(undo_first_key),
        4,
    );
    table.register(
        "zremrangebyrank",
        exec_zremrangebyrank,
        write_first_key,
        Some(undo_first_key),
        4,
    );
}

fn score_error() -> Reply {
    Reply::error("ERR value is not a valid float")
}

fn bound_error() -> Reply {
    Reply::error("ERR min or max is not a float")
}

fn int_error() -> Reply {
    Reply::error("ERR value is not an integer or out of range")
}

fn parse_bounds(min_raw: &Bytes, max_raw: &Bytes) -> Option<(ScoreBound, ScoreBound)> {
    let min = ScoreBound::parse(&arg_str(min_raw))?;
    let max = ScoreBound::parse(&arg_str(max_raw))?;
    Some((min, max))
}

/// Builds the reply for a list of (member, score) pairs, with scores
/// interleaved when requested.
fn pairs_reply(pairs: Vec<(String, f64)>, with_scores: bool) -> Reply {
    if with_scores {
        Reply::multi_bulk(pairs.into_iter().flat_map(|(m, s)| {
            [Bytes::from(m), Bytes::from(format_float(s))]
        }))
    } else {
        Reply::multi_bulk(pairs.into_iter().map(|(m, _)| Bytes::from(m)))
    }
}

fn with_scores_flag(args: &[Bytes], fixed: usize, cmd: &str) -> Result<bool, Reply> {
    match args.len() - fixed {
        0 => Ok(false),
        1 if arg_str(&args[fixed]).eq_ignore_ascii_case("WITHSCORES") => Ok(true),
        _ => Err(Reply::arg_num_error(cmd)),
    }
}

fn exec_zadd(db: &Db, args: &[Bytes]) -> Reply {
    if (args.len() - 1) % 2 != 0 {
        return Reply::arg_num_error("zadd");
    }
    let key = arg_str(&args[0]);
    let mut zset = match get_as_zset(db, &key) {
        Err(e) => return e,
        Ok(z) => z.unwrap_or_default(),
    };

    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for chunk in args[1..].chunks_exact(2) {
        let Some(score) = parse_f64(&chunk[0]) else {
            return score_error();
        };
        pairs.push((arg_str(&chunk[1]), score));
    }

    let mut added = 0;
    for (member, score) in pairs {
        if zset.add(member, score) {
            added += 1;
        }
    }
    db.put_entity(key, Value::SortedSet(zset));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"ZADD")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Integer(added)
}

fn exec_zscore(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Null,
        Ok(Some(zset)) => zset
            .score(&arg_str(&args[1]))
            .map_or(Reply::Null, |s| Reply::Bulk(Bytes::from(format_float(s)))),
    }
}

fn exec_zincrby(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let Some(delta) = parse_f64(&args[1]) else {
        return score_error();
    };
    let member = arg_str(&args[2]);

    let mut zset = match get_as_zset(db, &key) {
        Err(e) => return e,
        Ok(z) => z.unwrap_or_default(),
    };
    let next = zset.score(&member).unwrap_or(0.0) + delta;
    if next.is_nan() {
        return Reply::error("ERR resulting score is not a number (NaN)");
    }
    zset.add(member, next);
    db.put_entity(key, Value::SortedSet(zset));
    db.add_aof({
        let mut line = vec![Bytes::from_static(b"ZINCRBY")];
        line.extend(args.iter().cloned());
        line
    });
    Reply::Bulk(Bytes::from(format_float(next)))
}

fn exec_zcard(db: &Db, args: &[Bytes]) -> Reply {
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(zset)) => Reply::Integer(zset.len() as i64),
    }
}

fn rank_reply(db: &Db, args: &[Bytes], desc: bool) -> Reply {
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Null,
        Ok(Some(zset)) => zset
            .rank(&arg_str(&args[1]), desc)
            .map_or(Reply::Null, |r| Reply::Integer(r as i64)),
    }
}

fn exec_zrank(db: &Db, args: &[Bytes]) -> Reply {
    rank_reply(db, args, false)
}

fn exec_zrevrank(db: &Db, args: &[Bytes]) -> Reply {
    rank_reply(db, args, true)
}

fn exec_zcount(db: &Db, args: &[Bytes]) -> Reply {
    let Some((min, max)) = parse_bounds(&args[1], &args[2]) else {
        return bound_error();
    };
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Integer(0),
        Ok(Some(zset)) => Reply::Integer(zset.count(&min, &max) as i64),
    }
}

fn rank_range(db: &Db, args: &[Bytes], desc: bool, cmd: &str) -> Reply {
    let with_scores = match with_scores_flag(args, 3, cmd) {
        Err(e) => return e,
        Ok(flag) => flag,
    };
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return int_error();
    };
    let zset = match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => return e,
        Ok(None) => return Reply::Array(Vec::new()),
        Ok(Some(z)) => z,
    };
    match normalize_range(start, stop, zset.len() as i64) {
        None => Reply::Array(Vec::new()),
        Some((s, e)) => {
            let pairs = zset.range_by_rank(s as u64, (e + 1) as u64, desc);
            pairs_reply(pairs, with_scores)
        }
    }
}

fn exec_zrange(db: &Db, args: &[Bytes]) -> Reply {
    rank_range(db, args, false, "zrange")
}

fn exec_zrevrange(db: &Db, args: &[Bytes]) -> Reply {
    rank_range(db, args, true, "zrevrange")
}

fn exec_zrangebyscore(db: &Db, args: &[Bytes]) -> Reply {
    let with_scores = match with_scores_flag(args, 3, "zrangebyscore") {
        Err(e) => return e,
        Ok(flag) => flag,
    };
    let Some((min, max)) = parse_bounds(&args[1], &args[2]) else {
        return bound_error();
    };
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(zset)) => pairs_reply(zset.range_by_score(&min, &max, false), with_scores),
    }
}

fn exec_zrevrangebyscore(db: &Db, args: &[Bytes]) -> Reply {
    let with_scores = match with_scores_flag(args, 3, "zrevrangebyscore") {
        Err(e) => return e,
        Ok(flag) => flag,
    };
    // the descending form names the max bound first
    let Some((max, min)) = parse_bounds(&args[1], &args[2]) else {
        return bound_error();
    };
    match get_as_zset(db, &arg_str(&args[0])) {
        Err(e) => e,
        Ok(None) => Reply::Array(Vec::new()),
        Ok(Some(zset)) => pairs_reply(zset.range_by_score(&min, &max, true), with_scores),
    }
}

fn exec_zrem(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let mut zset = match get_as_zset(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(z)) => z,
    };
    let mut removed = 0;
    for member in &args[1..] {
        if zset.remove(&arg_str(member)) {
            removed += 1;
        }
    }
    if removed > 0 {
        if zset.is_empty() {
            db.remove(&key);
        } else {
            db.put_entity(key, Value::SortedSet(zset));
        }
        db.add_aof({
            let mut line = vec![Bytes::from_static(b"ZREM")];
            line.extend(args.iter().cloned());
            line
        });
    }
    Reply::Integer(removed)
}

fn store_after_removal(db: &Db, key: String, zset: SortedSet, args: &[Bytes], name: &'static str) {
    if zset.is_empty() {
        db.remove(&key);
    } else {
        db.put_entity(key, Value::SortedSet(zset));
    }
    db.add_aof({
        let mut line = vec![Bytes::from_static(name.as_bytes())];
        line.extend(args.iter().cloned());
        line
    });
}

fn exec_zremrangebyscore(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let Some((min, max)) = parse_bounds(&args[1], &args[2]) else {
        return bound_error();
    };
    let mut zset = match get_as_zset(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(z)) => z,
    };
    let removed = zset.remove_range_by_score(&min, &max).len();
    if removed > 0 {
        store_after_removal(db, key, zset, args, "ZREMRANGEBYSCORE");
    }
    Reply::Integer(removed as i64)
}

fn exec_zremrangebyrank(db: &Db, args: &[Bytes]) -> Reply {
    let key = arg_str(&args[0]);
    let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
        return int_error();
    };
    let mut zset = match get_as_zset(db, &key) {
        Err(e) => return e,
        Ok(None) => return Reply::Integer(0),
        Ok(Some(z)) => z,
    };
    let removed = match normalize_range(start, stop, zset.len() as i64) {
        None => 0,
        Some((s, e)) => zset.remove_range_by_rank(s as u64, (e + 1) as u64).len(),
    };
    if removed > 0 {
        store_after_removal(db, key, zset, args, "ZREMRANGEBYRANK");
    }
    Reply::Integer(removed as i64)
}
