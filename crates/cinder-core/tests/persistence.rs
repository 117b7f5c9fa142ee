//! End-to-end persistence: write through the router, restart, replay.

use std::sync::Arc;

use bytes::Bytes;
use cinder_core::{Connection, Router, RouterConfig, VirtualConnection};
use cinder_persistence::LogReader;
use cinder_protocol::{cmd_line, Reply};

fn conn() -> Arc<dyn Connection> {
    Arc::new(VirtualConnection::new())
}

fn router_with_aof(path: &std::path::Path) -> Router {
    Router::standalone(RouterConfig {
        aof_path: Some(path.to_path_buf()),
        ..Default::default()
    })
    .unwrap()
}

fn run(r: &Router, c: &Arc<dyn Connection>, parts: &[&str]) -> Reply {
    r.exec(c, &cmd_line(parts))
}

/// Reads the raw record stream back out of the log file.
fn log_records(path: &std::path::Path) -> Vec<Vec<String>> {
    let mut reader = LogReader::open(path, None).unwrap().unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        let line = record.into_cmd_line().expect("log holds command arrays");
        records.push(
            line.iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect(),
        );
    }
    records
}

#[test]
fn restart_reproduces_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let router = router_with_aof(&path);
        let c = conn();
        run(&router, &c, &["SET", "name", "ada"]);
        run(&router, &c, &["RPUSH", "langs", "rust", "go"]);
        run(&router, &c, &["HSET", "h", "f", "v"]);
        run(&router, &c, &["SADD", "s", "m1", "m2"]);
        run(&router, &c, &["ZADD", "z", "1.5", "alpha"]);
        run(&router, &c, &["SET", "tmp", "gone"]);
        run(&router, &c, &["DEL", "tmp"]);
        router.close();
    }

    let router = router_with_aof(&path);
    let c = conn();
    assert_eq!(run(&router, &c, &["GET", "name"]), Reply::Bulk(Bytes::from("ada")));
    assert_eq!(
        run(&router, &c, &["LRANGE", "langs", "0", "-1"]),
        Reply::multi_bulk([Bytes::from("rust"), Bytes::from("go")])
    );
    assert_eq!(run(&router, &c, &["HGET", "h", "f"]), Reply::Bulk(Bytes::from("v")));
    assert_eq!(run(&router, &c, &["SCARD", "s"]), Reply::Integer(2));
    assert_eq!(
        run(&router, &c, &["ZSCORE", "z", "alpha"]),
        Reply::Bulk(Bytes::from("1.5"))
    );
    assert_eq!(run(&router, &c, &["GET", "tmp"]), Reply::Null);
    router.close();
}

#[test]
fn transaction_records_written_only_on_exec() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let router = router_with_aof(&path);
        let c = conn();
        run(&router, &c, &["SET", "a", "1"]);
        run(&router, &c, &["MULTI"]);
        assert_eq!(run(&router, &c, &["SET", "a", "2"]), Reply::queued());
        let exec = run(&router, &c, &["EXEC"]);
        assert_eq!(exec, Reply::Array(vec![Reply::ok()]));
        router.close();
    }

    // the queue-time echo left no record; the log is exactly the two
    // applied writes in order
    assert_eq!(
        log_records(&path),
        vec![
            vec!["SET".to_string(), "a".to_string(), "1".to_string()],
            vec!["SET".to_string(), "a".to_string(), "2".to_string()],
        ]
    );

    let router = router_with_aof(&path);
    let c = conn();
    assert_eq!(run(&router, &c, &["GET", "a"]), Reply::Bulk(Bytes::from("2")));
    router.close();
}

#[test]
fn cross_database_records_carry_select() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let router = router_with_aof(&path);
        let c = conn();
        run(&router, &c, &["SET", "k", "zero"]);
        run(&router, &c, &["SELECT", "3"]);
        run(&router, &c, &["SET", "k", "three"]);
        router.close();
    }

    let records = log_records(&path);
    assert_eq!(
        records,
        vec![
            vec!["SET".to_string(), "k".to_string(), "zero".to_string()],
            vec!["SELECT".to_string(), "3".to_string()],
            vec!["SET".to_string(), "k".to_string(), "three".to_string()],
        ]
    );

    let router = router_with_aof(&path);
    let c = conn();
    assert_eq!(run(&router, &c, &["GET", "k"]), Reply::Bulk(Bytes::from("zero")));
    run(&router, &c, &["SELECT", "3"]);
    assert_eq!(run(&router, &c, &["GET", "k"]), Reply::Bulk(Bytes::from("three")));
    router.close();
}

#[test]
fn relative_ttls_replay_as_absolute_deadlines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let router = router_with_aof(&path);
        let c = conn();
        run(&router, &c, &["SET", "k", "v"]);
        run(&router, &c, &["EXPIRE", "k", "3600"]);
        router.close();
    }

    let records = log_records(&path);
    assert_eq!(records[1][0], "PEXPIREAT");

    let router = router_with_aof(&path);
    let c = conn();
    // still alive, still carrying a deadline about an hour out
    assert_eq!(run(&router, &c, &["GET", "k"]), Reply::Bulk(Bytes::from("v")));
    match run(&router, &c, &["TTL", "k"]) {
        Reply::Integer(secs) => assert!((3000..=3600).contains(&secs)),
        other => panic!("unexpected TTL reply: {other:?}"),
    }
    router.close();
}

#[test]
fn rewrite_compacts_and_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let seeder = router_with_aof(&path);
        let c = conn();
        // churn: many overwritten and deleted keys, little live state
        for i in 0..50 {
            run(&seeder, &c, &["SET", "hot", &format!("v{i}")]);
            run(&seeder, &c, &["SET", &format!("tmp:{i}"), "x"]);
            run(&seeder, &c, &["DEL", &format!("tmp:{i}")]);
        }
        run(&seeder, &c, &["RPUSH", "l", "a", "b", "c"]);
        // close drains the write queue so the measurement below sees
        // every churn record
        seeder.close();
    }
    let before = std::fs::metadata(&path).unwrap().len();

    let router = router_with_aof(&path);
    let c = conn();
    assert_eq!(
        run(&router, &c, &["REWRITEAOF"]),
        Reply::Simple("Append only file rewriting completed".into())
    );
    let after = std::fs::metadata(&path).unwrap().len();
    assert!(after < before, "rewrite must shrink the log ({before} -> {after})");

    // writes after the rewrite land in the new log
    run(&router, &c, &["SET", "post", "rewrite"]);
    router.close();

    let reopened = router_with_aof(&path);
    let c2 = conn();
    assert_eq!(run(&reopened, &c2, &["GET", "hot"]), Reply::Bulk(Bytes::from("v49")));
    assert_eq!(run(&reopened, &c2, &["GET", "post"]), Reply::Bulk(Bytes::from("rewrite")));
    assert_eq!(run(&reopened, &c2, &["EXISTS", "tmp:7"]), Reply::Integer(0));
    assert_eq!(
        run(&reopened, &c2, &["LRANGE", "l", "0", "-1"]),
        Reply::multi_bulk([Bytes::from("a"), Bytes::from("b"), Bytes::from("c")])
    );
    reopened.close();
}

#[test]
fn flushall_is_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cinder.aof");

    {
        let router = router_with_aof(&path);
        let c = conn();
        run(&router, &c, &["SET", "gone", "1"]);
        run(&router, &c, &["FLUSHALL"]);
        run(&router, &c, &["SET", "kept", "2"]);
        router.close();
    }

    let router = router_with_aof(&path);
    let c = conn();
    assert_eq!(run(&router, &c, &["GET", "gone"]), Reply::Null);
    assert_eq!(run(&router, &c, &["GET", "kept"]), Reply::Bulk(Bytes::from("2")));
    router.close();
}
