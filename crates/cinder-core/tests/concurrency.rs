//! Concurrency behavior of a live database: parallel writers, hot-key
//! contention, and flush against in-flight traffic.

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use cinder_core::{cmd::CommandTable, Db};
use cinder_protocol::{cmd_line, Reply};

fn db() -> Arc<Db> {
    Db::concurrent(0, Arc::new(CommandTable::standard()), None)
}

#[test]
fn disjoint_parallel_writers_match_sequential_result() {
    let db = db();
    let mut handles = Vec::new();
    for t in 0..8 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let key = format!("t{t}:{i}");
                db.exec_normal(&cmd_line(&["SET", &key, "v"]));
                if i % 4 == 0 {
                    db.exec_normal(&cmd_line(&["DEL", &key]));
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let expected_per_thread = (0..200).filter(|i| i % 4 != 0).count();
    assert_eq!(db.key_count(), 8 * expected_per_thread);
}

#[test]
fn hot_key_increments_are_serialized() {
    let db = db();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for _ in 0..250 {
                let reply = db.exec_normal(&cmd_line(&["INCR", "counter"]));
                assert!(!reply.is_error());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        db.exec_normal(&cmd_line(&["GET", "counter"])),
        Reply::Bulk(Bytes::from((8 * 250).to_string()))
    );
    // exactly one version bump per increment
    assert_eq!(db.version("counter"), 8 * 250);
}

#[test]
fn flush_during_traffic_neither_deadlocks_nor_corrupts() {
    let db = db();
    let mut handles = Vec::new();
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..300 {
                db.exec_normal(&cmd_line(&["SET", &format!("w{t}:{i}"), "v"]));
                db.exec_normal(&cmd_line(&["GET", &format!("w{t}:{i}")]));
            }
        }));
    }
    let flusher = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..10 {
                db.flush();
                thread::yield_now();
            }
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    flusher.join().unwrap();

    // the database stays fully usable afterwards
    assert_eq!(db.exec_normal(&cmd_line(&["SET", "alive", "1"])), Reply::ok());
    db.flush();
    assert_eq!(db.key_count(), 0);
}

#[test]
fn multi_key_commands_across_threads_make_progress() {
    let db = db();
    let mut handles = Vec::new();
    for flip in 0..6 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                // overlapping multi-key writes in varying key order
                let (a, b) = (format!("k{}", i % 5), format!("k{}", (i + flip) % 5));
                let reply = db.exec_normal(&cmd_line(&["MSET", &a, "1", &b, "2"]));
                assert!(!reply.is_error());
            }
        }));
    }
    for h in handles {
        h.join().expect("multi-key writers must not deadlock");
    }
    assert_eq!(db.key_count(), 5);
}
