//! Server-level commands that execute inside a database context.

use bytes::Bytes;
use cinder_protocol::Reply;

use crate::cmd::{no_keys, CommandTable};
use crate::db::Db;

pub fn register(table: &mut CommandTable) {
    table.register("ping", exec_ping, no_keys, None, -1);
    table.register("info", exec_info, no_keys, None, -1);
}

fn exec_ping(_db: &Db, args: &[Bytes]) -> Reply {
    match args.len() {
        0 => Reply::pong(),
        1 => Reply::Bulk(args[0].clone()),
        _ => Reply::arg_num_error("ping"),
    }
}

fn exec_info(db: &Db, _args: &[Bytes]) -> Reply {
    let body = format!(
        "# server\r\nname:cinder\r\nversion:{}\r\n\r\n# keyspace\r\ndb{}:keys={}\r\n",
        env!("CARGO_PKG_VERSION"),
        db.index(),
        db.key_count(),
    );
    Reply::Bulk(Bytes::from(body))
}
