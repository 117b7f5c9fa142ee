//! Multi-database router.
//!
//! Owns the numbered databases, the pub/sub hub, the command table,
//! and the optional append-only log. Routes each decoded command by
//! the connection's selected index, handles the database-global
//! commands itself, and converts any unexpected internal failure into
//! a generic error reply so one broken command can never take down the
//! other connections.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use cinder_protocol::{cmd_line, CmdLine, Reply};
use tracing::{error, info, warn};

use crate::aof::Aof;
use crate::cmd::CommandTable;
use crate::conn::Connection;
use crate::db::Db;
use crate::pubsub::Hub;
use crate::wheel::WheelHandle;

/// Number of logical databases in a standalone server.
pub const DB_COUNT: usize = 16;

/// Startup options for a standalone router.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Database count; zero falls back to [`DB_COUNT`].
    pub databases: usize,
    /// Password required by AUTH. `None` disables authentication.
    pub password: Option<String>,
    /// Append-only log path. `None` disables persistence.
    pub aof_path: Option<PathBuf>,
}

pub struct Router {
    dbs: Vec<Arc<Db>>,
    hub: Hub,
    table: Arc<CommandTable>,
    aof: Option<Arc<Aof>>,
    password: Option<String>,
}

impl Router {
    /// Builds a live server: concurrent databases, active expiration
    /// when a tokio runtime is present, and — if configured — the
    /// append-only log, replayed before the write hooks are installed
    /// so recovery itself is never re-logged.
    pub fn standalone(config: RouterConfig) -> io::Result<Router> {
        let table = Arc::new(CommandTable::standard());
        let databases = if config.databases == 0 {
            DB_COUNT
        } else {
            config.databases
        };

        // active expiration needs a runtime to host the wheel task;
        // without one, lazy expiration still enforces deadlines
        let wheel = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| WheelHandle::spawn());

        let dbs: Vec<Arc<Db>> = (0..databases)
            .map(|i| Db::concurrent(i, Arc::clone(&table), wheel.clone()))
            .collect();

        let mut router = Router {
            dbs,
            hub: Hub::new(),
            table,
            aof: None,
            password: config.password,
        };

        if let Some(path) = config.aof_path {
            let aof = Arc::new(Aof::open(path)?);
            aof.load(&router, None);
            for db in &router.dbs {
                let sink = Arc::clone(&aof);
                let index = db.index();
                db.set_aof_sink(Arc::new(move |line: CmdLine| sink.append(index, line)));
            }
            router.aof = Some(aof);
            info!("append-only log enabled");
        }

        Ok(router)
    }

    /// Builds the embedded variant the AOF engine drives for replay and
    /// rewrite: single-segment databases, no hub traffic, no log hooks.
    pub fn embedded(table: Arc<CommandTable>, databases: usize) -> Router {
        let dbs = (0..databases.max(1))
            .map(|i| Db::embedded(i, Arc::clone(&table)))
            .collect();
        Router {
            dbs,
            hub: Hub::new(),
            table,
            aof: None,
            password: None,
        }
    }

    pub fn table(&self) -> Arc<CommandTable> {
        Arc::clone(&self.table)
    }

    pub(crate) fn databases(&self) -> &[Arc<Db>] {
        &self.dbs
    }

    /// Executes one decoded command for a connection. Internal panics
    /// stop at this boundary and come back as a generic error reply.
    pub fn exec(&self, conn: &Arc<dyn Connection>, line: &CmdLine) -> Reply {
        match catch_unwind(AssertUnwindSafe(|| self.exec_inner(conn, line))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("internal failure while executing a command");
                Reply::error("ERR server internal error")
            }
        }
    }

    fn exec_inner(&self, conn: &Arc<dyn Connection>, line: &CmdLine) -> Reply {
        let Some(name_bytes) = line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();

        if name == "auth" {
            return self.auth(conn.as_ref(), line);
        }
        if !self.authenticated(conn.as_ref()) {
            return Reply::error("NOAUTH Authentication required");
        }

        match name.as_str() {
            "subscribe" => {
                if line.len() < 2 {
                    return Reply::arg_num_error("subscribe");
                }
                self.hub.subscribe(conn, &line[1..])
            }
            "unsubscribe" => self.hub.unsubscribe(conn, &line[1..]),
            "publish" => {
                if line.len() != 3 {
                    return Reply::arg_num_error("publish");
                }
                self.hub.publish(&line[1], &line[2])
            }
            "select" => self.select(conn.as_ref(), line),
            "flushall" => self.flush_all(),
            "rewriteaof" => self.rewrite_aof(),
            "bgrewriteaof" => self.bg_rewrite_aof(),
            _ => {
                let index = conn.selected_db();
                let Some(db) = self.dbs.get(index) else {
                    return Reply::error("ERR DB index is out of range");
                };
                db.exec(conn.as_ref(), line)
            }
        }
    }

    fn auth(&self, conn: &dyn Connection, line: &CmdLine) -> Reply {
        if line.len() != 2 {
            return Reply::arg_num_error("auth");
        }
        let Some(required) = &self.password else {
            return Reply::error("ERR Client sent AUTH, but no password is set");
        };
        let given = String::from_utf8_lossy(&line[1]).into_owned();
        conn.set_password(&given);
        if given == *required {
            Reply::ok()
        } else {
            Reply::error("ERR invalid password")
        }
    }

    fn authenticated(&self, conn: &dyn Connection) -> bool {
        match &self.password {
            None => true,
            Some(required) => conn.password() == *required,
        }
    }

    fn select(&self, conn: &dyn Connection, line: &CmdLine) -> Reply {
        if conn.in_multi() {
            return Reply::error("ERR SELECT is not allowed in transactions");
        }
        if line.len() != 2 {
            return Reply::arg_num_error("select");
        }
        let Ok(index) = String::from_utf8_lossy(&line[1]).parse::<usize>() else {
            return Reply::error("ERR invalid DB index");
        };
        if index >= self.dbs.len() {
            return Reply::error("ERR DB index is out of range");
        }
        conn.select_db(index);
        Reply::ok()
    }

    fn flush_all(&self) -> Reply {
        for db in &self.dbs {
            db.flush();
        }
        if let Some(aof) = &self.aof {
            aof.append(0, cmd_line(&["FLUSHALL"]));
        }
        Reply::ok()
    }

    fn rewrite_aof(&self) -> Reply {
        let Some(aof) = &self.aof else {
            return Reply::error("ERR append-only log is disabled");
        };
        match aof.rewrite(self.table(), self.dbs.len()) {
            Ok(()) => Reply::Simple("Append only file rewriting completed".into()),
            Err(e) => {
                warn!("log rewrite failed: {e}");
                Reply::error(format!("ERR rewrite failed: {e}"))
            }
        }
    }

    fn bg_rewrite_aof(&self) -> Reply {
        let Some(aof) = self.aof.clone() else {
            return Reply::error("ERR append-only log is disabled");
        };
        let table = self.table();
        let databases = self.dbs.len();
        std::thread::spawn(move || {
            if let Err(e) = aof.rewrite(table, databases) {
                warn!("background log rewrite failed: {e}");
            }
        });
        Reply::Simple("Background append only file rewriting started".into())
    }

    /// Cleanup when a client connection closes.
    pub fn after_client_close(&self, conn: &Arc<dyn Connection>) {
        self.hub.unsubscribe_all(conn);
    }

    /// Graceful shutdown: stop the log engine last so every enqueued
    /// record reaches the file.
    pub fn close(&self) {
        if let Some(aof) = &self.aof {
            aof.close();
        }
        info!("router closed");
    }
}
