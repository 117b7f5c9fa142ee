//! The command table.
//!
//! Built once at process start and shared by reference into every
//! database — there is no global mutable registry. Each entry couples
//! an executor with a prepare function that names the keys the command
//! will write and read (driving version bumps and lock acquisition)
//! and, for commands that participate in transaction rollback, an
//! undo-log generator.

use ahash::AHashMap;
use bytes::Bytes;
use cinder_protocol::{CmdLine, Reply};

use crate::db::Db;

/// Executes a command against one database. Arguments exclude the
/// command name. Error conditions come back as error replies, never as
/// panics.
pub type ExecFn = fn(&Db, &[Bytes]) -> Reply;

/// Returns the (write keys, read keys) a command will touch, computed
/// from its arguments alone.
pub type PrepareFn = fn(&[Bytes]) -> (Vec<String>, Vec<String>);

/// Generates command lines that restore the pre-command state, invoked
/// before the command runs inside an EXEC batch.
pub type UndoFn = fn(&Db, &[Bytes]) -> Vec<CmdLine>;

/// One registered command.
pub struct Command {
    pub executor: ExecFn,
    pub prepare: PrepareFn,
    pub undo: Option<UndoFn>,
    /// Exact token count including the command name when non-negative;
    /// negative means at least `-arity` tokens.
    pub arity: i32,
}

/// Name → command registry.
#[derive(Default)]
pub struct CommandTable {
    map: AHashMap<String, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full table with every built-in command registered.
    pub fn standard() -> Self {
        let mut table = Self::new();
        crate::commands::register_all(&mut table);
        table
    }

    pub fn register(
        &mut self,
        name: &str,
        executor: ExecFn,
        prepare: PrepareFn,
        undo: Option<UndoFn>,
        arity: i32,
    ) {
        self.map.insert(
            name.to_ascii_lowercase(),
            Command {
                executor,
                prepare,
                undo,
                arity,
            },
        );
    }

    /// Looks up a command by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.map.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Checks a command line's token count (command name included) against
/// the registered arity.
pub fn validate_arity(arity: i32, tokens: usize) -> bool {
    if arity >= 0 {
        tokens == arity as usize
    } else {
        tokens >= (-arity) as usize
    }
}

/// Prepare function for commands that touch no keys.
pub fn no_keys(_args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_exact_and_minimum() {
        assert!(validate_arity(2, 2));
        assert!(!validate_arity(2, 3));
        assert!(validate_arity(-2, 2));
        assert!(validate_arity(-2, 5));
        assert!(!validate_arity(-2, 1));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = CommandTable::standard();
        assert!(table.get("GET").is_some());
        assert!(table.get("get").is_some());
        assert!(table.get("GeT").is_some());
        assert!(table.get("nosuchcmd").is_none());
    }

    #[test]
    fn standard_table_registers_core_commands() {
        let table = CommandTable::standard();
        for cmd in [
            "set", "get", "del", "expire", "ttl", "hset", "lpush", "sadd", "zadd", "zrange",
            "keys", "flushdb", "ping",
        ] {
            assert!(table.get(cmd).is_some(), "missing command {cmd}");
        }
    }

    #[test]
    fn write_commands_carry_undo() {
        let table = CommandTable::standard();
        assert!(table.get("set").unwrap().undo.is_some());
        assert!(table.get("del").unwrap().undo.is_some());
        // pure reads have nothing to roll back
        assert!(table.get("get").unwrap().undo.is_none());
    }
}
