mod config;
mod connection;
mod server;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use cinder_core::Router;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "cinder-server", about = "cinder key-value server", version)]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "CINDER_CONFIG")]
    config: Option<PathBuf>,

    /// address to bind to
    #[arg(long, env = "CINDER_HOST")]
    host: Option<String>,

    /// port to listen on
    #[arg(short, long, env = "CINDER_PORT")]
    port: Option<u16>,

    /// password clients must AUTH with
    #[arg(long, env = "CINDER_PASSWORD")]
    password: Option<String>,

    /// number of logical databases
    #[arg(long, env = "CINDER_DATABASES")]
    databases: Option<usize>,

    /// enable the append-only log
    #[arg(long, env = "CINDER_APPENDONLY")]
    appendonly: bool,

    /// append-only log path
    #[arg(long, env = "CINDER_APPENDFILENAME")]
    appendfilename: Option<PathBuf>,
}

impl Args {
    /// File config first, CLI flags on top.
    fn resolve(self) -> Result<ServerConfig, String> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            cfg.host = host;
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(password) = self.password {
            cfg.password = Some(password);
        }
        if let Some(databases) = self.databases {
            cfg.databases = databases;
        }
        if self.appendonly {
            cfg.appendonly = true;
        }
        if let Some(path) = self.appendfilename {
            cfg.appendfilename = path;
            cfg.appendonly = true;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Args::parse().resolve().map_err(io::Error::other)?;
    let addr = cfg.listen_addr();

    let router = Arc::new(Router::standalone(cfg.router_config())?);
    info!(databases = cfg.databases, appendonly = cfg.appendonly, "engine ready");

    server::run(router, &addr).await
}
