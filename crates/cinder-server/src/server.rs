//! TCP accept loop and graceful shutdown.

use std::io;
use std::sync::Arc;

use cinder_core::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection;

/// Accepts connections until interrupted, then closes the engine so
/// the append-only log drains before the process exits.
pub async fn run(router: Arc<Router>, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            if let Err(e) = connection::handle(stream, router).await {
                                warn!(%peer, "connection ended with error: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    router.close();
    Ok(())
}
