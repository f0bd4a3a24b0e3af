//! Single connection mode for inetd-style supervisors

use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::error::Result;
use super::handler::{Connection, ConnectionHandler};
use super::registry::UnauthRegistry;
use super::stats::{DaemonStats, WorkerSlot};
use super::worker::{peer_display, SessionContext, Worker};
use crate::access::AccessControlFilter;

/// The connection handed to us on standard input
pub fn stdin_connection() -> Result<(TcpStream, SocketAddr)> {
    let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
    let stream = std::net::TcpStream::from(fd);
    stream.set_nonblocking(true)?;
    let peer = stream.peer_addr()?;
    Ok((TcpStream::from_std(stream)?, peer))
}

/// Filter and serve one connection in the current task
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    filter: &AccessControlFilter,
    handler: Arc<dyn ConnectionHandler>,
    sessions: Arc<SessionContext>,
    login_grace_time: Option<Duration>,
) -> Result<()> {
    let Some(stream) = filter.admit(stream, peer) else {
        return Ok(());
    };

    let registry = UnauthRegistry::new();
    let stats = DaemonStats::new();
    let conn = Connection::new(stream, peer);
    debug!("Connection {} from {}", conn.id, peer_display(peer));
    let deadline = registry.register(conn.id, peer);

    let timer = login_grace_time.map(|grace| {
        let registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for (_, peer) in registry.expire_stale(grace) {
                info!("Timeout before authentication for {}", peer_display(peer));
            }
        })
    });

    Worker {
        conn,
        deadline,
        handler,
        sessions,
        registry,
        slot: WorkerSlot::acquire(stats.clone()),
        stats,
    }
    .run()
    .await;

    if let Some(timer) = timer {
        timer.abort();
    }
    Ok(())
}
