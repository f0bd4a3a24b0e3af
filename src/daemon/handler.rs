//! Seam to the transport and authentication layers

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::Result;
use super::registry::UnauthRegistry;
use crate::session::AuthenticatedSession;

/// An admitted connection, owned by its worker
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub accepted_at: SystemTime,
    pub stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            accepted_at: SystemTime::now(),
            stream,
        }
    }
}

/// Lets a handler report authentication and watch its deadline
#[derive(Debug, Clone)]
pub struct AuthProgress {
    id: Uuid,
    registry: Arc<UnauthRegistry>,
    deadline: CancellationToken,
}

impl AuthProgress {
    pub fn new(id: Uuid, registry: Arc<UnauthRegistry>, deadline: CancellationToken) -> Self {
        Self {
            id,
            registry,
            deadline,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Leave the unauthenticated pool.
    ///
    /// Returns false when the login grace time already ran out.
    pub fn mark_authenticated(&self) -> bool {
        self.registry.mark_authenticated(self.id)
    }

    /// True once the login grace time has expired
    pub fn is_expired(&self) -> bool {
        self.deadline.is_cancelled()
    }

    /// Resolves when the login grace time expires
    pub fn expired(&self) -> WaitForCancellationFuture<'_> {
        self.deadline.cancelled()
    }
}

/// Runs the transport and authentication for one connection.
///
/// Returns the authenticated session, or `None` when the peer went away
/// or failed to authenticate.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(
        &self,
        conn: Connection,
        progress: AuthProgress,
    ) -> Result<Option<AuthenticatedSession>>;
}

/// Handler used when no transport is linked in: logs and closes
#[derive(Debug, Default, Clone, Copy)]
pub struct UnwiredTransport;

#[async_trait]
impl ConnectionHandler for UnwiredTransport {
    async fn handle(
        &self,
        conn: Connection,
        _progress: AuthProgress,
    ) -> Result<Option<AuthenticatedSession>> {
        info!(
            "No transport configured, closing connection {} from {}",
            conn.id, conn.peer
        );
        drop(conn.stream);
        debug!("Connection {} closed", conn.id);
        Ok(None)
    }
}
