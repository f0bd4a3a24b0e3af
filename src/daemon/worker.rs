//! Per-connection worker

use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{AuthProgress, Connection, ConnectionHandler};
use super::registry::UnauthRegistry;
use super::stats::{DaemonStats, WorkerSlot};
use crate::platform::AmbientEnv;
use crate::session::{
    AuthenticatedSession, EnvironmentBuilder, LoginClassPolicy, Result as SessionResult,
    SessionLauncher,
};

/// Read-only state every worker needs to start a session
pub struct SessionContext {
    pub builder: EnvironmentBuilder,
    pub policy: Option<Arc<dyn LoginClassPolicy>>,
    pub launcher: SessionLauncher,
    pub ambient: AmbientEnv,
}

impl SessionContext {
    pub fn new(
        builder: EnvironmentBuilder,
        policy: Option<Arc<dyn LoginClassPolicy>>,
        launcher: SessionLauncher,
        ambient: AmbientEnv,
    ) -> Self {
        Self {
            builder,
            policy,
            launcher,
            ambient,
        }
    }

    /// Build the environment and launch the user's shell
    pub async fn start(&self, auth: &AuthenticatedSession) -> SessionResult<ExitStatus> {
        let env = self.builder.build(
            &auth.identity,
            self.policy.as_deref(),
            &auth.session,
            self.ambient.tz(),
        )?;

        debug!(
            "Session environment for {}: {}",
            auth.identity.name,
            env.keys().collect::<Vec<_>>().join(" ")
        );

        self.launcher.launch(&auth.identity, &auth.session, &env).await
    }
}

/// Everything a spawned worker owns.
///
/// `slot` is taken by the dispatcher before the task is spawned and
/// released when the worker is dropped.
pub(crate) struct Worker {
    pub(crate) conn: Connection,
    pub(crate) deadline: CancellationToken,
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) sessions: Arc<SessionContext>,
    pub(crate) registry: Arc<UnauthRegistry>,
    pub(crate) stats: Arc<DaemonStats>,
    pub(crate) slot: WorkerSlot,
}

impl Worker {
    /// Authenticate, then run the session. Failures end this worker only.
    pub(crate) async fn run(self) {
        let _slot = self.slot;
        let id = self.conn.id;
        let peer = self.conn.peer;
        let progress = AuthProgress::new(id, self.registry.clone(), self.deadline.clone());

        debug!("Worker {} started for {}", id, peer);

        let outcome = tokio::select! {
            _ = self.deadline.cancelled() => {
                // The tick already logged the timeout
                debug!("Worker {} cancelled before authentication", id);
                return;
            }
            outcome = self.handler.handle(self.conn, progress) => outcome,
        };

        let auth = match outcome {
            Ok(Some(auth)) => auth,
            Ok(None) => {
                self.registry.remove(id);
                debug!("Connection {} from {} closed without authenticating", id, peer);
                return;
            }
            Err(e) => {
                self.registry.remove(id);
                warn!("Connection {} from {}: {}", id, peer, e);
                return;
            }
        };

        // Handlers may already have reported this themselves
        self.registry.remove(id);
        DaemonStats::incr(&self.stats.authenticated);
        info!("Accepted {} from {}", auth.identity.name, peer_display(peer));

        if let Err(e) = self.sessions.start(&auth).await {
            DaemonStats::incr(&self.stats.session_failures);
            error!("Session for {} from {} failed: {}", auth.identity.name, peer, e);
        }
    }
}

/// `<addr> port <port>`, the canonical address form used in log lines
pub fn peer_display(peer: SocketAddr) -> String {
    format!("{} port {}", crate::access::canonical(peer.ip()), peer.port())
}
