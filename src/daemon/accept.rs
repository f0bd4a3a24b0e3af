//! The accept loop

use futures::future::select_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

use super::error::{DaemonError, Result};
use super::handler::{Connection, ConnectionHandler};
use super::registry::UnauthRegistry;
use super::stats::{DaemonStats, WorkerSlot};
use super::throttle::{Admission, StartupsLimit, Throttle};
use super::worker::{peer_display, SessionContext, Worker};
use crate::access::AccessControlFilter;
use crate::config::{FrontendConfig, StartupsPolicy};

/// Accept loop tunables
#[derive(Debug, Clone)]
pub struct AcceptSettings {
    pub throttle: Throttle,
    pub max_connections: usize,
    pub login_grace_time: Option<Duration>,
    pub tick_interval: Duration,
    pub throttle_delay: Duration,
    pub accept_backoff: Duration,
}

impl AcceptSettings {
    pub fn from_config(config: &FrontendConfig) -> Result<Self> {
        let limit: StartupsLimit = config.network.max_startups.parse()?;

        Ok(Self {
            throttle: Throttle::new(limit, config.network.startups_policy),
            max_connections: config.network.max_connections,
            login_grace_time: config.login_grace_time(),
            tick_interval: Duration::from_millis(config.network.tick_interval_ms),
            throttle_delay: Duration::from_millis(config.network.throttle_delay_ms),
            accept_backoff: Duration::from_millis(config.network.accept_backoff_ms),
        })
    }
}

impl Default for AcceptSettings {
    fn default() -> Self {
        Self {
            throttle: Throttle::new(StartupsLimit::default(), Default::default()),
            max_connections: 256,
            login_grace_time: Some(Duration::from_secs(120)),
            tick_interval: Duration::from_secs(1),
            throttle_delay: Duration::from_millis(100),
            accept_backoff: Duration::from_millis(50),
        }
    }
}

/// Accept loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for a connection or a tick
    Listening,
    /// Admitting one connection
    Dispatching,
    /// Out of worker slots or deferring under MaxStartups; pausing
    ThrottledDraining,
}

enum Wake {
    Shutdown,
    Tick,
    Accepted(TcpStream, SocketAddr),
    Failed(SocketAddr, io::Error),
}

/// Accepts connections, filters them and hands them to workers
pub struct AcceptLoop {
    listeners: Vec<TcpListener>,
    settings: AcceptSettings,
    filter: Arc<AccessControlFilter>,
    handler: Arc<dyn ConnectionHandler>,
    sessions: Arc<SessionContext>,
    registry: Arc<UnauthRegistry>,
    stats: Arc<DaemonStats>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    state: LoopState,
    rng: StdRng,
}

impl AcceptLoop {
    pub fn new(
        settings: AcceptSettings,
        filter: AccessControlFilter,
        handler: Arc<dyn ConnectionHandler>,
        sessions: SessionContext,
    ) -> Self {
        Self {
            listeners: Vec::new(),
            settings,
            filter: Arc::new(filter),
            handler,
            sessions: Arc::new(sessions),
            registry: UnauthRegistry::new(),
            stats: DaemonStats::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            state: LoopState::Listening,
            rng: StdRng::from_entropy(),
        }
    }

    /// Bind every address
    pub async fn bind(mut self, addrs: &[SocketAddr]) -> Result<Self> {
        for addr in addrs {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| DaemonError::Bind { addr: *addr, source })?;
            info!("Listening on {}", listener.local_addr()?);
            self.listeners.push(listener);
        }
        Ok(self)
    }

    /// Use already bound listeners
    pub fn with_listeners(mut self, listeners: Vec<TcpListener>) -> Self {
        self.listeners.extend(listeners);
        self
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<DaemonStats> {
        self.stats.clone()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Run until shutdown or listener loss.
    ///
    /// Either way, in-flight workers are waited for before returning.
    pub async fn run(mut self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(DaemonError::NoListeners);
        }

        info!(
            "Accept loop running (MaxStartups {}, max connections {})",
            self.settings.throttle.limit, self.settings.max_connections
        );

        let mut tick = interval(self.settings.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let throttle_delay = self.settings.throttle_delay;
        let accept_backoff = self.settings.accept_backoff;

        let result = loop {
            self.transition(LoopState::Listening);

            if self.stats.active_workers() >= self.settings.max_connections as u64 {
                debug!("No free worker slots ({} active)", self.stats.active_workers());
                if self.pause(&mut tick, throttle_delay).await {
                    break Ok(());
                }
                continue;
            }

            if self.settings.throttle.policy == StartupsPolicy::Delay
                && self.settings.throttle.decide(self.registry.len(), &mut self.rng)
                    == Admission::Delay
            {
                DaemonStats::incr(&self.stats.throttled);
                debug!("Deferring accept, {} unauthenticated", self.registry.len());
                if self.pause(&mut tick, throttle_delay).await {
                    break Ok(());
                }
                continue;
            }

            match self.wait(&mut tick).await {
                Wake::Shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                Wake::Tick => self.expire_stale(),
                Wake::Accepted(stream, peer) => self.dispatch(stream, peer),
                Wake::Failed(addr, e) if is_transient(&e) => {
                    debug!("accept on {}: {}", addr, e);
                    if self.pause(&mut tick, accept_backoff).await {
                        break Ok(());
                    }
                }
                Wake::Failed(addr, source) => {
                    error!("Listener on {} failed: {}", addr, source);
                    break Err(DaemonError::Listener { addr, source });
                }
            }
        };

        self.drain(&mut tick).await;
        result
    }

    async fn wait(&self, tick: &mut Interval) -> Wake {
        let accepts = self.listeners.iter().map(|l| {
            Box::pin(async move {
                let local = l.local_addr().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
                l.accept().await.map_err(|e| (local, e))
            })
        });

        tokio::select! {
            _ = self.shutdown.cancelled() => Wake::Shutdown,
            _ = tick.tick() => Wake::Tick,
            (result, _, _) = select_all(accepts) => match result {
                Ok((stream, peer)) => Wake::Accepted(stream, peer),
                Err((local, e)) => Wake::Failed(local, e),
            },
        }
    }

    /// ThrottledDraining: sleep without accepting, keep ticking.
    /// Returns true if shutdown was requested meanwhile.
    async fn pause(&mut self, tick: &mut Interval, delay: Duration) -> bool {
        self.transition(LoopState::ThrottledDraining);
        let pause = sleep(delay);
        tokio::pin!(pause);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return true,
                _ = &mut pause => return false,
                _ = tick.tick() => self.expire_stale(),
            }
        }
    }

    fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.transition(LoopState::Dispatching);
        DaemonStats::incr(&self.stats.accepted);

        let unauthenticated = self.registry.len();
        if self.settings.throttle.decide(unauthenticated, &mut self.rng) == Admission::Drop {
            DaemonStats::incr(&self.stats.throttled);
            info!(
                "drop connection #{} from {} past MaxStartups",
                unauthenticated,
                peer_display(peer)
            );
            drop(stream);
            return;
        }

        let Some(stream) = self.filter.admit(stream, peer) else {
            DaemonStats::incr(&self.stats.refused);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay for {}: {}", peer, e);
        }

        let conn = Connection::new(stream, peer);
        debug!("Connection {} from {}", conn.id, peer_display(peer));
        let deadline = self.registry.register(conn.id, peer);

        // Counted before spawning so the next loop iteration sees it
        let slot = WorkerSlot::acquire(self.stats.clone());
        let worker = Worker {
            conn,
            deadline,
            handler: self.handler.clone(),
            sessions: self.sessions.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            slot,
        };
        self.tracker.spawn(worker.run());
    }

    fn expire_stale(&self) {
        let Some(grace) = self.settings.login_grace_time else {
            return;
        };

        for (id, peer) in self.registry.expire_stale(grace) {
            DaemonStats::incr(&self.stats.timed_out);
            info!("Timeout before authentication for {}", peer_display(peer));
            debug!("Expired connection {}", id);
        }
    }

    /// Stop listening and wait for every worker, still expiring stale ones
    async fn drain(&mut self, tick: &mut Interval) {
        self.listeners.clear();
        self.tracker.close();

        if !self.tracker.is_empty() {
            info!("Waiting for {} connections to finish", self.tracker.len());
        }

        loop {
            tokio::select! {
                _ = self.tracker.wait() => break,
                _ = tick.tick() => self.expire_stale(),
            }
        }

        self.stats.log_summary();
        info!("Accept loop stopped");
    }

    fn transition(&mut self, to: LoopState) {
        if self.state != to {
            trace!("{:?} -> {:?}", self.state, to);
            self.state = to;
        }
    }
}

/// accept() errors that leave the listener usable
pub fn is_transient(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => true,
        _ => matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ENOBUFS)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = FrontendConfig::default();
        config.network.login_grace_time_secs = 0;
        let settings = AcceptSettings::from_config(&config).unwrap();
        assert_eq!(settings.throttle.limit, StartupsLimit::new(10, 30, 100));
        assert_eq!(settings.login_grace_time, None);
        assert_eq!(settings.tick_interval, Duration::from_secs(1));

        config.network.max_startups = "bad".to_string();
        assert!(AcceptSettings::from_config(&config).is_err());
    }
}
