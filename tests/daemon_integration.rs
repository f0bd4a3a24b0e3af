//! Accept loop integration tests
//!
//! Runs the loop on loopback listeners with scripted connection handlers
//! and checks admission, isolation, login grace expiry and shutdown.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use lamco_login_frontend::access::{AccessControlFilter, RuleAction};
use lamco_login_frontend::config::{AccessConfig, EnvironmentConfig, RuleConfig, SessionConfig};
use lamco_login_frontend::daemon::{
    AcceptLoop, AcceptSettings, AuthProgress, Connection, ConnectionHandler, DaemonStats,
    SessionContext, StartupsLimit, Throttle,
};
use lamco_login_frontend::guard::{
    GuardError, GuardStep, MechanismSet, PlatformHooks, ResourceGuard, StepStatus,
};
use lamco_login_frontend::platform::{AmbientEnv, Capabilities};
use lamco_login_frontend::session::{
    AuthenticatedSession, EnvironmentBuilder, Session, SessionLauncher, UserIdentity,
};

const WAIT: Duration = Duration::from_secs(5);

/// Reports each connection, then behaves as scripted
#[derive(Clone)]
enum Script {
    /// Close at once without authenticating
    Close,
    /// Never authenticate
    Stall,
    /// Hold the connection for a while, then close
    Linger(Duration, Arc<AtomicBool>),
    /// Authenticate as the given user and session
    Login(UserIdentity, Session),
}

struct ScriptedHandler {
    seen: mpsc::UnboundedSender<SocketAddr>,
    script: Script,
}

#[async_trait]
impl ConnectionHandler for ScriptedHandler {
    async fn handle(
        &self,
        conn: Connection,
        progress: AuthProgress,
    ) -> lamco_login_frontend::daemon::Result<Option<AuthenticatedSession>> {
        assert_eq!(progress.id(), conn.id);
        let _ = self.seen.send(conn.peer);
        let stream = conn.stream;

        match &self.script {
            Script::Close => {
                drop(stream);
                Ok(None)
            }
            Script::Stall => {
                let _hold = stream;
                std::future::pending::<()>().await;
                Ok(None)
            }
            Script::Linger(period, done) => {
                let _hold = stream;
                tokio::time::sleep(*period).await;
                done.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Script::Login(identity, session) => {
                drop(stream);
                assert!(progress.mark_authenticated());
                Ok(Some(AuthenticatedSession {
                    identity: identity.clone(),
                    session: session.clone(),
                }))
            }
        }
    }
}

fn settings() -> AcceptSettings {
    AcceptSettings {
        tick_interval: Duration::from_millis(20),
        throttle_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

fn sessions() -> SessionContext {
    SessionContext::new(
        EnvironmentBuilder::new(EnvironmentConfig::default(), &Capabilities::none()),
        None,
        SessionLauncher::new(&SessionConfig::default()).without_user_switch(),
        AmbientEnv::default(),
    )
}

fn allow_all() -> AccessControlFilter {
    AccessControlFilter::from_config(&AccessConfig::default(), &Capabilities::all()).unwrap()
}

struct Running {
    addr: SocketAddr,
    stats: Arc<DaemonStats>,
    shutdown: tokio_util::sync::CancellationToken,
    task: JoinHandle<lamco_login_frontend::daemon::Result<()>>,
    seen: mpsc::UnboundedReceiver<SocketAddr>,
}

impl Running {
    async fn stop(self) -> Arc<DaemonStats> {
        self.shutdown.cancel();
        timeout(WAIT, self.task).await.unwrap().unwrap().unwrap();
        self.stats
    }
}

async fn start(settings: AcceptSettings, filter: AccessControlFilter, script: Script) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    launch(listener, settings, filter, script)
}

fn launch(
    listener: TcpListener,
    settings: AcceptSettings,
    filter: AccessControlFilter,
    script: Script,
) -> Running {
    let addr = listener.local_addr().unwrap();
    let (tx, seen) = mpsc::unbounded_channel();

    let accept = AcceptLoop::new(
        settings,
        filter,
        Arc::new(ScriptedHandler { seen: tx, script }),
        sessions(),
    )
    .with_listeners(vec![listener]);

    assert_eq!(accept.local_addrs(), vec![addr]);
    let stats = accept.stats();
    let shutdown = accept.shutdown_token();
    let task = tokio::spawn(accept.run());

    Running {
        addr,
        stats,
        shutdown,
        task,
        seen,
    }
}

/// True if the server side closed the connection
async fn closed_by_server(client: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match timeout(WAIT, client.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) => false,
        Err(_) => false,
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_allowed_connection_reaches_handler() {
    let mut running = start(settings(), allow_all(), Script::Close).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    let peer = timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();
    assert_eq!(peer, client.local_addr().unwrap());

    assert!(closed_by_server(&mut client).await);

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.refused, 0);
    assert_eq!(stats.authenticated, 0);
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test]
async fn test_denied_connection_is_closed() {
    let config = AccessConfig {
        rules: vec![RuleConfig {
            pattern: "ALL".to_string(),
            action: RuleAction::Deny,
        }],
        ..Default::default()
    };
    let filter = AccessControlFilter::from_config(&config, &Capabilities::all()).unwrap();
    let mut running = start(settings(), filter, Script::Close).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    assert!(closed_by_server(&mut client).await);
    assert!(running.seen.try_recv().is_err());

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.refused, 1);
}

#[tokio::test]
async fn test_startups_limit_drops_excess() {
    let settings = AcceptSettings {
        throttle: Throttle::new("1".parse::<StartupsLimit>().unwrap(), Default::default()),
        login_grace_time: Some(Duration::from_secs(2)),
        ..settings()
    };
    let mut running = start(settings, allow_all(), Script::Stall).await;

    let _first = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    let mut second = TcpStream::connect(running.addr).await.unwrap();
    assert!(closed_by_server(&mut second).await);
    assert!(running.seen.try_recv().is_err());

    let stats = running.stats.snapshot();
    assert_eq!(stats.throttled, 1);
    assert_eq!(stats.accepted, 2);

    // shutdown completes once the stalled worker's grace time runs out
    let stats = running.stop().await.snapshot();
    assert_eq!(stats.timed_out, 1);
}

#[tokio::test]
async fn test_backlog_respects_max_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Queue connections in the backlog before the loop first accepts
    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }

    let settings = AcceptSettings {
        max_connections: 1,
        login_grace_time: Some(Duration::from_secs(1)),
        ..settings()
    };
    let mut running = launch(listener, settings, allow_all(), Script::Stall);

    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(running.seen.try_recv().is_err());

    let stats = running.stats.snapshot();
    assert_eq!(stats.active_workers, 1);
    assert_eq!(stats.accepted, 1);

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.active_workers, 0);
}

#[tokio::test]
async fn test_login_grace_time_expires() {
    let settings = AcceptSettings {
        login_grace_time: Some(Duration::from_millis(100)),
        ..settings()
    };
    let mut running = start(settings, allow_all(), Script::Stall).await;

    let mut client = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    assert!(closed_by_server(&mut client).await);
    let stats = running.stats.clone();
    wait_for(|| stats.snapshot().active_workers == 0).await;

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.authenticated, 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_workers() {
    let done = Arc::new(AtomicBool::new(false));
    let mut running = start(
        settings(),
        allow_all(),
        Script::Linger(Duration::from_millis(200), done.clone()),
    )
    .await;

    let _client = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    running.stop().await;
    assert!(done.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stalled_worker_expires_during_shutdown() {
    let settings = AcceptSettings {
        login_grace_time: Some(Duration::from_millis(100)),
        ..settings()
    };
    let mut running = start(settings, allow_all(), Script::Stall).await;

    let _client = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.active_workers, 0);
}

fn identity(home: PathBuf, shell: &str) -> UserIdentity {
    UserIdentity {
        name: "alice".to_string(),
        home,
        shell: PathBuf::from(shell),
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
        class: None,
    }
}

#[tokio::test]
async fn test_authenticated_session_runs() {
    let home = tempfile::tempdir().unwrap();
    let out = home.path().join("env.out");
    let session = Session::interactive()
        .with_term("xterm")
        .with_command(format!("echo \"$USER $HOME $TERM\" > {}", out.display()));

    let mut running = start(
        settings(),
        allow_all(),
        Script::Login(identity(home.path().to_path_buf(), "/bin/sh"), session),
    )
    .await;

    let _client = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    let stats = running.stats.clone();
    wait_for(|| stats.snapshot().active_workers == 0 && out.exists()).await;

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.authenticated, 1);
    assert_eq!(stats.session_failures, 0);

    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        written.trim(),
        format!("alice {} xterm", home.path().display())
    );
}

#[tokio::test]
async fn test_session_failure_ends_only_that_worker() {
    let home = tempfile::tempdir().unwrap();
    let mut running = start(
        settings(),
        allow_all(),
        Script::Login(
            identity(home.path().to_path_buf(), "/nonexistent/shell"),
            Session::interactive(),
        ),
    )
    .await;

    for _ in 0..2 {
        let _client = TcpStream::connect(running.addr).await.unwrap();
        timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();
    }

    let stats = running.stats.clone();
    wait_for(|| stats.snapshot().session_failures == 2).await;

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.authenticated, 2);
    assert_eq!(stats.accepted, 2);
}

struct FailingResolver;

impl PlatformHooks for FailingResolver {
    fn protect_memory(&self) -> lamco_login_frontend::guard::Result<()> {
        Ok(())
    }

    fn init_resolver(&self) -> lamco_login_frontend::guard::Result<()> {
        Err(GuardError::Resolver("resolv.conf unreadable".to_string()))
    }

    fn load_security_mechanisms(&self) -> lamco_login_frontend::guard::Result<MechanismSet> {
        Ok(MechanismSet::default())
    }
}

#[tokio::test]
async fn test_guard_failure_does_not_block_accepting() {
    let guard = ResourceGuard::new(Capabilities::all(), Box::new(FailingResolver));
    let report = guard.initialize(true);
    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.status(GuardStep::ResolverInit),
        Some(StepStatus::Failed(_))
    ));

    let mut running = start(settings(), allow_all(), Script::Close).await;
    let _client = TcpStream::connect(running.addr).await.unwrap();
    timeout(WAIT, running.seen.recv()).await.unwrap().unwrap();

    let stats = running.stop().await.snapshot();
    assert_eq!(stats.accepted, 1);
}

#[tokio::test]
async fn test_run_without_listeners_fails() {
    let accept = AcceptLoop::new(
        settings(),
        allow_all(),
        Arc::new(lamco_login_frontend::daemon::UnwiredTransport),
        sessions(),
    );
    assert!(accept.run().await.is_err());
}
