//! lamco-login-frontend
//!
//! Entry point for the daemon binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_login_frontend::access::AccessControlFilter;
use lamco_login_frontend::config::{FrontendConfig, LaunchMode, DEFAULT_CONFIG_PATH};
use lamco_login_frontend::daemon::{
    inetd, AcceptLoop, AcceptSettings, ConnectionHandler, SessionContext, UnwiredTransport,
};
use lamco_login_frontend::guard::ResourceGuard;
use lamco_login_frontend::platform::{AmbientEnv, Capabilities};
use lamco_login_frontend::session::{
    ClassTable, EnvironmentBuilder, LoginClassPolicy, SessionLauncher,
};
use lamco_login_frontend::utils::{format_user_error, log_startup_diagnostics};

/// Command-line arguments for lamco-login-frontend
#[derive(Parser, Debug)]
#[command(name = "lamco-login-frontend")]
#[command(version, about = "Remote login daemon front end", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Listen address (repeatable), overrides the configuration
    #[arg(short, long, env = "LOGIN_FRONTEND_LISTEN", value_delimiter = ',')]
    pub listen: Vec<String>,

    /// Serve a single connection on stdin (started by inetd)
    #[arg(short, long)]
    pub inetd: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.check_config {
        return check_config(&args.config);
    }

    let _log_guard = init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-login-frontend v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {}", env!("BUILD_DATE"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    // Load configuration
    let config = FrontendConfig::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        FrontendConfig::default()
    });
    let config = config.with_overrides(args.listen.clone());
    debug!("Config: {:?}", config);

    let capabilities = Capabilities::resolve(&config.capabilities);

    // Must run before anything restricts the filesystem view
    let guard = ResourceGuard::system(capabilities, config.guard.mech_file.clone());
    let report = guard.initialize(!args.inetd);
    log_startup_diagnostics(&capabilities, &report);

    if let Err(e) = run(&args, config, capabilities).await {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    info!("lamco-login-frontend shut down");
    Ok(())
}

async fn run(args: &Args, config: FrontendConfig, capabilities: Capabilities) -> Result<()> {
    let filter = AccessControlFilter::from_config(&config.access, &capabilities)
        .context("Failed to load access rules")?;
    info!(
        "Access control: {} rules, default {}",
        filter.policy().rules().len(),
        filter.policy().default_action()
    );

    let sessions = session_context(&config, &capabilities, args.inetd);
    let handler: Arc<dyn ConnectionHandler> = Arc::new(UnwiredTransport);

    if args.inetd {
        let (stream, peer) = inetd::stdin_connection().context("stdin is not a socket")?;
        inetd::serve_connection(
            stream,
            peer,
            &filter,
            handler,
            Arc::new(sessions),
            config.login_grace_time(),
        )
        .await?;
        return Ok(());
    }

    let settings = AcceptSettings::from_config(&config)?;
    let addrs = config.listen_addresses()?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    AcceptLoop::new(settings, filter, handler, sessions)
        .with_shutdown(shutdown)
        .bind(&addrs)
        .await?
        .run()
        .await?;

    Ok(())
}

fn session_context(config: &FrontendConfig, capabilities: &Capabilities, inetd: bool) -> SessionContext {
    let policy: Option<Arc<dyn LoginClassPolicy>> = if capabilities.login_class {
        match ClassTable::from_config(&config.login_class) {
            Ok(table) => Some(Arc::new(table)),
            Err(e) => {
                error!("Login classes unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut session_config = config.session.clone();
    if session_config.launch_mode == LaunchMode::Exec && !inetd {
        warn!("launch_mode = \"exec\" needs --inetd, using spawn");
        session_config.launch_mode = LaunchMode::Spawn;
    }

    SessionContext::new(
        EnvironmentBuilder::new(config.environment.clone(), capabilities),
        policy,
        SessionLauncher::new(&session_config),
        AmbientEnv::capture(),
    )
}

fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = hup.recv() => "SIGHUP",
        };
        info!("Received {}, shutting down", name);
        shutdown.cancel();
    });

    Ok(())
}

fn check_config(path: &str) -> Result<()> {
    match FrontendConfig::load(path) {
        Ok(_) => {
            println!("{}: OK", path);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            Err(e)
        }
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_login_frontend={level},warn",
            level = log_level
        ))
    });

    // stderr, since stdout is the connection in --inetd mode
    if let Some(log_file_path) = &args.log_file {
        let path = Path::new(log_file_path);
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("Invalid log file path: {}", log_file_path))?;
        let (file, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().json().with_writer(file).with_ansi(false))
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(file).with_ansi(false))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false))
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
        Ok(Some(guard))
    } else {
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
        Ok(None)
    }
}
