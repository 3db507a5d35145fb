//! fakerfs - synthetic control files over a real directory
//!
//! Usage:
//!   fakerfs --src <dir> --target <mountpoint> --config <config.yml>

use clap::Parser;
use daemonize::Daemonize;
use fakerfs::{
    config::Config,
    daemon::{self, Detached},
    fs::{FuseOverlay, MountConfig, OverlayFs},
    Error, Result,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fakerfs")]
#[command(author = "fakerfs Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Overlay synthetic control files on top of a real directory")]
struct Cli {
    /// Backing directory mirrored beneath the synthetic files
    #[arg(short, long, default_value = "./src")]
    src: PathBuf,

    /// Mount point
    #[arg(short, long, default_value = "./target")]
    target: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "./config.yml")]
    config: PathBuf,

    /// Detach from the terminal after startup
    #[arg(short, long)]
    daemonize: bool,

    /// Write logs here instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Pid file written when daemonized
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_file = match cli.log_file.as_deref().map(open_log) {
        Some(Ok(file)) => Some(file),
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        None => None,
    };
    init_logging(cli.verbose, log_file.as_ref());

    if let Err(e) = run(&cli, log_file) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Config(format!("Failed to open log file {}: {}", path.display(), e)))
}

/// RUST_LOG wins; otherwise info, or debug with --verbose
fn init_logging(verbose: bool, log_file: Option<&File>) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    let result = match log_file.map(File::try_clone) {
        Some(Ok(file)) => tracing::subscriber::set_global_default(
            builder.with_ansi(false).with_writer(Mutex::new(file)).finish(),
        ),
        _ => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        ),
    };
    if let Err(e) = result {
        eprintln!("Failed to set subscriber: {}", e);
    }
}

fn run(cli: &Cli, log_file: Option<File>) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    info!("Loading configuration from {:?}", config_path);
    let config = Config::load(&config_path)?;

    let overlay = OverlayFs::from_config(&config, &cli.src)?;

    // Daemonizing changes the working directory, so resolve paths first
    let target = std::fs::canonicalize(&cli.target).map_err(|e| {
        Error::PathNotFound(format!("mount point {}: {}", cli.target.display(), e))
    })?;

    let mut notifier = if cli.daemonize {
        match daemon::detach(daemon_config(cli.pid_file.as_deref(), log_file)?)? {
            Detached::Parent => {
                info!("Mounted {} in the background", target.display());
                return Ok(());
            }
            Detached::Daemon(notifier) => Some(notifier),
        }
    } else {
        if cli.pid_file.is_some() {
            warn!("--pid-file is only used with --daemonize");
        }
        None
    };

    let mount = MountConfig {
        allow_other: cli.allow_other,
    };
    let result = FuseOverlay::new(Arc::new(overlay)).mount(&target, &mount, || {
        if let Some(notifier) = notifier.take() {
            notifier.ready();
        }
    });
    if let (Err(e), Some(notifier)) = (&result, notifier) {
        notifier.failed(e);
    }
    result
}

fn daemon_config(pid_file: Option<&Path>, log_file: Option<File>) -> Result<Daemonize<()>> {
    let mut daemon = Daemonize::new();
    if let Some(pid) = pid_file {
        daemon = daemon.pid_file(absolute(pid)?);
    }
    if let Some(out) = log_file {
        let err = out.try_clone()?;
        daemon = daemon.stdout(out).stderr(err);
    }

    info!("Daemonizing");
    Ok(daemon)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
