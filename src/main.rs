use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden::heartbeat::DnsResolver;
use warden::network::Transport;
use warden::orchestrator::{DockerOrchestrator, NoopOrchestrator, Orchestrator};
use warden::{Config, Election, HeartbeatSupervisor, Metrics};

/// Size-capped log file. Once a write would cross `max_size` the current
/// file becomes `<path>.1`, older ones shift up and the oldest beyond
/// `keep` is overwritten.
struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    keep: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_size: u64, keep: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_size,
            keep,
            file,
            written,
        })
    }

    fn rotated(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        for n in (1..self.keep).rev() {
            let from = self.rotated(n);
            if from.exists() {
                std::fs::rename(&from, self.rotated(n + 1))?;
            }
        }
        if self.keep > 0 {
            std::fs::rename(&self.path, self.rotated(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `WARDEN_LOG_FILE` sends plain `env_logger` output to a rotated file.
/// Otherwise `log` records are bridged into a tracing subscriber on stderr.
/// Both honour `RUST_LOG`, defaulting to `info`.
fn init_logging() -> anyhow::Result<()> {
    if let Some(path) = std::env::var_os("WARDEN_LOG_FILE") {
        let path = PathBuf::from(path);
        let max_size_mb: u64 = env_or("WARDEN_LOG_MAX_SIZE_MB", 10);
        let keep: u32 = env_or("WARDEN_LOG_MAX_FILES", 3);
        let file = RotatingFile::open(path.clone(), max_size_mb * 1024 * 1024, keep)
            .with_context(|| format!("opening log file {}", path.display()))?;

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(file)))
            .try_init()
            .context("installing file logger")?;
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    // `try_init` also installs the `log` to tracing bridge.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Leader election and worker health-checking for a fixed cluster over UDP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a coordinator node until Ctrl-C
    Node {
        #[command(flatten)]
        settings: Settings,

        /// Backend used to restart unresponsive processes
        #[arg(long, value_enum, default_value_t = Backend::Docker)]
        orchestrator: Backend,
    },

    /// Validate a configuration and print the effective result as JSON
    CheckConfig {
        #[command(flatten)]
        settings: Settings,
    },
}

#[derive(Args)]
struct Settings {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unique non-zero id of this node
    #[arg(short, long)]
    id: Option<u32>,

    /// Logical name answered to heartbeat probes
    #[arg(short, long)]
    name: Option<String>,

    /// UDP port of the election socket
    #[arg(long)]
    election_port: Option<u16>,

    /// UDP port of the heartbeat responder
    #[arg(long)]
    heartbeat_port: Option<u16>,

    /// Comma-separated list of peers (id=host:port)
    #[arg(short, long)]
    peers: Option<String>,

    /// Comma-separated names of processes to monitor while coordinating
    #[arg(short, long)]
    watch: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Docker,
    Noop,
}

impl Settings {
    /// File values first, flags on top, then validation.
    fn resolve(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(id) = self.id {
            config.node_id = id;
            if self.name.is_none() && self.config.is_none() {
                config.name = format!("node_{id}");
            }
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(port) = self.election_port {
            config.election_port = port;
        }
        if let Some(port) = self.heartbeat_port {
            config.heartbeat_port = port;
        }
        if let Some(peers) = self.peers {
            config.peers = Config::parse_peers(&peers)?;
        }
        if let Some(watch) = self.watch {
            config.watch = watch
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Command::CheckConfig { settings } => {
            let config = settings.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Node {
            settings,
            orchestrator,
        } => {
            let config = settings.resolve()?;
            run_node(config, orchestrator).await?;
        }
    }

    Ok(())
}

async fn run_node(config: Config, backend: Backend) -> anyhow::Result<()> {
    info!(
        "Starting warden node {} ('{}') with {} peers, watching {:?}",
        config.node_id,
        config.name,
        config.peers().count(),
        config.watch
    );

    let metrics = Arc::new(Metrics::default());

    let election_addr = config.election_addr();
    let transport = Transport::bind(&election_addr)
        .await
        .with_context(|| format!("binding election socket {election_addr}"))?;

    let orchestrator: Arc<dyn Orchestrator> = match backend {
        Backend::Docker => Arc::new(DockerOrchestrator::new()),
        Backend::Noop => Arc::new(NoopOrchestrator),
    };
    let supervisor = HeartbeatSupervisor::new(
        config.heartbeat_config(),
        Arc::new(DnsResolver::new(config.heartbeat_port)),
        orchestrator,
        Arc::clone(&metrics),
    );

    let election = Election::new(config.election_config(), transport, Arc::clone(&metrics))
        .with_heartbeat(supervisor);

    let mut status = election.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match serde_json::to_string(&current) {
                Ok(json) => info!("status {json}"),
                Err(e) => error!("cannot serialize status: {e}"),
            }
        }
    });

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => {
                error!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    election.run(shutdown).await.context("election loop failed")?;

    info!(
        "final metrics {}",
        serde_json::to_string(&metrics.snapshot())?
    );
    Ok(())
}
