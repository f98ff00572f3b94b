//! RCK Server Binary
//!
//! Runs the remote heap server and a couple of helper commands.
//!
//! # Examples
//!
//! ```bash
//! # Start server on the default address (127.0.0.1:50051)
//! rckd serve
//!
//! # Bind elsewhere, cap the heap at 1 GiB, skip the LAPACKE hook
//! rckd serve --bind 0.0.0.0:6000 --max-heap-bytes 1073741824 --no-kernel
//!
//! # Show the effective configuration
//! rckd --config rck.toml config
//! ```

use clap::{Args, Parser, Subcommand};
use rck::config::RckConfig;
use rck::heap::BufferStore;
use rck::network::{ProtocolServer, ServerConfig};
use rck::plugin::load_kernel;
use rck::HeapService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// RCK - Remote Computation Kernel
#[derive(Parser, Debug)]
#[command(name = "rckd")]
#[command(version = rck::VERSION)]
#[command(about = "RCK - a remote heap for typed numeric buffers", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "RCK_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "RCK_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the heap server
    Serve(ServeArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Show server version
    Version,
}

/// Server arguments; each overrides the configuration file
#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Upper bound on live buffer bytes (0 = unlimited)
    #[arg(long)]
    max_heap_bytes: Option<usize>,

    /// Shared library providing LAPACKE_dgeqrf
    #[arg(long)]
    kernel_library: Option<String>,

    /// Do not load the execute kernel
    #[arg(long)]
    no_kernel: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut RckConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(max) = self.max_heap_bytes {
            config.max_heap_bytes = max;
        }
        if let Some(library) = &self.kernel_library {
            config.kernel_library = library.clone();
        }
        if self.no_kernel {
            config.kernel_enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RckConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(ref args) => {
            // Guard must live as long as the server to flush file logs.
            let _guard = setup_logging(&cli)?;
            let mut config = config;
            args.apply(&mut config);
            serve_command(config).await
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("RCK {}", rck::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "rckd.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(guard)
}

async fn serve_command(config: RckConfig) -> anyhow::Result<()> {
    info!(
        bind = %config.bind_addr,
        max_heap_bytes = config.max_heap_bytes,
        "Starting RCK {}",
        rck::VERSION
    );

    let kernel = if config.kernel_enabled {
        load_kernel(&config.kernel_library)
    } else {
        warn!("Execute hook disabled by configuration");
        None
    };

    let service = Arc::new(HeapService::new(
        BufferStore::with_limit(config.max_heap_bytes),
        kernel,
    )?);

    let server = ProtocolServer::bind(ServerConfig::from(&config), service).await?;
    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
}
