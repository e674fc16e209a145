//! Quill CLI
//!
//! Share a plain text file between machines. Edit it with any editor; the
//! changes show up in everybody else's copy.
//!
//! ## Usage
//!
//! ```bash
//! # Host notes.txt on port 8080
//! quill serve --file notes.txt
//!
//! # Join from another machine (replaces the local copy)
//! quill join 192.168.1.10:8080 --file notes.txt
//!
//! # More logging
//! RUST_LOG=debug quill serve --port 9000 --file notes.txt
//! ```

mod file_surface;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use quill_sync::{parse_listen_port, NodeConfig, PeerAddr, Phase, SyncNode};

use crate::file_surface::{FileSurface, FileWatcher};

/// Collaborative editing of one text file over TCP
#[derive(Parser)]
#[command(name = "quill")]
#[command(version)]
#[command(about = "Collaborative editing of one text file over TCP")]
struct Cli {
    /// Fallback poll interval for filesystems without change
    /// notifications, in milliseconds
    #[arg(long, global = true, default_value_t = 200)]
    poll_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the document and relay edits between peers
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", value_parser = parse_listen_port)]
        port: u16,

        /// Interface to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// The shared file; its current content becomes the document
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Join a hub and mirror its document into a local file
    Join {
        /// Hub address as host:port
        #[arg(value_parser = PeerAddr::parse)]
        addr: PeerAddr,

        /// Local copy of the document (overwritten on join)
        #[arg(short, long)]
        file: PathBuf,

        /// Seconds to wait for the hub to accept
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let poll = Duration::from_millis(cli.poll_ms.max(10));

    match cli.command {
        Commands::Serve { port, bind, file } => {
            let config = NodeConfig {
                bind_host: bind,
                ..NodeConfig::default()
            };
            let node = SyncNode::start(FileSurface::new(&file), config);
            let addr = node.listen(port).await?;
            log::info!("serving {} on {addr}", file.display());
            node.local_edit().await?;
            watch(&node, &file, poll).await?;
            node.shutdown().await;
        }
        Commands::Join {
            addr,
            file,
            timeout_secs,
        } => {
            let config = NodeConfig {
                connect_timeout: Duration::from_secs(timeout_secs),
                ..NodeConfig::default()
            };
            let node = SyncNode::start(FileSurface::new(&file), config);
            node.connect(&addr).await?;
            log::info!("joined {addr}, mirroring into {}", file.display());
            watch(&node, &file, poll).await?;
            node.shutdown().await;
        }
    }
    Ok(())
}

/// Publish file changes until Ctrl-C or until the node falls back to idle.
async fn watch(
    node: &SyncNode<FileSurface>,
    path: &Path,
    poll: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut watcher = FileWatcher::new(path, poll)?;
    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("shutting down");
                break;
            }
            changed = watcher.changed() => {
                if !changed {
                    log::warn!("file watcher stopped");
                    break;
                }
                if let Err(e) = node.local_edit().await {
                    log::warn!("local edit not published: {e}");
                }
            }
            _ = liveness.tick() => {
                if node.phase().await == Phase::Idle {
                    log::info!("connection to hub lost");
                    break;
                }
            }
        }
    }
    Ok(())
}
