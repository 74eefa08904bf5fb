//! Parley CLI
//!
//! Secure peer-to-peer messaging node

mod config;
mod keyfile;

use clap::{Parser, Subcommand};
use parley_core::{Identity, InboundMessage, Node, PeerId};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::{Config, resolve_all};

/// Parley - end-to-end encrypted peer-to-peer messaging
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Keygen {
        /// Output file for the private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the peer ID of a key file
    Id {
        /// Private key file (defaults to the configured key file)
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Run a node with a stdin/stdout gateway
    ///
    /// Each input line `<peer-id-hex> <text>` sends `text` to the peer.
    /// Received messages print as `<peer-id-hex>: <text>`.
    Run {
        /// Listen address (repeatable)
        #[arg(short, long)]
        listen: Vec<String>,

        /// Bootstrap node host:port (repeatable)
        #[arg(short, long)]
        bootstrap: Vec<String>,

        /// Private key file (defaults to the configured key file)
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Manage the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    // RUST_LOG overrides the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen { output } => generate_keypair(output)?,
        Commands::Id { key } => show_id(key.as_deref().unwrap_or(&config.node.key_file))?,
        Commands::Run {
            listen,
            bootstrap,
            key,
        } => run_node(config, listen, bootstrap, key).await?,
        Commands::Config { init } => {
            if init {
                init_config(&config_path)?;
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Generate a new identity keypair
fn generate_keypair(output: Option<PathBuf>) -> anyhow::Result<()> {
    let identity = Identity::generate()?;

    println!("Peer ID:    {}", identity.peer_id().to_hex());
    println!("Public key: {}", identity.public_key().to_hex());

    match output {
        Some(path) => {
            keyfile::save_identity(&identity, &path)?;
            println!("Private key saved to: {}", path.display());
        }
        None => println!("\nPrivate key not saved (use --output to save)"),
    }
    Ok(())
}

fn show_id(key_file: &std::path::Path) -> anyhow::Result<()> {
    let identity = keyfile::load_identity(key_file)?;
    println!("Peer ID:    {}", identity.peer_id().to_hex());
    println!("Public key: {}", identity.public_key().to_hex());
    Ok(())
}

fn init_config(path: &std::path::Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Run a node until stdin closes or Ctrl+C
async fn run_node(
    config: Config,
    listen: Vec<String>,
    bootstrap: Vec<String>,
    key: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut node_config = config.to_node_config()?;
    if !listen.is_empty() {
        node_config.listen_addrs = resolve_all(&listen)?;
    }
    if !bootstrap.is_empty() {
        node_config.bootstrap_nodes = resolve_all(&bootstrap)?;
    }

    let key_file = key.unwrap_or(config.node.key_file);
    let identity = if key_file.exists() {
        keyfile::load_identity(&key_file)?
    } else {
        tracing::warn!(
            path = %key_file.display(),
            "Key file not found, using an ephemeral identity"
        );
        Identity::generate()?
    };

    let node = Node::new_from_identity(identity, node_config).await?;
    let inbound = node.start().await?;

    println!("Peer ID: {}", node.peer_id().to_hex());
    for addr in node.local_addrs() {
        println!("Listening on {addr}");
    }

    let peers = node.join().await?;
    tracing::info!(peers, "Joined overlay");

    let printer = tokio::spawn(print_inbound(inbound));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_outbound(&line) {
                    Ok((peer_id, text)) => {
                        if let Err(e) = node.send_message(peer_id, text.as_bytes()).await {
                            eprintln!("send to {} failed: {e}", peer_id.short());
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    println!("Shutting down...");
    node.stop().await?;
    printer.abort();
    Ok(())
}

async fn print_inbound(mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        println!(
            "{}: {}",
            message.peer_id.to_hex(),
            String::from_utf8_lossy(&message.payload)
        );
    }
}

/// Split a gateway line into recipient and text.
fn parse_outbound(line: &str) -> anyhow::Result<(PeerId, &str)> {
    let Some((peer, text)) = line.trim_start().split_once(char::is_whitespace) else {
        anyhow::bail!("expected `<peer-id-hex> <text>`");
    };
    let peer_id: PeerId = peer
        .parse()
        .map_err(|e| anyhow::anyhow!("bad peer id: {e}"))?;
    Ok((peer_id, text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outbound() {
        let peer = PeerId::random();
        let line = format!("{} hello there", peer.to_hex());

        let (parsed, text) = parse_outbound(&line).unwrap();
        assert_eq!(parsed, peer);
        assert_eq!(text, "hello there");
    }

    #[test]
    fn test_parse_outbound_rejects_bad_lines() {
        assert!(parse_outbound("no-text-here").is_err());
        assert!(parse_outbound("zz hello").is_err());
        assert!(parse_outbound(&format!("{} hi", "ab".repeat(31))).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "parley",
            "run",
            "--listen",
            "127.0.0.1:0",
            "--bootstrap",
            "127.0.0.1:4001",
            "--bootstrap",
            "127.0.0.1:4002",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                listen, bootstrap, ..
            } => {
                assert_eq!(listen, vec!["127.0.0.1:0"]);
                assert_eq!(bootstrap.len(), 2);
            }
            _ => panic!("expected run"),
        }
    }
}
