//! Burrow CLI
//!
//! Command-line interface for the Burrow disco engine.

use anyhow::Context;
use burrow_crypto::{PrivateKey, PublicKey};
use burrow_disco::{Disco, DiscoConfig, PeerStatus, PeerStatuses};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

mod config;

use config::Config;

/// Burrow - peer path discovery for NAT traversal
#[derive(Parser)]
#[command(name = "burrow")]
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
    /// Generate a new disco keypair
    Keygen {
        /// Output file for the private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the public key for a private key file
    Pubkey {
        /// Private key file
        file: PathBuf,
    },

    /// Run the disco engine for the peers in the config file
    Run,

    /// Probe one peer with an ephemeral key and report path changes
    Probe {
        /// Peer public key (base64)
        #[arg(short = 'k', long)]
        peer: String,

        /// Candidate endpoint (`ip:port`), may be repeated
        #[arg(short, long = "endpoint", required = true)]
        endpoints: Vec<SocketAddr>,

        /// Local port to bind (0 for any)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Keygen { output } => {
            let path = output.unwrap_or_else(|| config.node.private_key_file.clone());
            keygen(&path)?;

            if !config_path.exists() {
                let mut starter = config.clone();
                starter.node.private_key_file = path;
                starter.save(&config_path)?;
                println!("Config written to: {}", config_path.display());
            }
        }
        Commands::Pubkey { file } => {
            let key = read_private_key(&file)?;
            println!("{}", key.public_key());
        }
        Commands::Run => {
            config.validate()?;
            run_node(&config).await?;
        }
        Commands::Probe {
            peer,
            endpoints,
            port,
            duration,
        } => {
            config.validate()?;
            let peer: PublicKey = peer
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid peer public key: {e}"))?;
            let disco_config = DiscoConfig {
                port,
                ..config.disco_config()
            };
            probe(peer, &endpoints, disco_config, duration.map(Duration::from_secs)).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn keygen(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!(
            "Refusing to overwrite existing key file: {}",
            path.display()
        );
    }

    let key = PrivateKey::generate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut encoded = key.to_base64();
    encoded.push('\n');
    let written = std::fs::write(path, &encoded);
    encoded.zeroize();
    written.with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    println!("Private key saved to: {}", path.display());
    println!("Public key: {}", key.public_key());

    Ok(())
}

fn read_private_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let mut contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    let key = PrivateKey::from_base64(&contents);
    contents.zeroize();

    key.map_err(|e| anyhow::anyhow!("Invalid key file {}: {e}", path.display()))
}

async fn run_node(config: &Config) -> anyhow::Result<()> {
    let private_key = read_private_key(&config.node.private_key_file).with_context(|| {
        "No usable disco key; create one with `burrow keygen`".to_string()
    })?;

    let disco = Disco::bind(private_key, config.disco_config()).await?;
    disco.start()?;

    println!("Disco public key: {}", disco.public_key());
    for addr in disco.local_addrs() {
        println!("Listening on: {addr}");
    }

    let mut labels = HashMap::new();
    for peer in &config.peers {
        let key = peer.parse_public_key()?;
        let endpoints = peer.parse_endpoints()?;

        disco.add_peer(key)?;
        disco.set_endpoints(&key, &endpoints)?;
        labels.insert(key, peer.label().to_string());

        tracing::info!(peer = %peer.label(), endpoints = endpoints.len(), "Peer added");
    }

    let reporter = disco.notify_statuses(status_reporter(labels));

    println!("Press Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;

    println!("Shutting down...");
    disco.close().await;
    reporter.abort();

    Ok(())
}

async fn probe(
    peer: PublicKey,
    endpoints: &[SocketAddr],
    config: DiscoConfig,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    let disco = Disco::bind(PrivateKey::generate()?, config).await?;
    disco.start()?;

    println!("Ephemeral public key: {}", disco.public_key());
    println!("The remote node must list this key as a peer to answer probes.");

    disco.add_peer(peer)?;
    disco.set_endpoints(&peer, endpoints)?;

    let labels = HashMap::from([(peer, peer.to_base64())]);
    let reporter = disco.notify_statuses(status_reporter(labels));

    match duration {
        Some(limit) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                () = tokio::time::sleep(limit) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    if let Some(session) = disco.peer(&peer) {
        for (id, addr, status, priority) in session.paths() {
            println!(
                "path {id} {addr}: {:?} rtt={:?} priority={:?}",
                status.state, status.rtt, priority
            );
        }
    }

    disco.close().await;
    reporter.abort();

    Ok(())
}

/// Build a status callback that prints one line per peer whose status changed.
fn status_reporter(labels: HashMap<PublicKey, String>) -> impl FnMut(PeerStatuses) + Send + 'static {
    let mut last: PeerStatuses = HashMap::new();

    move |statuses| {
        for (key, status) in &statuses {
            if last.get(key) == Some(status) {
                continue;
            }
            let label = labels.get(key).cloned().unwrap_or_else(|| key.to_base64());
            println!("{label}: {}", describe(status));
        }
        last = statuses;
    }
}

fn describe(status: &PeerStatus) -> String {
    match &status.active {
        Some(active) => format!("connected via {} (rtt {:?})", active.addr, active.rtt),
        None => "no active path".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_disco::ActivePath;

    #[test]
    fn test_cli_parses_probe() {
        let key = PrivateKey::generate().unwrap().public_key().to_base64();
        let cli = Cli::try_parse_from([
            "burrow",
            "probe",
            "--peer",
            &key,
            "--endpoint",
            "192.0.2.1:51821",
            "--endpoint",
            "[2001:db8::1]:51821",
            "--duration",
            "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Probe {
                endpoints,
                port,
                duration,
                ..
            } => {
                assert_eq!(endpoints.len(), 2);
                assert_eq!(port, 0);
                assert_eq!(duration, Some(5));
            }
            _ => panic!("expected probe command"),
        }
    }

    #[test]
    fn test_cli_probe_requires_endpoint() {
        assert!(Cli::try_parse_from(["burrow", "probe", "--peer", "x"]).is_err());
    }

    #[test]
    fn test_keygen_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/disco.key");

        keygen(&path).unwrap();
        let key = read_private_key(&path).unwrap();
        assert_ne!(key.public_key().to_bytes(), [0u8; 32]);

        // Existing key files are never overwritten
        assert!(keygen(&path).is_err());
        assert_eq!(
            read_private_key(&path).unwrap().public_key(),
            key.public_key()
        );
    }

    #[test]
    fn test_read_private_key_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, "not a key").unwrap();

        assert!(read_private_key(&path).is_err());
        assert!(read_private_key(&dir.path().join("missing.key")).is_err());
    }

    #[test]
    fn test_describe_status() {
        let connected = PeerStatus {
            active: Some(ActivePath {
                addr: "192.0.2.1:51821".parse().unwrap(),
                rtt: Duration::from_millis(12),
            }),
        };
        assert_eq!(describe(&connected), "connected via 192.0.2.1:51821 (rtt 12ms)");
        assert_eq!(describe(&PeerStatus::default()), "no active path");
    }
}
