//! vanishdht node shell
//!
//! Starts one DHT node, optionally bootstraps off a known peer, and reads
//! commands from stdin until EOF.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use vanishdht::{commands, Node, NodeConfig, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the RPC listener on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Known peer to bootstrap the routing table from
    #[arg(long)]
    bootstrap: Option<SocketAddr>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(short, long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    use tracing_subscriber::{fmt, EnvFilter};
    fmt().with_env_filter(EnvFilter::new(&args.log)).init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let node = Node::spawn(config).await?;
    println!("node {} listening on {}", node.id(), node.local_addr());

    if let Some(peer) = args.bootstrap {
        match node.ping(peer).await {
            Ok(contact) => println!("bootstrapped via {}", contact.id),
            Err(e) => eprintln!("bootstrap ping failed: {}", e),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        println!("{}", commands::execute(&node, line).await);
    }

    Ok(())
}
