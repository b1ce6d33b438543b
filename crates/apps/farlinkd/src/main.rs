//! Reference FarLink node daemon: wires a [`NodeStack`] to a UDP radio
//! stand-in and a file-backed blob store, driven by a line-oriented
//! stdin console that implements the control surface from spec §5.
//!
//! This binary exists to exercise `farlink-mesh` end to end, not as a
//! production node image — the real radio driver, GPS source and
//! persistent storage backend are host-specific collaborators the spec
//! explicitly leaves external.

mod config;
mod radio;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use farlink_mesh::naming::NamingStore;
use farlink_mesh::traits::FileBlobStore;
use farlink_mesh::{MeshEvent, NodeStack};
use farlink_wire::{BundlePriority, SosType};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration};

use config::DaemonConfig;
use radio::UdpRadio;

#[derive(Parser, Debug)]
#[command(name = "farlinkd", version, about = "Reference FarLink mesh node daemon")]
struct Cli {
    /// TOML config file; the flags below override whatever it sets.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    node_address: Option<u32>,
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// May be repeated; each `send`/`broadcast` unicasts to all of them.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,
    #[arg(long)]
    storage_dir: Option<PathBuf>,
    /// Sets this node's display name in the naming store at startup.
    #[arg(long)]
    name: Option<String>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

fn now_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32
}

fn load_config(cli: &Cli) -> Result<DaemonConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            DaemonConfig::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => DaemonConfig::default(),
    };
    if let Some(addr) = cli.node_address {
        config.mesh.node_address = addr;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if !cli.peers.is_empty() {
        config.peers.clone_from(&cli.peers);
    }
    if let Some(dir) = &cli.storage_dir {
        config.storage_dir.clone_from(dir);
    }
    if config.mesh.node_address == 0 {
        anyhow::bail!(
            "node_address must be set via config file or --node-address \
             (this crate has no platform serial to derive one from)"
        );
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating storage dir {}", config.storage_dir.display()))?;
    if let Some(name) = &cli.name {
        let mut blob = FileBlobStore::new(&config.storage_dir);
        let mut naming = NamingStore::load(&mut blob);
        naming.set_name(config.mesh.node_address, name).context("persisting node name")?;
    }

    let radio = UdpRadio::bind(config.listen_addr, config.peers.clone())
        .with_context(|| format!("binding UDP radio on {}", config.listen_addr))?;
    log::info!(
        "node {:#010x} listening on {} with {} configured peer(s)",
        config.mesh.node_address,
        config.listen_addr,
        config.peers.len()
    );

    let mut stack = NodeStack::new(config.mesh.clone(), radio);
    let mut ticker = interval(Duration::from_millis(200));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    print_help();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in stack.poll_inbound(now_ms(), now_secs()) {
                    log_event(&event);
                }
                for event in stack.tick(now_ms(), now_secs()) {
                    log_event(&event);
                }
            }
            line = stdin.next_line() => {
                match line? {
                    Some(line) => handle_command(&mut stack, &config.storage_dir, &line),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn log_event(event: &MeshEvent) {
    match event {
        MeshEvent::Message { src, payload, rssi, snr } => {
            println!("[{src:#010x}] ({rssi}dBm/{snr}dB) {}", String::from_utf8_lossy(payload));
        }
        MeshEvent::LinkEstablished { peer } => println!("link established with {peer:#010x}"),
        MeshEvent::LinkClosed { peer } => println!("link closed with {peer:#010x}"),
        MeshEvent::BundleDelivered { bundle_id, payload } => {
            println!("bundle {bundle_id} delivered: {}", String::from_utf8_lossy(payload));
        }
        MeshEvent::SosReceived { src, sos_type, message, rssi } => {
            println!("SOS from {src:#010x} ({sos_type:?}, {rssi}dBm): {message}");
        }
    }
}

fn handle_command(stack: &mut NodeStack<UdpRadio>, storage_dir: &Path, line: &str) {
    let mut head = line.trim().splitn(2, char::is_whitespace);
    let cmd = head.next().unwrap_or("");
    let rest = head.next().unwrap_or("").trim();

    match cmd {
        "" => {}
        "help" => print_help(),
        "status" => print_status(stack),
        "neighbors" => {
            for n in stack.neighbors().iter() {
                println!("{:#010x}  rssi={}dBm snr={}dB quality={}", n.address, n.rssi_dbm, n.snr_db, n.quality);
            }
        }
        "routes" => {
            for r in stack.routing().iter() {
                println!("{:#010x} via {:#010x}  hops={} quality={}", r.destination, r.next_hop, r.hop_count, r.quality);
            }
        }
        "bundles" => {
            for b in stack.dtn().iter() {
                println!(
                    "bundle {} {:#010x}->{:#010x}  {:?} {:?}",
                    b.header.bundle_id, b.header.source, b.header.destination, b.status, b.header.priority
                );
            }
        }
        "send" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            match (args.next().map(parse_addr), args.next()) {
                (Some(Ok(dest)), Some(text)) => {
                    if let Err(e) = stack.send(dest, text.as_bytes(), true, now_ms(), now_secs()) {
                        log::warn!("send failed: {e}");
                    }
                }
                (Some(Err(e)), _) => println!("{e}"),
                _ => println!("usage: send <addr> <text>"),
            }
        }
        "broadcast" => {
            if let Err(e) = stack.broadcast(rest.as_bytes(), now_ms(), now_secs()) {
                log::warn!("broadcast failed: {e}");
            }
        }
        "bundle" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            match (args.next().map(parse_addr), args.next()) {
                (Some(Ok(dest)), Some(text)) => {
                    if let Err(e) = stack.send_bundle(dest, text.as_bytes(), BundlePriority::Normal, true, now_ms(), now_secs()) {
                        log::warn!("send_bundle failed: {e}");
                    }
                }
                (Some(Err(e)), _) => println!("{e}"),
                _ => println!("usage: bundle <addr> <text>"),
            }
        }
        "link" => match parse_addr(rest) {
            Ok(peer) => {
                if let Err(e) = stack.request_link(peer, now_ms(), now_secs()) {
                    log::warn!("request_link failed: {e}");
                }
            }
            Err(e) => println!("{e}"),
        },
        "close" => match parse_addr(rest) {
            Ok(peer) => {
                if stack.close_link(peer) {
                    println!("closed link to {peer:#010x}");
                }
            }
            Err(e) => println!("{e}"),
        },
        "sos" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            let sos_type = args.next().map(parse_sos_type).unwrap_or(SosType::General);
            let message = args.next().unwrap_or("").to_string();
            stack.activate_sos(sos_type, 0, message, now_ms());
        }
        "cancelsos" => stack.cancel_sos(),
        "sosack" => match parse_addr(rest) {
            Ok(src) => {
                stack.sos_ack(src);
            }
            Err(e) => println!("{e}"),
        },
        "name" => {
            let mut blob = FileBlobStore::new(storage_dir);
            let mut naming = NamingStore::load(&mut blob);
            match naming.set_name(stack.own_address(), rest) {
                Ok(()) => println!("name set to {rest:?}"),
                Err(e) => log::warn!("set_name failed: {e}"),
            }
        }
        "quit" | "exit" => std::process::exit(0),
        other => println!("unknown command: {other} (try 'help')"),
    }
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map_err(|_| format!("invalid address: {s}")),
        None => s.parse::<u32>().map_err(|_| format!("invalid address: {s}")),
    }
}

fn parse_sos_type(s: &str) -> SosType {
    match s.to_ascii_lowercase().as_str() {
        "medical" => SosType::Medical,
        "fire" => SosType::Fire,
        "security" => SosType::Security,
        "test" | "emergencytest" => SosType::EmergencyTest,
        _ => SosType::General,
    }
}

fn print_status(stack: &NodeStack<UdpRadio>) {
    println!("node address    : {:#010x}", stack.own_address());
    println!("neighbors       : {}", stack.neighbors().len());
    println!("routes          : {}", stack.routing().iter().count());
    println!("bundles tracked : {}", stack.dtn().iter().count());
    println!("sos active      : {}", stack.sos().is_active());
}

fn print_help() {
    println!(
        "commands: send <addr> <text> | broadcast <text> | bundle <addr> <text> | \
         link <addr> | close <addr> | sos <type> <text> | cancelsos | sosack <addr> | \
         name <text> | status | neighbors | routes | bundles | quit"
    );
}
