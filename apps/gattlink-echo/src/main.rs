use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gattlink_core::{decode, encode, Packet, Preset};
use gattlink_transport::mock::{CommandKind, MockHost};
use gattlink_transport::{Inbound, ManualTimer, PeerAddress, Transport, TransportError};
use tracing::{error, info, warn};

mod settings;

use settings::{EchoSettings, SettingsError};

const DEFAULT_DEVICE_NAME: &str = "gattlink-echo";
const SESSION_MTU: u16 = 247;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Preset name, overrides the settings file
    #[arg(long, short)]
    preset: Option<String>,
    /// Advertised device name
    #[arg(long, env = "GATTLINK_DEVICE_NAME")]
    name: Option<String>,
    /// Log filter, falls back to RUST_LOG then "info"
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted echo session against the in-memory host (default)
    Run {
        /// Simulated centrals
        #[arg(long)]
        peers: Option<u16>,
        /// Writes per central
        #[arg(long)]
        messages: Option<u16>,
    },
    /// Print the resolved parameter set for every preset
    Presets,
    /// Frame a hex payload
    Encode { id: u8, payload: String },
    /// Decode a hex frame
    Decode { frame: String },
}

#[derive(Debug, thiserror::Error)]
enum EchoError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Frame(#[from] gattlink_core::FrameError),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("{0}")]
    Session(String),
}

fn main() {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match &cli.command {
        Some(Commands::Presets) => print_presets(),
        Some(Commands::Encode { id, payload }) => encode_hex(*id, payload),
        Some(Commands::Decode { frame }) => decode_hex(frame),
        Some(Commands::Run { peers, messages }) => run(&cli, *peers, *messages),
        None => run(&cli, None, None),
    };
    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn print_presets() -> Result<(), EchoError> {
    for preset in Preset::ALL {
        let rendered = toml::to_string(&gattlink_core::resolve(preset))?;
        println!("# {preset}\n{rendered}");
    }
    Ok(())
}

fn encode_hex(id: u8, payload: &str) -> Result<(), EchoError> {
    let payload = hex::decode(payload.trim())?;
    println!("{}", hex::encode(encode(id, &payload)?));
    Ok(())
}

fn decode_hex(frame: &str) -> Result<(), EchoError> {
    let packet = decode(&hex::decode(frame.trim())?)?;
    println!(
        "id={:#04x} len={} payload={}",
        packet.id,
        packet.payload.len(),
        hex::encode(&packet.payload)
    );
    Ok(())
}

fn run(cli: &Cli, peers: Option<u16>, messages: Option<u16>) -> Result<(), EchoError> {
    let settings = match &cli.config {
        Some(path) => EchoSettings::load(path)?,
        None => EchoSettings::default(),
    };
    let config = settings.ble_config(cli.preset.as_deref())?;
    let name = cli
        .name
        .clone()
        .or_else(|| settings.device_name.clone())
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
    let peers = peers.or(settings.peers).unwrap_or(2).max(1);
    let messages = messages.or(settings.messages).unwrap_or(3);

    info!(preset = %config.preset, %name, peers, messages, "starting echo session");

    let host = Arc::new(MockHost::new());
    let timer = Arc::new(ManualTimer::new());
    let transport = Transport::builder(host.clone())
        .config(config)
        .timer(timer.clone())
        .build();

    transport.quick_start(&name, |inbound: Inbound, packet: Packet| {
        if let Err(err) = inbound.reply(packet.id, &packet.payload) {
            warn!(conn_id = inbound.conn_id(), %err, "echo reply failed");
        }
    })?;
    let char_handle = transport
        .characteristic_handle()
        .ok_or_else(|| EchoError::Session("characteristic handle missing".into()))?;

    for conn_id in 1..=peers {
        let [hi, lo] = conn_id.to_be_bytes();
        host.connect(conn_id, PeerAddress([0x02, 0x00, 0x00, 0x00, hi, lo]));
    }
    host.negotiate_mtu(1, SESSION_MTU);

    for conn_id in 1..=peers {
        for seq in 0..messages {
            let body = format!("message {seq} from {conn_id}");
            let frame = encode(seq as u8, body.as_bytes())?;
            host.write(conn_id, char_handle, &frame, true);
        }
    }

    let notifications = host.notifications();
    for (conn_id, value) in &notifications {
        info!(conn_id, frame = %hex::encode(value), "notified");
    }
    let expected = usize::from(peers) * usize::from(messages);
    if notifications.len() != expected {
        return Err(EchoError::Session(format!(
            "expected {expected} echoes, host saw {}",
            notifications.len()
        )));
    }

    let starts = || {
        host.count(CommandKind::StartExtAdvertising)
            + host.count(CommandKind::StartLegacyAdvertising)
    };
    let before = starts();
    for conn_id in 1..=peers {
        host.disconnect(conn_id);
    }
    let fired = timer.fire_all();
    let restarts = starts() - before;
    info!(fired, restarts, "advertising re-armed after last disconnect");

    transport.stop()?;
    info!(echoes = expected, "echo session finished");
    Ok(())
}
