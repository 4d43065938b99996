//! Nimbus audio client - main entry point
//!
//! Receives the host's audio protocol over UDP, feeds packets to the
//! session registry, and reports the client queue depth back to the
//! host for pacing.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};

use nimbus_audio::playback::{
    CpalSinkFactory, SessionConfig, SessionRegistry, SimulatedSinkFactory, SinkFactory,
};
use nimbus_audio::protocol::MAX_PACKET_LEN;
use nimbus_common::config::{resolve_config_path, ClientConfig};

/// Command-line arguments for nimbus-audio
#[derive(Parser, Debug)]
#[command(name = "nimbus-audio")]
#[command(about = "Audio playback client for the Nimbus streaming host")]
#[command(version)]
struct Args {
    /// Address to receive host audio packets on
    #[arg(short, long, default_value = "0.0.0.0:5870", env = "NIMBUS_AUDIO_LISTEN")]
    listen: SocketAddr,

    /// Path to the TOML config file
    #[arg(short, long, env = "NIMBUS_CONFIG")]
    config: Option<String>,

    /// Output device name (overrides config)
    #[arg(short, long)]
    device: Option<String>,

    /// Run without an audio device, pacing by wall clock
    #[arg(long)]
    simulate: bool,

    /// How often to report the queue depth to the host
    #[arg(long, default_value = "500")]
    report_interval_ms: u64,
}

fn main() -> Result<()> {
    nimbus_common::logging::init("nimbus_audio=debug");

    let args = Args::parse();

    let config = match resolve_config_path(args.config.as_deref(), "NIMBUS_CONFIG") {
        Some(path) => {
            info!("loading config from {}", path.display());
            ClientConfig::load(&path).context("failed to load config")?
        }
        None => {
            info!("no config file, using defaults");
            ClientConfig::default()
        }
    };

    let device = args.device.or_else(|| config.audio.device.clone());
    let simulate = args.simulate || config.audio.simulate;

    let sink_factory: Arc<dyn SinkFactory> = if simulate {
        info!("audio output is simulated");
        Arc::new(SimulatedSinkFactory)
    } else {
        Arc::new(CpalSinkFactory::new(device))
    };

    let mut registry = SessionRegistry::new(SessionConfig::from(&config.audio), sink_factory);

    let socket = UdpSocket::bind(args.listen)
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let report_interval = Duration::from_millis(args.report_interval_ms.max(1));
    socket
        .set_read_timeout(Some(report_interval))
        .context("failed to set socket timeout")?;

    info!("listening for host audio on {}", args.listen);

    let mut buf = [0u8; MAX_PACKET_LEN];
    let mut last_peer: Option<SocketAddr> = None;
    let mut last_report = Instant::now();

    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                last_peer = Some(peer);
                let data = Bytes::copy_from_slice(&buf[..len]);
                if let Err(e) = registry.on_packet(data, len) {
                    warn!("rejected packet from {}: {}", peer, e);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e).context("socket receive failed"),
        }

        if last_report.elapsed() >= report_interval {
            if let Some(peer) = last_peer {
                let report = registry.queue_report();
                if let Err(e) = socket.send_to(&report.to_wire(), peer) {
                    warn!("queue report to {} failed: {}", peer, e);
                }
            }
            last_report = Instant::now();
        }
    }
}
