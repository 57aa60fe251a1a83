//! Frame Bridge - UDP frame stream to encoder
//!
//! Receives chunked frames on a local UDP port, reassembles and paces them, and
//! feeds them to an external encoder (ffmpeg publishing to RTMP by default).

use anyhow::Context;
use clap::Parser;
use framebridge::{Bridge, ProcessSupervisor};
use framebridge_cli::{display_summary, Config, Variant};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "frame-bridge")]
#[command(about = "Reassemble UDP frame chunks and pace them into an encoder", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (default 127.0.0.1:5000, or :5001 with --raw)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Accept raw-frame chunks (13-byte header)
    #[arg(long)]
    raw: bool,

    /// Target output frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// RTMP publish URL for the ffmpeg preset
    #[arg(long)]
    rtmp_url: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Print an example configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Encoder command line, replacing the ffmpeg preset (after `--`)
    #[arg(last = true)]
    encoder: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.dump_config {
        print!("{}", Config::example().to_toml()?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let bridge_config = config.bridge_config();
    let supervisor_config = config.supervisor_config();
    tracing::info!("Frame Bridge starting...");
    tracing::info!("Encoder command: {}", supervisor_config.command);

    let encoder = Arc::new(ProcessSupervisor::new(supervisor_config));
    let bridge = Bridge::new(bridge_config, encoder);
    bridge.start().context("Failed to start bridge")?;

    match args.duration {
        Some(secs) => {
            if !bridge.wait_timeout(Duration::from_secs(secs)) {
                tracing::info!("Run time of {}s elapsed", secs);
            }
        }
        None => bridge.wait(),
    }

    let failed = !bridge.is_running();
    bridge.stop();

    let stats = bridge.statistics();
    display_summary(&stats);

    if failed {
        anyhow::bail!(
            "Encoder stopped: {}",
            stats.encoder.failure_reason().unwrap_or("no diagnostic output")
        );
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if args.raw {
        config.listener.variant = Variant::Raw;
    }
    if let Some(addr) = args.listen {
        config.listener.address = Some(addr);
    }
    if let Some(fps) = args.fps {
        config.pacing.target_fps = fps;
    }
    if let Some(url) = &args.rtmp_url {
        config.encoder.rtmp_url = url.clone();
    }
    if let Some((program, rest)) = args.encoder.split_first() {
        config.encoder.program = program.clone();
        config.encoder.args = rest.to_vec();
    }
}
