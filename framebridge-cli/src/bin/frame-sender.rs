//! Frame Sender - test producer for frame-bridge
//!
//! Fragments JPEG files (or synthetic frames) into chunks and sends them over
//! UDP at a fixed frame rate.

use clap::Parser;
use framebridge::protocol::{fragment_frame, FrameFormat, RawFrameInfo};
use framebridge_cli::format_bytes;
use framebridge_io::{DatagramSocket, FramePacer};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "frame-sender")]
#[command(about = "Send chunked frames to a frame-bridge listener", long_about = None)]
struct Args {
    /// Destination address
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    target: SocketAddr,

    /// JPEG files to send in rotation; synthetic frames when empty
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Frames per second
    #[arg(long, default_value = "20")]
    fps: f64,

    /// Number of frames to send (0 = until interrupted)
    #[arg(short = 'n', long, default_value = "100")]
    count: u64,

    /// Synthetic frame size in bytes
    #[arg(long, default_value = "20000")]
    size: usize,

    /// Maximum chunk payload
    #[arg(long, default_value = "1400")]
    max_payload: usize,

    /// Use the raw-frame chunk header
    #[arg(long)]
    raw: bool,

    /// Raw frame width
    #[arg(long, default_value = "1280")]
    width: u16,

    /// Raw frame height
    #[arg(long, default_value = "720")]
    height: u16,

    /// Send each frame's chunks last-to-first
    #[arg(long)]
    reverse: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// JPEG-framed filler: SOI, a pattern that varies per frame, EOI
fn synthetic_frame(frame_id: u32, size: usize) -> Vec<u8> {
    let size = size.max(4);
    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(&[0xFF, 0xD8]);
    data.extend((0..size - 4).map(|i| (i as u32).wrapping_add(frame_id) as u8 & 0x7F));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if !args.fps.is_finite() || args.fps <= 0.0 {
        anyhow::bail!("--fps must be positive");
    }

    let files = args
        .input
        .iter()
        .map(|path| {
            fs::read(path).map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path.display(), e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let raw = args.raw.then_some(RawFrameInfo {
        format: FrameFormat::Rgb24,
        width: args.width,
        height: args.height,
    });

    let local: SocketAddr = if args.target.ip().is_loopback() {
        "127.0.0.1:0".parse()?
    } else {
        "0.0.0.0:0".parse()?
    };
    let socket = DatagramSocket::bind(local, Duration::from_millis(100))?;
    tracing::info!(
        "Sending {} frames to {} at {} fps",
        if args.count == 0 { "unlimited".to_string() } else { args.count.to_string() },
        args.target,
        args.fps
    );

    let mut pacer = FramePacer::new(args.fps, Duration::from_secs(1));
    let start = Instant::now();
    let mut frame_id: u32 = 0;
    let mut bytes_sent = 0u64;
    let mut frames_sent = 0u64;

    while args.count == 0 || frames_sent < args.count {
        frame_id = frame_id.wrapping_add(1);
        let data = if files.is_empty() {
            synthetic_frame(frame_id, args.size)
        } else {
            files[(frames_sent % files.len() as u64) as usize].clone()
        };

        let mut chunks = fragment_frame(frame_id, &data, args.max_payload, raw)?;
        if args.reverse {
            chunks.reverse();
        }

        pacer.pace();
        for chunk in &chunks {
            match socket.send_to(&chunk.to_bytes(), args.target) {
                Ok(n) => bytes_sent += n as u64,
                Err(e) => tracing::warn!("Send error: {}", e),
            }
        }
        frames_sent += 1;

        tracing::debug!("Frame {}: {} bytes in {} chunks", frame_id, data.len(), chunks.len());
        if frames_sent % 100 == 0 {
            tracing::info!("Sent {} frames ({})", frames_sent, format_bytes(bytes_sent));
        }
    }

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        "Done: {} frames, {} in {:.1}s ({:.1} fps)",
        frames_sent,
        format_bytes(bytes_sent),
        elapsed,
        frames_sent as f64 / elapsed
    );
    Ok(())
}
