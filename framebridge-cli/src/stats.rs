//! Statistics display and formatting

use framebridge::encoder::{SupervisorState, TransportState};
use framebridge::BridgeStats;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_state(state: SupervisorState) -> &'static str {
    match state {
        SupervisorState::Stopped => "stopped",
        SupervisorState::Running {
            transport: TransportState::Up,
        } => "running",
        SupervisorState::Running {
            transport: TransportState::Down,
        } => "running (connection down)",
    }
}

/// Print the end-of-run summary
pub fn display_summary(stats: &BridgeStats) {
    let receiver = &stats.receiver;
    let encoder = &stats.encoder;

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ FRAME BRIDGE SUMMARY                                        │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Uptime:    {}", format_duration(stats.uptime));
    println!(
        "│ Packets:   {} received, {} malformed ({})",
        receiver.packets_received,
        receiver.packets_malformed,
        format_bytes(receiver.bytes_received)
    );
    println!(
        "│ Frames:    {} completed, {} dropped ({:.1}% success)",
        receiver.frames_completed,
        receiver.frames_dropped,
        receiver.success_rate()
    );
    println!(
        "│ Drops:     {} expired, {} evicted, {} invalid, {} overwritten",
        receiver.frames_expired,
        receiver.frames_evicted,
        receiver.frames_invalid,
        receiver.frames_overwritten
    );
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Encoder:   {}", format_state(encoder.state));
    println!(
        "│ Sent:      {} frames, {} failed ({:.1}% success, {:.1} fps)",
        encoder.frames_sent,
        encoder.frames_failed,
        encoder.success_rate(),
        stats.output_fps()
    );
    if let Some(reason) = encoder.last_error.as_deref() {
        println!("│ Last error: {}", reason);
    }
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Quality:   {:.1}%", stats.quality_score());
    println!("└─────────────────────────────────────────────────────────────┘");
}
