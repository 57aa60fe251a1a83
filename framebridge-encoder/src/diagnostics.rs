//! Encoder diagnostic stream classification
//!
//! The encoder's stderr is the only signal the supervisor gets about the
//! downstream publish connection: writes to stdin can keep succeeding into a
//! pipe buffer long after the remote end went away. Each line is sorted into a
//! [`Diagnostic`] class; only the connection classes change supervisor state.

use std::collections::HashMap;

const CONNECTION_LOST: &[&str] = &[
    "connection refused",
    "connection reset",
    "broken pipe",
    "rtmp server",
    "failed to connect",
    "connection timed out",
    "server disconnected",
    "connection lost",
];

const CONNECTION_ALIVE: &[&str] = &["stream mapping", "press [q] to stop", "video:"];

const INPUT_ERROR: &[&str] = &[
    "invalid data found",
    "header missing",
    "no such file",
    "invalid argument",
    "could not find codec",
    "unsupported",
];

/// Class of one diagnostic line
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Downstream connection failed
    ConnectionLost,
    /// Downstream connection is (again) usable
    ConnectionAlive,
    /// Encoder rejected its input
    InputError,
    /// Periodic encoder progress
    Progress(ProgressReport),
    /// Some other error line
    Error,
    /// Anything else
    Info,
}

impl Diagnostic {
    /// Whether this class changes the transport state
    pub fn transport_signal(&self) -> Option<bool> {
        match self {
            Diagnostic::ConnectionLost => Some(false),
            Diagnostic::ConnectionAlive => Some(true),
            _ => None,
        }
    }
}

/// Classify one line of encoder output
pub fn classify(line: &str) -> Diagnostic {
    let lower = line.to_ascii_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if contains_any(INPUT_ERROR) {
        Diagnostic::InputError
    } else if contains_any(CONNECTION_LOST) {
        Diagnostic::ConnectionLost
    } else if contains_any(CONNECTION_ALIVE) {
        Diagnostic::ConnectionAlive
    } else if let Some(report) = ProgressReport::parse(line) {
        Diagnostic::Progress(report)
    } else if lower.contains("error") || lower.contains("failed") {
        Diagnostic::Error
    } else {
        Diagnostic::Info
    }
}

/// Fields of an encoder progress line (`frame=  120 fps= 20 q=28.0 ...`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub quality: Option<String>,
    pub size: Option<String>,
    pub time: Option<String>,
    pub bitrate: Option<String>,
    pub speed: Option<String>,
}

impl ProgressReport {
    /// Parse a progress line; requires both `frame=` and `fps=`
    pub fn parse(line: &str) -> Option<Self> {
        if !line.contains("frame=") || !line.contains("fps=") {
            return None;
        }

        let fields = key_values(line);
        Some(ProgressReport {
            frame: fields.get("frame").and_then(|v| v.parse().ok()),
            fps: fields.get("fps").and_then(|v| v.parse().ok()),
            quality: fields.get("q").cloned(),
            size: fields.get("size").cloned(),
            time: fields.get("time").cloned(),
            bitrate: fields.get("bitrate").cloned(),
            speed: fields.get("speed").cloned(),
        })
    }
}

/// Split `key=value` pairs, tolerating padding after `=` (`frame=  120`)
fn key_values(line: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut tokens = line.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value = if value.is_empty() {
            match tokens.peek() {
                Some(next) if !next.contains('=') => tokens.next().unwrap_or_default(),
                _ => "",
            }
        } else {
            value
        };
        fields.insert(key.to_string(), value.to_string());
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_lines() {
        for line in [
            "rtmp://example/live: Connection refused",
            "av_interleaved_write_frame(): Broken pipe",
            "Failed to connect to rtmp server",
            "[flv @ 0x55] Connection timed out",
        ] {
            assert_eq!(classify(line), Diagnostic::ConnectionLost, "{line}");
        }
    }

    #[test]
    fn test_connection_alive_lines() {
        assert_eq!(classify("Stream mapping:"), Diagnostic::ConnectionAlive);
        assert_eq!(
            classify("Press [q] to stop, [?] for help"),
            Diagnostic::ConnectionAlive
        );
        assert_eq!(
            classify("video:1024kB audio:0kB subtitle:0kB"),
            Diagnostic::ConnectionAlive
        );
    }

    #[test]
    fn test_input_errors_do_not_touch_transport() {
        let diagnostic = classify("pipe:0: Invalid data found when processing input");
        assert_eq!(diagnostic, Diagnostic::InputError);
        assert_eq!(diagnostic.transport_signal(), None);
    }

    #[test]
    fn test_progress_line() {
        let line = "frame=  120 fps= 20 q=28.0 size=     512kB time=00:00:06.00 bitrate= 699.1kbits/s speed=1.01x";
        let Diagnostic::Progress(report) = classify(line) else {
            panic!("expected progress");
        };

        assert_eq!(report.frame, Some(120));
        assert_eq!(report.fps, Some(20.0));
        assert_eq!(report.quality.as_deref(), Some("28.0"));
        assert_eq!(report.size.as_deref(), Some("512kB"));
        assert_eq!(report.time.as_deref(), Some("00:00:06.00"));
        assert_eq!(report.speed.as_deref(), Some("1.01x"));
    }

    #[test]
    fn test_generic_lines() {
        assert_eq!(classify("Error while decoding stream #0:0"), Diagnostic::Error);
        assert_eq!(classify("Input #0, image2pipe, from 'pipe:0':"), Diagnostic::Info);
        assert_eq!(classify(""), Diagnostic::Info);
    }

    #[test]
    fn test_transport_signal() {
        assert_eq!(Diagnostic::ConnectionLost.transport_signal(), Some(false));
        assert_eq!(Diagnostic::ConnectionAlive.transport_signal(), Some(true));
        assert_eq!(Diagnostic::Info.transport_signal(), None);
    }
}
