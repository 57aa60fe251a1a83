//! Configuration file support for frame-bridge

use framebridge::{BridgeConfig, ChunkVariant, EncoderCommand, FrameValidation, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Which chunk format the listener accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// JPEG frames, 8-byte chunk header
    #[default]
    Compressed,
    /// Raw frames with format and dimensions, 13-byte chunk header
    Raw,
}

impl From<Variant> for ChunkVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Compressed => ChunkVariant::Compressed,
            Variant::Raw => ChunkVariant::Raw,
        }
    }
}

/// Structural check applied to reassembled frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    Jpeg,
    None,
}

impl From<Validation> for FrameValidation {
    fn from(validation: Validation) -> Self {
        match validation {
            Validation::Jpeg => FrameValidation::Jpeg,
            Validation::None => FrameValidation::None,
        }
    }
}

/// UDP listener configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSection {
    /// Listen address; defaults to 127.0.0.1:5000 (compressed) or :5001 (raw)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,
    pub variant: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_timeout_ms: Option<u64>,
    /// Kernel receive buffer in bytes; 0 keeps the OS default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_buffer: Option<usize>,
}

/// Reassembly configuration; unset fields take the variant's defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
}

/// Output pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub target_fps: f64,
    pub max_sleep_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        PacingSection {
            target_fps: 20.0,
            max_sleep_ms: 50,
        }
    }
}

/// External encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub program: String,
    /// Full argument list; when empty the ffmpeg RTMP preset is used
    pub args: Vec<String>,
    pub rtmp_url: String,
    pub codec: String,
    pub maxrate: String,
    pub bufsize: String,
    /// Reject frames without the JPEG SOI marker; defaults on for compressed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_jpeg: Option<bool>,
    pub min_frame_size: usize,
    pub graceful_timeout_ms: u64,
    /// Extra environment for the encoder process
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for EncoderSection {
    fn default() -> Self {
        EncoderSection {
            program: "ffmpeg".to_string(),
            args: Vec::new(),
            rtmp_url: "rtmp://127.0.0.1/live/stream".to_string(),
            codec: "libx264".to_string(),
            maxrate: "1200k".to_string(),
            bufsize: "600k".to_string(),
            validate_jpeg: None,
            min_frame_size: framebridge::encoder::MIN_FRAME_SIZE,
            graceful_timeout_ms: 3000,
            env: BTreeMap::new(),
        }
    }
}

impl EncoderSection {
    /// Encoder command line for a stream at `fps`
    pub fn command(&self, fps: f64) -> EncoderCommand {
        let command = if self.args.is_empty() {
            self.preset(fps)
        } else {
            EncoderCommand::new(&self.program).args(&self.args)
        };
        self.env
            .iter()
            .fold(command, |command, (key, value)| command.env(key, value))
    }

    /// ffmpeg MJPEG to FLV/RTMP command line
    fn preset(&self, fps: f64) -> EncoderCommand {

        let rate = format_rate(fps);
        let gop = ((fps * 2.0).round() as u64).max(1);

        let mut command = EncoderCommand::new(&self.program)
            .arg("-y")
            .args(["-f", "image2pipe", "-vcodec", "mjpeg"])
            .args(["-framerate", rate.as_str()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", self.codec.as_str()]);

        if self.codec == "libx264" {
            command = command
                .args(["-preset", "ultrafast", "-tune", "zerolatency", "-crf", "30"])
                .args([
                    "-x264-params".to_string(),
                    format!("keyint={}:min-keyint={}:bframes=0", gop, (gop / 2).max(1)),
                ]);
        } else {
            command = command.args(["-g".to_string(), gop.to_string()]);
        }

        command
            .args(["-maxrate", self.maxrate.as_str(), "-bufsize", self.bufsize.as_str()])
            .args(["-vf", "format=yuv420p"])
            .args(["-r", rate.as_str(), "-vsync", "cfr"])
            .args(["-f", "flv", "-flvflags", "no_duration_filesize", "-fflags", "+genpts"])
            .arg(&self.rtmp_url)
    }
}

fn format_rate(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{:.3}", fps)
    }
}

/// Periodic statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// Report interval in seconds; 0 disables
    pub interval_secs: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        StatsSection { interval_secs: 5 }
    }
}

/// frame-bridge configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerSection,
    pub reassembly: ReassemblySection,
    pub pacing: PacingSection,
    pub encoder: EncoderSection,
    pub stats: StatsSection,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Example configuration with every defaulted field spelled out
    pub fn example() -> Self {
        let bridge = BridgeConfig::default();
        Config {
            listener: ListenerSection {
                address: Some(bridge.listener.addr),
                variant: Variant::Compressed,
                recv_timeout_ms: Some(bridge.listener.recv_timeout.as_millis() as u64),
                recv_buffer: Some(bridge.listener.recv_buffer),
            },
            reassembly: ReassemblySection {
                max_pending: Some(bridge.reassembly.max_pending),
                eviction_fraction: Some(bridge.reassembly.eviction_fraction),
                stale_timeout_ms: Some(bridge.reassembly.stale_timeout.as_millis() as u64),
                sweep_interval_ms: Some(bridge.sweep_interval.as_millis() as u64),
                validation: Some(Validation::Jpeg),
                queue_capacity: Some(bridge.queue_capacity),
            },
            pacing: PacingSection::default(),
            encoder: EncoderSection {
                validate_jpeg: Some(true),
                ..EncoderSection::default()
            },
            stats: StatsSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fps = self.pacing.target_fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "pacing.target_fps must be positive, got {}",
                fps
            )));
        }
        if let Some(fraction) = self.reassembly.eviction_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ConfigError::Invalid(format!(
                    "reassembly.eviction_fraction must be within 0..=1, got {}",
                    fraction
                )));
            }
        }
        if self.reassembly.max_pending == Some(0) {
            return Err(ConfigError::Invalid(
                "reassembly.max_pending must be at least 1".to_string(),
            ));
        }
        if self.reassembly.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "reassembly.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.encoder.program.is_empty() {
            return Err(ConfigError::Invalid("encoder.program is empty".to_string()));
        }
        if self.validates_jpeg() && self.encoder.min_frame_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "encoder.min_frame_size must be at least 2 with JPEG validation, got {}",
                self.encoder.min_frame_size
            )));
        }
        Ok(())
    }

    /// Pipeline settings, with the variant's defaults for anything unset
    pub fn bridge_config(&self) -> BridgeConfig {
        let listener = &self.listener;
        let mut bridge = match listener.variant {
            Variant::Compressed => BridgeConfig::compressed(
                listener
                    .address
                    .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5000))),
            ),
            Variant::Raw => BridgeConfig::raw(
                listener
                    .address
                    .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5001))),
            ),
        };

        if let Some(ms) = listener.recv_timeout_ms {
            bridge.listener.recv_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = listener.recv_buffer {
            bridge.listener.recv_buffer = size;
        }

        let reassembly = &self.reassembly;
        if let Some(max_pending) = reassembly.max_pending {
            bridge.reassembly.max_pending = max_pending;
        }
        if let Some(fraction) = reassembly.eviction_fraction {
            bridge.reassembly.eviction_fraction = fraction;
        }
        if let Some(ms) = reassembly.stale_timeout_ms {
            bridge.reassembly.stale_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = reassembly.sweep_interval_ms {
            bridge.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(validation) = reassembly.validation {
            bridge.reassembly.validation = validation.into();
        }
        if let Some(capacity) = reassembly.queue_capacity {
            bridge.queue_capacity = capacity;
        }

        bridge.target_fps = self.pacing.target_fps;
        bridge.max_sleep = Duration::from_millis(self.pacing.max_sleep_ms);
        bridge.stats_interval = match self.stats.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        bridge
    }

    /// Encoder supervisor settings
    /// Whether the encoder rejects frames without a JPEG marker
    fn validates_jpeg(&self) -> bool {
        self.encoder
            .validate_jpeg
            .unwrap_or(self.listener.variant == Variant::Compressed)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let encoder = &self.encoder;
        let mut config = SupervisorConfig::new(encoder.command(self.pacing.target_fps));
        config.validate_jpeg = self.validates_jpeg();
        config.min_frame_size = encoder.min_frame_size;
        config.graceful_timeout = Duration::from_millis(encoder.graceful_timeout_ms);
        config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
