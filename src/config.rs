use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OfficecamConfig {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub report: ReportConfig,
    pub watchdog: WatchdogConfig,
    pub upload: UploadConfig,
    pub preview: PreviewConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Frame source backend: "test" or "gstreamer"
    #[serde(default = "default_camera_source")]
    pub source: String,

    /// GStreamer source element description used by the "gstreamer" backend
    #[serde(default = "default_camera_pipeline")]
    pub pipeline: String,

    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the sensor
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Upper bound on a single capture call in milliseconds
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Resolution fed to the tracker (width, height)
    #[serde(default = "default_downscaled_resolution")]
    pub downscaled_resolution: (u32, u32),

    /// How long the processing loop waits on the frame queue before re-checking shutdown
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Bounded wait when joining pipeline workers on stop
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReportConfig {
    /// Base URL of the core service. Reporting is disabled when unset.
    #[serde(default)]
    pub core_url: Option<String>,

    /// Minimum seconds between two reports
    #[serde(default = "default_report_interval")]
    pub interval_seconds: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// JPEG quality of the attached snapshot
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_poll")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_watchdog_threshold")]
    pub stale_threshold_seconds: u64,

    /// Process exit status used for a forced restart
    #[serde(default = "default_watchdog_exit_code")]
    pub exit_code: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UploadConfig {
    /// Remote media sink (rtmp://, udp://host:port, tcp://host:port). Sidecar disabled when unset.
    #[serde(default)]
    pub sink: Option<String>,

    /// GStreamer source element description for the encoder branch
    #[serde(default = "default_upload_pipeline")]
    pub pipeline: String,

    #[serde(default = "default_upload_bitrate")]
    pub bitrate_kbps: u32,

    #[serde(default = "default_upload_retry_delay")]
    pub retry_delay_seconds: u64,

    #[serde(default = "default_upload_check_interval")]
    pub check_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_ip")]
    pub bind_ip: String,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// Per-frame socket write timeout for the stream sender
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long the sender waits for a frame before re-checking its state
    #[serde(default = "default_preview_pop_timeout_ms")]
    pub queue_pop_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: pretty, compact or json
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for the daily rolling log file. File logging disabled when unset.
    #[serde(default)]
    pub directory: Option<String>,
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl ReportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_seconds)
    }
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl PreviewConfig {
    pub fn command_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.command_port))
    }

    pub fn stream_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.stream_port))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn queue_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_pop_timeout_ms)
    }

    fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_ip.parse().map_err(|e| {
            ConfigError::Message(format!("Invalid preview bind_ip '{}': {}", self.bind_ip, e))
        })
    }
}

/// Flat variable names used by existing deployments, mapped onto config keys.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("CORE_URL", "report.core_url"),
    ("UPLOAD_SINK", "upload.sink"),
    ("PREVIEW_PORT", "preview.command_port"),
    ("PREVIEW_STREAM_PORT", "preview.stream_port"),
    ("LOG_LEVEL", "logging.level"),
];

impl OfficecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("officecam.toml")
    }

    /// Load configuration from a specific file path, then apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_lookup(path, |key| std::env::var(key).ok())
    }

    /// Load configuration, resolving legacy flat variables through `lookup`
    pub fn load_with_lookup<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let mut builder = Self::defaults()?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("OFFICECAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV_KEYS {
            let value = lookup(var).filter(|v| !v.trim().is_empty());
            if let Some(value) = value {
                debug!("Applying {} from environment to {}", var, key);
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: OfficecamConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("camera.source", default_camera_source())?
            .set_default("camera.pipeline", default_camera_pipeline())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.capture_timeout_ms", default_capture_timeout_ms())?
            .set_default(
                "pipeline.downscaled_resolution",
                vec![
                    default_downscaled_resolution().0,
                    default_downscaled_resolution().1,
                ],
            )?
            .set_default("pipeline.pop_timeout_ms", default_pop_timeout_ms())?
            .set_default("pipeline.join_timeout_ms", default_join_timeout_ms())?
            .set_default("report.interval_seconds", default_report_interval())?
            .set_default("report.request_timeout_seconds", default_request_timeout())?
            .set_default("report.jpeg_quality", default_jpeg_quality() as u32)?
            .set_default("watchdog.poll_interval_seconds", default_watchdog_poll())?
            .set_default("watchdog.stale_threshold_seconds", default_watchdog_threshold())?
            .set_default("watchdog.exit_code", default_watchdog_exit_code())?
            .set_default("upload.pipeline", default_upload_pipeline())?
            .set_default("upload.bitrate_kbps", default_upload_bitrate())?
            .set_default("upload.retry_delay_seconds", default_upload_retry_delay())?
            .set_default("upload.check_interval_ms", default_upload_check_interval())?
            .set_default("preview.bind_ip", default_preview_ip())?
            .set_default("preview.command_port", default_command_port())?
            .set_default("preview.stream_port", default_stream_port())?
            .set_default("preview.send_timeout_ms", default_send_timeout_ms())?
            .set_default(
                "preview.queue_pop_timeout_ms",
                default_preview_pop_timeout_ms(),
            )?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.camera.source.as_str(), "test" | "gstreamer") {
            return Err(ConfigError::Message(format!(
                "Unknown camera source '{}', expected 'test' or 'gstreamer'",
                self.camera.source
            )));
        }

        let (dw, dh) = self.pipeline.downscaled_resolution;
        if dw == 0 || dh == 0 {
            return Err(ConfigError::Message(
                "Downscaled resolution must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("camera.capture_timeout_ms", self.camera.capture_timeout_ms),
            ("pipeline.pop_timeout_ms", self.pipeline.pop_timeout_ms),
            ("pipeline.join_timeout_ms", self.pipeline.join_timeout_ms),
            ("upload.check_interval_ms", self.upload.check_interval_ms),
            ("preview.send_timeout_ms", self.preview.send_timeout_ms),
            ("preview.queue_pop_timeout_ms", self.preview.queue_pop_timeout_ms),
        ] {
            check_range(name, value, 1, MAX_TIMEOUT_MS)?;
        }

        for (name, value) in [
            ("report.interval_seconds", self.report.interval_seconds),
            ("report.request_timeout_seconds", self.report.request_timeout_seconds),
            ("watchdog.poll_interval_seconds", self.watchdog.poll_interval_seconds),
            ("watchdog.stale_threshold_seconds", self.watchdog.stale_threshold_seconds),
        ] {
            check_range(name, value, 1, MAX_INTERVAL_SECONDS)?;
        }
        check_range(
            "upload.retry_delay_seconds",
            self.upload.retry_delay_seconds,
            0,
            MAX_INTERVAL_SECONDS,
        )?;

        if self.report.jpeg_quality == 0 || self.report.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.watchdog.stale_threshold_seconds <= self.watchdog.poll_interval_seconds {
            return Err(ConfigError::Message(
                "Watchdog stale threshold must be longer than its poll interval".to_string(),
            ));
        }

        if self.watchdog.exit_code == 0 {
            return Err(ConfigError::Message(
                "Watchdog exit code must be non-zero".to_string(),
            ));
        }

        if self.preview.command_port == self.preview.stream_port {
            return Err(ConfigError::Message(
                "Preview command and stream ports must differ".to_string(),
            ));
        }

        self.preview.command_addr()?;

        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::Message(format!(
                "Unknown log format '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

/// Upper bound for millisecond timeouts (one hour)
const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;
/// Upper bound for second-granularity intervals (one day)
const MAX_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Message(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

impl Default for OfficecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            pipeline: PipelineConfig::default(),
            report: ReportConfig::default(),
            watchdog: WatchdogConfig::default(),
            upload: UploadConfig::default(),
            preview: PreviewConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            pipeline: default_camera_pipeline(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            capture_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            downscaled_resolution: default_downscaled_resolution(),
            pop_timeout_ms: default_pop_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            core_url: None,
            interval_seconds: default_report_interval(),
            request_timeout_seconds: default_request_timeout(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_watchdog_poll(),
            stale_threshold_seconds: default_watchdog_threshold(),
            exit_code: default_watchdog_exit_code(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            sink: None,
            pipeline: default_upload_pipeline(),
            bitrate_kbps: default_upload_bitrate(),
            retry_delay_seconds: default_upload_retry_delay(),
            check_interval_ms: default_upload_check_interval(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_preview_ip(),
            command_port: default_command_port(),
            stream_port: default_stream_port(),
            send_timeout_ms: default_send_timeout_ms(),
            queue_pop_timeout_ms: default_preview_pop_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

// Default value functions
fn default_camera_source() -> String {
    "test".to_string()
}
fn default_camera_pipeline() -> String {
    "libcamerasrc".to_string()
}
fn default_camera_resolution() -> (u32, u32) {
    (4608, 2592)
}
fn default_camera_fps() -> u32 {
    10
}
fn default_capture_timeout_ms() -> u64 {
    2000
}

fn default_downscaled_resolution() -> (u32, u32) {
    (864, 480)
}
fn default_pop_timeout_ms() -> u64 {
    500
}
fn default_join_timeout_ms() -> u64 {
    5000
}

fn default_report_interval() -> u64 {
    15
}
fn default_request_timeout() -> u64 {
    10
}
fn default_jpeg_quality() -> u8 {
    85
}

fn default_watchdog_poll() -> u64 {
    5
}
fn default_watchdog_threshold() -> u64 {
    15
}
fn default_watchdog_exit_code() -> i32 {
    1
}

fn default_upload_pipeline() -> String {
    "libcamerasrc".to_string()
}
fn default_upload_bitrate() -> u32 {
    2000
}
fn default_upload_retry_delay() -> u64 {
    60
}
fn default_upload_check_interval() -> u64 {
    1000
}

fn default_preview_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_command_port() -> u16 {
    6900
}
fn default_stream_port() -> u16 {
    6901
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_preview_pop_timeout_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
