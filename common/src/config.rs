use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Highest capture or test-pattern rate accepted, in frames per second.
pub const MAX_FPS: f64 = 1000.0;
/// Upper bound for `thermal.upscale`.
pub const MAX_UPSCALE: usize = 32;
/// Upper bound for `thermal.pixel_scale`.
pub const MAX_PIXEL_SCALE: u32 = 32;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds a stream client may wait for a new frame before the stall
    /// policy applies. Absent means wait forever.
    #[serde(default)]
    pub stall_timeout_secs: Option<f64>,
    #[serde(default)]
    pub on_stall: StallPolicy,
}

/// What a stream session does when its producer stops publishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallPolicy {
    #[default]
    Close,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraMode {
    Mjpeg,
    TestPattern,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_mode")]
    pub mode: CameraMode,
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default = "default_camera_fps")]
    pub fps: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_camera_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Amg8833,
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermalConfig {
    #[serde(default = "default_sensor")]
    pub sensor: SensorKind,
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: String,
    #[serde(default = "default_address")]
    pub address: u16,
    #[serde(default = "default_thermal_fps")]
    pub fps: f64,
    #[serde(default = "default_min_temp")]
    pub min_temp: f32,
    #[serde(default = "default_max_temp")]
    pub max_temp: f32,
    #[serde(default = "default_upscale")]
    pub upscale: usize,
    #[serde(default = "default_pixel_scale")]
    pub pixel_scale: u32,
    #[serde(default = "default_colorbar")]
    pub colorbar: bool,
    #[serde(default = "default_thermal_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            stall_timeout_secs: None,
            on_stall: StallPolicy::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: default_camera_mode(),
            url: default_camera_url(),
            fps: default_camera_fps(),
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_camera_quality(),
        }
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            sensor: default_sensor(),
            i2c_bus: default_i2c_bus(),
            address: default_address(),
            fps: default_thermal_fps(),
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            upscale: default_upscale(),
            pixel_scale: default_pixel_scale(),
            colorbar: default_colorbar(),
            jpeg_quality: default_thermal_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Zero, negative and unrepresentable values all mean no timeout;
    /// `Config::validate` rejects the unrepresentable ones up front.
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl CameraConfig {
    /// Time between test-pattern frames.
    pub fn interval(&self) -> Duration {
        fps_interval(self.fps)
    }
}

impl ThermalConfig {
    /// Target time between capture cycles.
    pub fn interval(&self) -> Duration {
        fps_interval(self.fps)
    }
}

/// Frame period for a rate that passed `check_fps`. Anything else falls back
/// to one second.
fn fps_interval(fps: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::from_secs(1))
}

fn check_fps(name: &str, fps: f64) -> Result<(), ConfigError> {
    let period_ok = Duration::try_from_secs_f64(1.0 / fps).is_ok();
    if fps > 0.0 && fps <= MAX_FPS && period_ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in (0, {MAX_FPS}] with a representable frame period, got {fps}"
        )))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        if config.server.stall_timeout().is_none() && config.server.on_stall == StallPolicy::Wait {
            warn!("server.on_stall = \"wait\" has no effect without server.stall_timeout_secs");
        }
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thermal;
        check_fps("thermal.fps", t.fps)?;
        if let Some(secs) = self.server.stall_timeout_secs {
            if secs > 0.0 && Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "server.stall_timeout_secs is out of range: {secs}"
                )));
            }
        }
        if t.min_temp >= t.max_temp {
            return Err(ConfigError::Invalid(format!(
                "thermal.min_temp ({}) must be below thermal.max_temp ({})",
                t.min_temp, t.max_temp
            )));
        }
        if !(1..=MAX_UPSCALE).contains(&t.upscale) {
            return Err(ConfigError::Invalid(format!(
                "thermal.upscale must be in 1..={MAX_UPSCALE}, got {}",
                t.upscale
            )));
        }
        if !(1..=MAX_PIXEL_SCALE).contains(&t.pixel_scale) {
            return Err(ConfigError::Invalid(format!(
                "thermal.pixel_scale must be in 1..={MAX_PIXEL_SCALE}, got {}",
                t.pixel_scale
            )));
        }
        if self.camera.mode == CameraMode::TestPattern {
            check_fps("camera.fps", self.camera.fps)?;
        }
        for (name, quality) in [
            ("camera.jpeg_quality", self.camera.jpeg_quality),
            ("thermal.jpeg_quality", t.jpeg_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Invalid(format!("{name} must be in 1..=100, got {quality}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_camera_mode() -> CameraMode {
    CameraMode::Mjpeg
}
fn default_camera_url() -> String {
    "http://127.0.0.1:8080/stream".into()
}
fn default_camera_fps() -> f64 {
    15.0
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_camera_quality() -> u8 {
    80
}
fn default_sensor() -> SensorKind {
    SensorKind::Amg8833
}
fn default_i2c_bus() -> String {
    "/dev/i2c-1".into()
}
fn default_address() -> u16 {
    0x69
}
fn default_thermal_fps() -> f64 {
    10.0
}
fn default_min_temp() -> f32 {
    18.0
}
fn default_max_temp() -> f32 {
    37.0
}
fn default_upscale() -> usize {
    6
}
fn default_pixel_scale() -> u32 {
    10
}
fn default_colorbar() -> bool {
    true
}
fn default_thermal_quality() -> u8 {
    85
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.camera.mode, CameraMode::Mjpeg);
        assert_eq!(config.thermal.sensor, SensorKind::Amg8833);
        assert_eq!(config.thermal.address, 0x69);
        assert_eq!(config.thermal.min_temp, 18.0);
        assert_eq!(config.thermal.max_temp, 37.0);
        assert!(config.server.stall_timeout().is_none(), "default is to wait forever");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000
            stall_timeout_secs = 2.5
            on_stall = "wait"

            [camera]
            mode = "test-pattern"

            [thermal]
            sensor = "simulated"
            fps = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.stall_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.server.on_stall, StallPolicy::Wait);
        assert_eq!(config.camera.mode, CameraMode::TestPattern);
        assert_eq!(config.thermal.sensor, SensorKind::Simulated);
        assert_eq!(config.thermal.interval(), Duration::from_millis(200));
    }

    #[test]
    fn zero_timeout_means_disabled() {
        let config: Config = toml::from_str("[server]\nstall_timeout_secs = 0.0").unwrap();
        assert!(config.server.stall_timeout().is_none());
    }

    #[test]
    fn rejects_inverted_clamp_bounds() {
        let config: Config =
            toml::from_str("[thermal]\nmin_temp = 40.0\nmax_temp = 20.0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_fps() {
        let config: Config = toml::from_str("[thermal]\nfps = 0.0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        let result: Result<Config, _> = toml::from_str("[camera]\nmode = \"h264\"");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_stall_timeout_beyond_duration_range() {
        let config: Config = toml::from_str("[server]\nstall_timeout_secs = 1e20").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(config.server.stall_timeout().is_none(), "must not panic");

        let config: Config = toml::from_str("[server]\nstall_timeout_secs = inf").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fps_with_unrepresentable_period() {
        let config: Config = toml::from_str("[thermal]\nfps = 1e-300").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.thermal.interval(), Duration::from_secs(1), "must not panic");

        let config: Config = toml::from_str("[thermal]\nfps = 1e9").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[thermal]\nfps = nan").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_test_pattern_fps() {
        let config: Config =
            toml::from_str("[camera]\nmode = \"test-pattern\"\nfps = 1e-300").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.camera.interval(), Duration::from_secs(1));

        let config: Config =
            toml::from_str("[camera]\nmode = \"test-pattern\"\nfps = 30.0").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn caps_raster_scaling() {
        let config: Config = toml::from_str("[thermal]\nupscale = 10000").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config: Config = toml::from_str("[thermal]\npixel_scale = 100000").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str(&format!(
            "[thermal]\nupscale = {MAX_UPSCALE}\npixel_scale = {MAX_PIXEL_SCALE}"
        ))
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = std::env::temp_dir().join(format!("thermocam-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.toml");
        std::fs::write(&good, "[server]\non_stall = \"wait\"\n").unwrap();
        let config = Config::load(&good).unwrap();
        assert_eq!(config.server.on_stall, StallPolicy::Wait);

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "[thermal]\nfps = 1e-300\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            Config::load(&dir.join("missing.toml")),
            Err(ConfigError::ReadFile(..))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
