//! TOML configuration and startup validation

use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::axes::AxisRemap;
use crate::projector::Projector;
use crate::sensor::Capabilities;
use crate::types::{
    CalibrationSettings, CalibrationStrategy, DriverSettings, ProjectionMode, ProjectorSettings,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Projection mode {mode:?} needs {missing:?}, which the sensor does not provide")]
    MissingCapability {
        mode: ProjectionMode,
        missing: Capabilities,
    },
    #[error("Invalid axis remap: {0}")]
    InvalidAxisRemap(String),
    #[error("Invalid axis: {0}")]
    InvalidAxis(&'static str),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

/// How the sensor is mounted inside the globe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub forward_axis: Vector3<f64>,
    pub up_axis: Vector3<f64>,
    /// Signed axis permutation such as `"+z-x-y"`
    pub axis_remap: AxisRemap,
    pub hard_iron_offset: Vector3<f64>,
    pub soft_iron_matrix: Matrix3<f64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let projector = ProjectorSettings::default();
        Self {
            forward_axis: projector.forward_axis,
            up_axis: projector.up_axis,
            axis_remap: projector.remap,
            hard_iron_offset: projector.hard_iron_offset,
            soft_iron_matrix: projector.soft_iron_matrix,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub mode: ProjectionMode,
    pub pole_threshold: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            mode: ProjectionMode::default(),
            pole_threshold: ProjectorSettings::default().pole_threshold,
        }
    }
}

/// Built-in simulated globe, used when no replay file is given
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Spin about the polar axis, in degrees per second
    pub spin_rate_deg_per_s: f64,
    /// Axial tilt of the pointing direction above the equator, in degrees
    pub tilt_deg: f64,
    /// Number of all-zero readings before the sensor reports data
    pub warmup_samples: u32,
    /// Inject a transient fault on every Nth read
    pub fault_every: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spin_rate_deg_per_s: 12.0,
            tilt_deg: 0.0,
            warmup_samples: 5,
            fault_every: None,
        }
    }
}

/// How coordinates reach the relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Newline-delimited JSON over a plain TCP connection (`host:port`)
    #[default]
    Tcp,
    /// One JSON text frame per coordinate over a persistent WebSocket (`ws://...`)
    #[serde(rename = "websocket")]
    WebSocket,
    /// One JSON POST per coordinate (`http://...`)
    Http,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Relay address or URL; `None` logs coordinates instead
    pub address: Option<String>,
    /// Address to accept line-based calibration commands on
    pub control_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobeConfig {
    pub sensor: SensorConfig,
    pub projection: ProjectionConfig,
    pub simulation: SimulationConfig,
    pub calibration: CalibrationSettings,
    pub driver: DriverSettings,
    pub transport: TransportConfig,
}

impl GlobeConfig {
    pub fn projector_settings(&self) -> ProjectorSettings {
        ProjectorSettings {
            mode: self.projection.mode,
            forward_axis: self.sensor.forward_axis,
            up_axis: self.sensor.up_axis,
            remap: self.sensor.axis_remap,
            pole_threshold: self.projection.pole_threshold,
            hard_iron_offset: self.sensor.hard_iron_offset,
            soft_iron_matrix: self.sensor.soft_iron_matrix,
        }
    }

    /// Checks the configuration against a sensor and builds its projector
    ///
    /// # Example
    /// ```
    /// use globe_coords::{Capabilities, GlobeConfig, ProjectionMode};
    ///
    /// let mut config = GlobeConfig::default();
    /// config.projection.mode = ProjectionMode::GravityAnchored;
    /// assert!(config.validate(Capabilities::ORIENTATION).is_err());
    /// ```
    pub fn validate(&self, available: Capabilities) -> Result<Projector, ConfigError> {
        let driver = &self.driver;
        if !(driver.smoothing_factor > 0.0 && driver.smoothing_factor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "driver.smoothing_factor",
                value: driver.smoothing_factor,
            });
        }
        if driver.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("driver.send_timeout_ms must be positive".into()));
        }
        if driver.emit_interval_ms == 0 {
            return Err(ConfigError::Invalid("driver.emit_interval_ms must be positive".into()));
        }
        if !(driver.landmark_tolerance_deg >= 0.0 && driver.landmark_tolerance_deg < 45.0) {
            return Err(ConfigError::OutOfRange {
                field: "driver.landmark_tolerance_deg",
                value: driver.landmark_tolerance_deg,
            });
        }

        let calibration = &self.calibration;
        if calibration.strategy == CalibrationStrategy::Guided {
            if calibration.reference_points.is_empty() {
                return Err(ConfigError::Invalid(
                    "guided calibration needs at least one reference point".into(),
                ));
            }
            // The heading sets longitude directly, so a fitted frame only reaches latitude
            if self.projection.mode == ProjectionMode::MagneticHeading {
                return Err(ConfigError::Invalid(
                    "guided calibration cannot correct magnetic-heading longitude; \
                     use zero_point, target_mapping or longitude_zero"
                        .into(),
                ));
            }
            if calibration.step_timeout_ms == 0 {
                return Err(ConfigError::Invalid(
                    "calibration.step_timeout_ms must be positive".into(),
                ));
            }
        }
        for point in &calibration.reference_points {
            check_latitude("calibration.reference_points.location", point.location.latitude)?;
        }
        check_latitude("calibration.target", calibration.target.latitude)?;

        if let Some(address) = &self.transport.address {
            let scheme_ok = match self.transport.kind {
                TransportKind::Tcp => !address.contains("://"),
                // No TLS backend is built in, so only plain schemes connect
                TransportKind::WebSocket => address.starts_with("ws://"),
                TransportKind::Http => address.starts_with("http://"),
            };
            if !scheme_ok {
                return Err(ConfigError::Invalid(format!(
                    "transport.address {address:?} does not match transport kind {:?}",
                    self.transport.kind
                )));
            }
        }

        Projector::new(&self.projector_settings(), available)
    }
}

fn check_latitude(field: &'static str, latitude: f64) -> Result<(), ConfigError> {
    if (-90.0..=90.0).contains(&latitude) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: latitude,
        })
    }
}

/// Loads the config file at `path`, or defaults if it does not exist
pub fn load_config(path: &Path) -> Result<GlobeConfig, ConfigError> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        let config: GlobeConfig = toml::from_str(&contents)?;
        info!(?path, "Loaded config");
        Ok(config)
    } else {
        info!(?path, "No config found, using defaults");
        Ok(GlobeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoCoordinate;

    #[test]
    fn test_parse_partial_config() {
        let config: GlobeConfig = toml::from_str(
            r#"
            [sensor]
            axis_remap = "+z-x-y"
            forward_axis = [0.0, 0.0, 1.0]

            [projection]
            mode = "dual_vector"

            [calibration]
            strategy = "guided"
            step_timeout_ms = 5000

            [[calibration.reference_points]]
            name = "North Pole"
            location = { lat = 90.0, lon = 0.0 }

            [[calibration.reference_points]]
            name = "Null Island"
            location = { lat = 0.0, lon = 0.0 }

            [driver]
            emit_interval_ms = 50

            [transport]
            address = "127.0.0.1:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.sensor.axis_remap.to_string(), "+z-x-y");
        assert_eq!(config.sensor.forward_axis, Vector3::z());
        assert_eq!(config.sensor.up_axis, Vector3::z());
        assert_eq!(config.projection.mode, ProjectionMode::DualVector);
        assert_eq!(config.calibration.strategy, CalibrationStrategy::Guided);
        assert_eq!(config.calibration.reference_points[0].location, GeoCoordinate::NORTH_POLE);
        assert_eq!(config.driver.emit_interval_ms, 50);
        assert_eq!(config.driver.send_timeout_ms, 500);
        assert_eq!(config.transport.address.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn test_bad_remap_is_a_parse_error() {
        let result: Result<GlobeConfig, _> = toml::from_str("[sensor]\naxis_remap = \"+x+x+y\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_validates_against_orientation_sensor() {
        let projector = GlobeConfig::default().validate(Capabilities::ORIENTATION).unwrap();
        assert_eq!(projector.mode(), ProjectionMode::SingleVector);
    }

    #[test]
    fn test_dual_vector_with_default_axes_validates() {
        let mut config = GlobeConfig::default();
        config.projection.mode = ProjectionMode::DualVector;
        assert!(config.validate(Capabilities::ORIENTATION).is_ok());

        config.sensor.up_axis = config.sensor.forward_axis;
        assert!(matches!(
            config.validate(Capabilities::ORIENTATION),
            Err(ConfigError::InvalidAxis(_))
        ));
    }

    #[test]
    fn test_missing_capability() {
        let mut config = GlobeConfig::default();
        config.projection.mode = ProjectionMode::MagneticHeading;
        let err = config.validate(Capabilities::ORIENTATION | Capabilities::GRAVITY).unwrap_err();
        match err {
            ConfigError::MissingCapability { missing, .. } => {
                assert_eq!(missing, Capabilities::MAGNETIC)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_bad_driver_settings() {
        let mut config = GlobeConfig::default();
        config.driver.smoothing_factor = 0.0;
        assert!(config.validate(Capabilities::all()).is_err());

        let mut config = GlobeConfig::default();
        config.driver.send_timeout_ms = 0;
        assert!(config.validate(Capabilities::all()).is_err());
    }

    #[test]
    fn test_guided_needs_reference_points() {
        let mut config = GlobeConfig::default();
        config.calibration.strategy = CalibrationStrategy::Guided;
        config.calibration.reference_points.clear();
        assert!(matches!(
            config.validate(Capabilities::all()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_guided_rejected_for_magnetic_heading() {
        let mut config = GlobeConfig::default();
        config.projection.mode = ProjectionMode::MagneticHeading;
        config.calibration.strategy = CalibrationStrategy::Guided;
        assert!(matches!(
            config.validate(Capabilities::all()),
            Err(ConfigError::Invalid(_))
        ));

        config.calibration.strategy = CalibrationStrategy::LongitudeZero;
        assert!(config.validate(Capabilities::all()).is_ok());
    }

    #[test]
    fn test_landmark_tolerance_range() {
        let mut config = GlobeConfig::default();
        config.driver.landmark_tolerance_deg = -1.0;
        assert!(matches!(
            config.validate(Capabilities::all()),
            Err(ConfigError::OutOfRange { field: "driver.landmark_tolerance_deg", .. })
        ));
        config.driver.landmark_tolerance_deg = 0.0;
        assert!(config.validate(Capabilities::all()).is_ok());
    }

    #[test]
    fn test_transport_kind_matches_address() {
        let config: GlobeConfig = toml::from_str(
            r#"
            [calibration]
            strategy = "longitude_zero"

            [transport]
            kind = "websocket"
            address = "ws://relay.local:8765/globe"
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.kind, TransportKind::WebSocket);
        assert_eq!(config.calibration.strategy, CalibrationStrategy::LongitudeZero);
        assert!(config.validate(Capabilities::all()).is_ok());

        let mut config = config;
        config.transport.kind = TransportKind::Http;
        assert!(config.validate(Capabilities::all()).is_err());
        config.transport.address = Some("https://relay.local/coords".into());
        assert!(config.validate(Capabilities::all()).is_err());
        config.transport.address = Some("http://relay.local/coords".into());
        assert!(config.validate(Capabilities::all()).is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Path::new("/nonexistent/globe-coords.toml")).unwrap();
        assert_eq!(config, GlobeConfig::default());
    }
}
