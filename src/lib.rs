//! globe-coords - Orientation-to-geocoordinate streaming for a sensor on a rotating globe
//!
//! A 9-DoF orientation sensor strapped to a motorized globe reports
//! quaternions. This crate turns those quaternions into the latitude and
//! longitude the globe is currently pointing at. It also lets an operator
//! calibrate the mounting interactively and streams the coordinates to a
//! relay as newline-delimited JSON.
//!
//! # Features
//!
//! - Quaternion algebra as extension traits on nalgebra types
//! - Four projection modes: single-vector, dual-vector (up + forward),
//!   gravity-anchored and magnetic-heading
//! - Zero-point, target-mapping and N-point guided calibration
//! - Signed axis remapping for rotated sensor mountings
//! - Near-pole longitude ambiguity detection and landmark events
//! - An async stream driver with send timeouts, sensor reinitialization on
//!   transient failures and clean shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::{Quaternion, Vector3};
//! use globe_coords::{
//!     Capabilities, CalibrationSettings, CalibrationState, Projector, ProjectorSettings, Sample,
//!     QuaternionExt,
//! };
//!
//! let projector = Projector::new(&ProjectorSettings::default(), Capabilities::ORIENTATION).unwrap();
//! let calibration = CalibrationState::new(CalibrationSettings::default(), &projector);
//!
//! // Raw sensor orientation: turned 90° about the polar axis
//! let raw = Quaternion::from_axis_angle_degrees(&Vector3::z(), 90.0);
//!
//! let sample = Sample::from_orientation(calibration.apply(&raw));
//! let projection = projector.project(&sample, calibration.frame());
//!
//! let spot = projection.coordinate().unwrap();
//! assert!(spot.latitude.abs() < 1e-9);
//! assert!((spot.longitude - 90.0).abs() < 1e-9);
//! ```

pub mod axes;
pub mod calibration;
pub mod compass;
pub mod config;
pub mod control;
pub mod driver;
pub mod landmark;
pub mod math;
pub mod projector;
pub mod replay;
pub mod sensor;
pub mod simulated;
pub mod smoothing;
pub mod transport;
mod types;

// Re-export all public types and functions
pub use axes::{AxisRemap, SignedAxis};
pub use calibration::{CalibrationError, CalibrationPhase, CalibrationState};
pub use config::{ConfigError, GlobeConfig, TransportKind, load_config};
pub use control::{CalibrationCommand, CommandSource, NoCommands};
pub use driver::{CoordinateDriver, DriverStats, IterationOutcome};
pub use landmark::Landmark;
pub use math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, Vector3Ext, wrap_longitude};
pub use projector::{Capture, GeoFrame, Projector};
pub use replay::ReplaySensor;
pub use sensor::{Capabilities, OrientationSensor, Sample, SensorError, VectorKind};
pub use simulated::SimulatedGlobe;
pub use smoothing::OrientationSmoother;
pub use transport::{
    ChannelSink, CoordinateMessage, CoordinateSink, HttpPostSink, LogSink, TcpJsonSink, TransportError,
    WebSocketSink,
};
pub use types::*;
