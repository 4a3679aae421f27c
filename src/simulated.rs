//! Simulated globe sensor for running without hardware

use nalgebra::{Quaternion, Vector3};
use tracing::{debug, warn};

use crate::config::SimulationConfig;
use crate::math::QuaternionExt;
use crate::sensor::{Capabilities, OrientationSensor, SensorError, VectorKind};

const STANDARD_GRAVITY: f64 = 9.81;

/// Earth-like field in the globe frame: pointing north along +X, dipping down
const WORLD_MAGNETIC_FIELD: Vector3<f64> = Vector3::new(0.2, 0.0, -0.45);

/// A sensor strapped to a globe spinning about its polar (+Z) axis
///
/// The pose advances by a fixed angle per sample. A sample ends when a
/// reading that was already served for the current pose is requested again,
/// so orientation, gravity and field readings taken together agree.
#[derive(Debug, Clone)]
pub struct SimulatedGlobe {
    step_degrees: f64,
    tilt_degrees: f64,
    warmup_samples: u32,
    fault_every: Option<u64>,
    capabilities: Capabilities,
    samples: u64,
    served: Capabilities,
    faulted: bool,
    reinitializations: u32,
}

impl SimulatedGlobe {
    /// Globe turning `step_degrees` per sample with the pointer `tilt_degrees`
    /// above the equator
    pub fn new(step_degrees: f64, tilt_degrees: f64) -> Self {
        Self {
            step_degrees,
            tilt_degrees,
            warmup_samples: 0,
            fault_every: None,
            capabilities: Capabilities::all(),
            samples: 0,
            served: Capabilities::empty(),
            faulted: false,
            reinitializations: 0,
        }
    }

    /// Builds a globe from config, given the time between samples
    pub fn from_config(config: &SimulationConfig, sample_period_secs: f64) -> Self {
        Self::new(config.spin_rate_deg_per_s * sample_period_secs, config.tilt_deg)
            .with_warmup(config.warmup_samples)
            .with_fault_every(config.fault_every)
    }

    /// Report the zero quaternion for the first `samples` samples
    pub fn with_warmup(mut self, samples: u32) -> Self {
        self.warmup_samples = samples;
        self
    }

    /// Fail every `n`th sample with a transient error
    pub fn with_fault_every(mut self, n: Option<u64>) -> Self {
        self.fault_every = n.filter(|n| *n > 0);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn reinitializations(&self) -> u32 {
        self.reinitializations
    }

    /// Orientation for the current sample
    pub fn pose(&self) -> Quaternion<f64> {
        let spin = Quaternion::from_axis_angle_degrees(&Vector3::z(), self.samples as f64 * self.step_degrees);
        let tilt = Quaternion::from_axis_angle_degrees(&Vector3::y(), -self.tilt_degrees);
        spin * tilt
    }

    fn warming_up(&self) -> bool {
        self.samples < self.warmup_samples as u64
    }

    /// Moves to the next sample when `capability` was already read for this one
    fn begin_read(&mut self, capability: Capabilities) -> Result<(), SensorError> {
        if self.served.contains(capability) {
            self.samples += 1;
            self.served = Capabilities::empty();
            self.faulted = false;
        }
        if self.served.is_empty() {
            if let Some(n) = self.fault_every {
                if (self.samples + 1) % n == 0 && !self.faulted {
                    // Retrying this sample succeeds
                    self.faulted = true;
                    self.served = capability;
                    return Err(SensorError::Transient(format!(
                        "simulated bus fault on sample {}",
                        self.samples
                    )));
                }
            }
        }
        self.served |= capability;
        Ok(())
    }

    /// Rotates a globe-frame vector into the sensor frame
    fn to_sensor_frame(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.pose().unit_inverse().rotate_vector(world)
    }
}

impl OrientationSensor for SimulatedGlobe {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn read_orientation(&mut self) -> Result<Option<Quaternion<f64>>, SensorError> {
        if !self.capabilities.contains(Capabilities::ORIENTATION) {
            return Ok(None);
        }
        self.begin_read(Capabilities::ORIENTATION)?;
        if self.warming_up() {
            return Ok(Some(Quaternion::from_xyzw(0.0, 0.0, 0.0, 0.0)));
        }
        Ok(Some(self.pose()))
    }

    fn read_vector(&mut self, kind: VectorKind) -> Result<Option<Vector3<f64>>, SensorError> {
        if !self.capabilities.contains(kind.capability()) {
            return Ok(None);
        }
        self.begin_read(kind.capability())?;
        if self.warming_up() {
            return Ok(None);
        }
        let reading = match kind {
            VectorKind::Gravity => {
                self.to_sensor_frame(&Vector3::new(0.0, 0.0, -STANDARD_GRAVITY))
            }
            VectorKind::MagneticField => self.to_sensor_frame(&WORLD_MAGNETIC_FIELD),
        };
        Ok(Some(reading))
    }

    fn reinitialize(&mut self) -> Result<(), SensorError> {
        self.reinitializations += 1;
        warn!(attempt = self.reinitializations, "Reinitializing simulated sensor");
        self.served = Capabilities::empty();
        Ok(())
    }

    fn release(&mut self) {
        debug!(samples = self.samples, "Simulated sensor released");
    }
}
