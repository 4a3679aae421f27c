//! CSV replay sensor
//!
//! Each row is one sample: `x,y,z,w` for the orientation quaternion,
//! optionally followed by `gx,gy,gz` gravity and `mx,my,mz` magnetic field.
//! Lines starting with `#` are comments. An all-zero quaternion row replays
//! as "no data".

use std::fs::File;
use std::io::Read;
use std::path::Path;

use nalgebra::{Quaternion, Vector3};
use thiserror::Error;
use tracing::{debug, info};

use crate::math::QuaternionExt;
use crate::sensor::{Capabilities, OrientationSensor, SensorError, VectorKind};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed replay data: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {row} has {fields} fields; expected 4, 7 or 10")]
    FieldCount { row: usize, fields: usize },
    #[error("Replay file contains no samples")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReplayRow {
    orientation: Quaternion<f64>,
    gravity: Option<Vector3<f64>>,
    magnetic: Option<Vector3<f64>>,
}

impl ReplayRow {
    fn from_values(row: usize, values: &[f64]) -> Result<Self, ReplayError> {
        let vector = |i: usize| Vector3::new(values[i], values[i + 1], values[i + 2]);
        let orientation = match values {
            [x, y, z, w, ..] => Quaternion::from_xyzw(*x, *y, *z, *w),
            _ => {
                return Err(ReplayError::FieldCount {
                    row,
                    fields: values.len(),
                })
            }
        };
        let (gravity, magnetic) = match values.len() {
            4 => (None, None),
            7 => (Some(vector(4)), None),
            10 => (Some(vector(4)), Some(vector(7))),
            fields => return Err(ReplayError::FieldCount { row, fields }),
        };
        Ok(Self {
            orientation,
            gravity,
            magnetic,
        })
    }
}

/// Plays back recorded samples, one row per sample
#[derive(Debug, Clone)]
pub struct ReplaySensor {
    rows: Vec<ReplayRow>,
    capabilities: Capabilities,
    cursor: usize,
    served: Capabilities,
    looping: bool,
    exhausted: bool,
}

impl ReplaySensor {
    pub fn from_path(path: &Path) -> Result<Self, ReplayError> {
        let sensor = Self::from_reader(File::open(path)?)?;
        info!(?path, rows = sensor.len(), capabilities = ?sensor.capabilities, "Loaded replay file");
        Ok(sensor)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReplayError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (i, record) in csv.records().enumerate() {
            let values: Vec<f64> = record?.deserialize(None)?;
            rows.push(ReplayRow::from_values(i + 1, &values)?);
        }
        if rows.is_empty() {
            return Err(ReplayError::Empty);
        }

        let mut capabilities = Capabilities::ORIENTATION;
        if rows.iter().all(|r| r.gravity.is_some()) {
            capabilities |= Capabilities::GRAVITY;
        }
        if rows.iter().all(|r| r.magnetic.is_some()) {
            capabilities |= Capabilities::MAGNETIC;
        }

        Ok(Self {
            rows,
            capabilities,
            cursor: 0,
            served: Capabilities::empty(),
            looping: true,
            exhausted: false,
        })
    }

    /// Stop at the last row instead of starting over
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn row(&mut self, capability: Capabilities) -> Option<ReplayRow> {
        if self.served.contains(capability) {
            self.served = Capabilities::empty();
            self.cursor += 1;
            if self.cursor >= self.rows.len() {
                if self.looping {
                    debug!("Replay wrapped around");
                    self.cursor = 0;
                } else {
                    self.exhausted = true;
                }
            }
        }
        if self.exhausted {
            return None;
        }
        self.served |= capability;
        self.rows.get(self.cursor).copied()
    }
}

impl OrientationSensor for ReplaySensor {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn read_orientation(&mut self) -> Result<Option<Quaternion<f64>>, SensorError> {
        Ok(self.row(Capabilities::ORIENTATION).map(|r| r.orientation))
    }

    fn read_vector(&mut self, kind: VectorKind) -> Result<Option<Vector3<f64>>, SensorError> {
        if !self.capabilities.contains(kind.capability()) {
            return Ok(None);
        }
        let row = self.row(kind.capability());
        Ok(match kind {
            VectorKind::Gravity => row.and_then(|r| r.gravity),
            VectorKind::MagneticField => row.and_then(|r| r.magnetic),
        })
    }

    fn reinitialize(&mut self) -> Result<(), SensorError> {
        self.served = Capabilities::empty();
        Ok(())
    }
}
