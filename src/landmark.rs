//! Named places the operator can point the globe at

use std::fmt;

use crate::types::GeoCoordinate;

/// A recognizable spot on the globe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    NorthPole,
    SouthPole,
    NullIsland,
    Equator,
}

impl Landmark {
    /// The landmark within `tolerance` degrees of `coordinate`, if any
    ///
    /// Poles win over everything else, and Null Island wins over the
    /// equator it sits on.
    ///
    /// # Example
    /// ```
    /// use globe_coords::{GeoCoordinate, Landmark};
    ///
    /// assert_eq!(Landmark::classify(&GeoCoordinate::new(89.5, 12.0), 1.0), Some(Landmark::NorthPole));
    /// assert_eq!(Landmark::classify(&GeoCoordinate::new(0.2, -0.4), 1.0), Some(Landmark::NullIsland));
    /// assert_eq!(Landmark::classify(&GeoCoordinate::new(0.2, 120.0), 1.0), Some(Landmark::Equator));
    /// assert_eq!(Landmark::classify(&GeoCoordinate::new(45.0, 7.0), 1.0), None);
    /// ```
    pub fn classify(coordinate: &GeoCoordinate, tolerance: f64) -> Option<Self> {
        let GeoCoordinate {
            latitude,
            longitude,
        } = *coordinate;

        if latitude >= 90.0 - tolerance {
            Some(Landmark::NorthPole)
        } else if latitude <= -90.0 + tolerance {
            Some(Landmark::SouthPole)
        } else if latitude.abs() < tolerance && longitude.abs() < tolerance {
            Some(Landmark::NullIsland)
        } else if latitude.abs() < tolerance {
            Some(Landmark::Equator)
        } else {
            None
        }
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Landmark::NorthPole => "North Pole",
            Landmark::SouthPole => "South Pole",
            Landmark::NullIsland => "Null Island",
            Landmark::Equator => "Equator",
        };
        f.write_str(name)
    }
}
