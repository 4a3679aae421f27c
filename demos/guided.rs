use globe_coords::{
    CalibrationPhase, CalibrationSettings, CalibrationState, CalibrationStrategy, Capabilities,
    GeoCoordinate, Projector, ProjectorSettings, QuaternionExt, ReferencePoint, Sample,
};
use nalgebra::{Quaternion, Vector3};

fn main() {
    let projector = Projector::new(&ProjectorSettings::default(), Capabilities::ORIENTATION).unwrap();
    let settings = CalibrationSettings {
        strategy: CalibrationStrategy::Guided,
        reference_points: vec![
            ReferencePoint::new("North Pole", GeoCoordinate::NORTH_POLE),
            ReferencePoint::new("Null Island", GeoCoordinate::NULL_ISLAND),
            ReferencePoint::new("Singapore", GeoCoordinate::new(1.35, 103.8)),
        ],
        ..Default::default()
    };
    let mut calibration = CalibrationState::new(settings, &projector);

    // The sensor sits crooked inside the globe; the fit has to undo this
    let mounting = Quaternion::from_axis_angle_degrees(&Vector3::new(1.0, 0.4, 0.0), 35.0);
    let pose_for = |location: &GeoCoordinate| {
        let pointing = mounting.rotate_vector(&location.to_unit_vector());
        Quaternion::from_two_vectors(&Vector3::x(), &pointing).unwrap()
    };

    while let Some(point) = calibration.current_point().cloned() {
        println!(
            "Point the globe at {} ({:.2}, {:.2})",
            point.name, point.location.latitude, point.location.longitude
        );
        let sample = Sample::from_orientation(pose_for(&point.location));
        let phase = calibration.calibrate(&projector.capture(&sample), None).unwrap();
        if phase == CalibrationPhase::Calibrated {
            println!("Calibrated (degraded: {})", calibration.is_degraded());
        }
    }

    for (name, city) in [
        ("Paris", GeoCoordinate::new(48.86, 2.35)),
        ("Sydney", GeoCoordinate::new(-33.87, 151.21)),
        ("Lima", GeoCoordinate::new(-12.05, -77.04)),
    ] {
        let sample = Sample::from_orientation(calibration.apply(&pose_for(&city)));
        if let Some(spot) = projector.project(&sample, calibration.frame()).coordinate() {
            println!("{name}: Lat: {:.2}, Lon: {:.2}", spot.latitude, spot.longitude);
        }
    }
}
