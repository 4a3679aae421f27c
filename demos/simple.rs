use globe_coords::{
    CalibrationSettings, CalibrationState, OrientationSensor, Projector, ProjectorSettings,
    SimulatedGlobe,
};
use globe_coords::sensor::read_sample;

fn main() {
    // A globe spinning 12° per sample with its axis tilted 23.5°
    let mut globe = SimulatedGlobe::new(12.0, 23.5);
    let projector = Projector::new(&ProjectorSettings::default(), globe.capabilities()).unwrap();
    let mut calibration = CalibrationState::new(CalibrationSettings::default(), &projector);

    for i in 0..10 {
        // this loop should repeat each time new sensor data is available
        let Some(sample) = read_sample(&mut globe, projector.required_capabilities()).unwrap() else {
            continue;
        };

        if i == 3 {
            // zero on whatever the globe points at right now
            calibration.calibrate(&projector.capture(&sample), None).unwrap();
            println!("Calibrated");
        }

        let mut corrected = sample;
        corrected.orientation = sample.orientation.map(|q| calibration.apply(&q));

        match projector.project(&corrected, calibration.frame()).coordinate() {
            Some(spot) => {
                let spot = calibration.apply_offsets(spot);
                println!("Lat: {:.2}, Lon: {:.2}", spot.latitude, spot.longitude);
            }
            None => println!("No direction yet"),
        }
    }
}
