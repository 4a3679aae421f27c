//! Coordinate stream driver
//!
//! The driver owns the sensor, the sink, the command source and the
//! [`CalibrationState`]. Each iteration handles at most one command, reads a
//! sample, corrects and projects it, and sends the result with a timeout.
//! Failures are classified per stage and never end the loop; only the
//! shutdown signal does.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::calibration::{CalibrationPhase, CalibrationState};
use crate::control::{CalibrationCommand, CommandSource};
use crate::landmark::Landmark;
use crate::projector::Projector;
use crate::sensor::{OrientationSensor, Sample, SensorError, read_sample};
use crate::smoothing::OrientationSmoother;
use crate::transport::{CoordinateMessage, CoordinateSink};
use crate::types::{DriverSettings, GeoCoordinate, Projection};

/// Running totals, returned when the driver stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub iterations: u64,
    pub emitted: u64,
    /// Samples lost to a send timeout or transport error
    pub dropped: u64,
    pub no_data: u64,
    pub transient_failures: u64,
    pub reinitializations: u64,
    pub calibrations: u64,
    pub rejected_captures: u64,
    pub skipped_points: u64,
    pub errors: u64,
}

/// What a single iteration did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationOutcome {
    Emitted(CoordinateMessage),
    /// A coordinate was produced but the sink did not take it
    Dropped,
    NoData,
    /// A command was handled; nothing was emitted
    CommandHandled,
    /// A guided calibration is waiting for the operator
    AwaitingCalibration,
    /// A transient sensor failure was recovered by reinitializing
    Recovered,
    Failed,
}

impl IterationOutcome {
    /// Pause before the next iteration
    pub fn delay(&self, settings: &DriverSettings) -> Duration {
        match self {
            IterationOutcome::Emitted(_)
            | IterationOutcome::Dropped
            | IterationOutcome::AwaitingCalibration => settings.emit_interval(),
            IterationOutcome::NoData
            | IterationOutcome::CommandHandled
            | IterationOutcome::Recovered => settings.retry_interval(),
            IterationOutcome::Failed => settings.error_backoff(),
        }
    }
}

pub struct CoordinateDriver<S, K, C> {
    sensor: S,
    sink: K,
    commands: C,
    projector: Projector,
    calibration: CalibrationState,
    smoother: OrientationSmoother,
    settings: DriverSettings,
    step_timeout: Duration,
    step_deadline: Option<Instant>,
    last_longitude: Option<f64>,
    landmark: Option<Landmark>,
    stats: DriverStats,
}

impl<S, K, C> CoordinateDriver<S, K, C>
where
    S: OrientationSensor,
    K: CoordinateSink,
    C: CommandSource,
{
    pub fn new(
        sensor: S,
        sink: K,
        commands: C,
        projector: Projector,
        calibration: CalibrationState,
        settings: DriverSettings,
        step_timeout: Duration,
    ) -> Self {
        Self {
            sensor,
            sink,
            commands,
            projector,
            calibration,
            smoother: OrientationSmoother::new(settings.smoothing_factor, settings.smoothing_enabled),
            settings,
            step_timeout,
            step_deadline: None,
            last_longitude: None,
            landmark: None,
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn smoothing_enabled(&self) -> bool {
        self.smoother.is_enabled()
    }

    /// The landmark the last emitted coordinate was over
    pub fn landmark(&self) -> Option<Landmark> {
        self.landmark
    }

    /// Runs iterations until `shutdown` turns true or its sender is dropped
    ///
    /// The sensor is released and the sink closed before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> DriverStats {
        info!(
            mode = ?self.projector.mode(),
            strategy = ?self.calibration.strategy(),
            "Coordinate stream started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.step().await;
            let delay = outcome.delay(&self.settings);

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.sensor.release();
        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Failed to close sink");
        }
        info!(stats = ?self.stats, "Coordinate stream stopped");
        self.stats
    }

    /// One iteration of the stream loop
    pub async fn step(&mut self) -> IterationOutcome {
        self.stats.iterations += 1;

        if let Some(command) = self.commands.poll_command() {
            return self.handle_command(command).await;
        }

        if !self.calibration.is_ready() {
            match self.step_deadline {
                None => self.prompt_if_awaiting(),
                Some(deadline) if Instant::now() >= deadline => self.skip_reference_point(),
                Some(_) => {}
            }
        }

        if !self.calibration.is_ready() {
            return IterationOutcome::AwaitingCalibration;
        }

        let sample = match self.read() {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                self.stats.no_data += 1;
                return IterationOutcome::NoData;
            }
            Err(e) => return self.handle_sensor_error(e).await,
        };

        let Some(coordinate) = self.locate(sample) else {
            self.stats.no_data += 1;
            return IterationOutcome::NoData;
        };

        self.note_landmark(&coordinate);
        self.send(CoordinateMessage::from(coordinate)).await
    }

    fn read(&mut self) -> Result<Option<Sample>, SensorError> {
        read_sample(&mut self.sensor, self.projector.required_capabilities())
    }

    /// Calibrates, smooths and projects a sample
    fn locate(&mut self, mut sample: Sample) -> Option<GeoCoordinate> {
        if let Some(raw) = sample.orientation {
            let corrected = self.calibration.apply(&raw);
            sample.orientation = Some(self.smoother.update(&corrected));
        }

        let Projection::Defined {
            coordinate,
            ambiguous_longitude,
        } = self.projector.project(&sample, self.calibration.frame())
        else {
            return None;
        };

        let mut coordinate = self.calibration.apply_offsets(coordinate);
        match (ambiguous_longitude, self.last_longitude) {
            (false, _) => self.last_longitude = Some(coordinate.longitude),
            (true, Some(held)) if self.settings.hold_longitude_near_pole => {
                debug!(latitude = coordinate.latitude, held, "Holding longitude near pole");
                coordinate.longitude = held;
            }
            (true, _) => {}
        }
        Some(coordinate)
    }

    fn note_landmark(&mut self, coordinate: &GeoCoordinate) {
        let landmark = Landmark::classify(coordinate, self.settings.landmark_tolerance_deg);
        if landmark == self.landmark {
            return;
        }
        if let Some(landmark) = landmark {
            info!(
                %landmark,
                lat = coordinate.latitude,
                lon = coordinate.longitude,
                "Over landmark"
            );
        }
        self.landmark = landmark;
    }

    async fn send(&mut self, message: CoordinateMessage) -> IterationOutcome {
        match timeout(self.settings.send_timeout(), self.sink.send(&message)).await {
            Ok(Ok(())) => {
                self.stats.emitted += 1;
                debug!(lat = message.lat, lon = message.lon, "Emitted coordinate");
                IterationOutcome::Emitted(message)
            }
            Ok(Err(e)) => {
                self.stats.dropped += 1;
                warn!(error = %e, "Dropped coordinate");
                IterationOutcome::Dropped
            }
            Err(_) => {
                self.stats.dropped += 1;
                warn!(timeout = ?self.settings.send_timeout(), "Send timed out, dropped coordinate");
                IterationOutcome::Dropped
            }
        }
    }

    async fn handle_sensor_error(&mut self, err: SensorError) -> IterationOutcome {
        if !err.is_transient() {
            self.stats.errors += 1;
            error!(error = %err, "Sensor read failed");
            return IterationOutcome::Failed;
        }

        self.stats.transient_failures += 1;
        warn!(error = %err, "Transient sensor failure, reinitializing");

        for attempt in 1..=self.settings.reinit_attempts {
            self.stats.reinitializations += 1;
            match self.sensor.reinitialize() {
                Ok(()) => {
                    info!(attempt, "Sensor reinitialized");
                    return IterationOutcome::Recovered;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Sensor reinitialization failed");
                    sleep(self.settings.reinit_backoff()).await;
                }
            }
        }

        self.stats.errors += 1;
        error!(attempts = self.settings.reinit_attempts, "Giving up on sensor reinitialization");
        IterationOutcome::Failed
    }

    async fn handle_command(&mut self, command: CalibrationCommand) -> IterationOutcome {
        match command {
            CalibrationCommand::Calibrate => return self.capture(None).await,
            CalibrationCommand::CalibrateTo(target) => return self.capture(Some(target)).await,
            CalibrationCommand::Reset => {
                self.calibration.reset();
                self.after_calibration_change();
                info!(phase = ?self.calibration.phase(), "Calibration reset");
                self.prompt_if_awaiting();
            }
            CalibrationCommand::ToggleSmoothing => {
                let enabled = self.smoother.toggle();
                info!(enabled, "Smoothing toggled");
            }
        }
        IterationOutcome::CommandHandled
    }

    /// A failed read counts as a rejected capture and then goes through the
    /// same recovery as a failed stream read
    async fn capture(&mut self, target: Option<GeoCoordinate>) -> IterationOutcome {
        let sample = match self.read() {
            Ok(sample) => sample.unwrap_or_default(),
            Err(e) => {
                self.stats.rejected_captures += 1;
                warn!(error = %e, "Sensor read failed during calibration");
                return self.handle_sensor_error(e).await;
            }
        };

        let capture = self.projector.capture(&sample);
        match self.calibration.calibrate(&capture, target) {
            Ok(phase) => {
                self.stats.calibrations += 1;
                self.after_calibration_change();
                match phase {
                    CalibrationPhase::Calibrated => info!(
                        strategy = ?self.calibration.strategy(),
                        degraded = self.calibration.is_degraded(),
                        "Calibration complete"
                    ),
                    _ => debug!(?phase, "Calibration advanced"),
                }
                self.prompt_if_awaiting();
            }
            Err(e) => {
                self.stats.rejected_captures += 1;
                warn!(error = %e, "Calibration capture rejected");
            }
        }
        IterationOutcome::CommandHandled
    }

    fn skip_reference_point(&mut self) {
        if let Some(point) = self.calibration.current_point() {
            warn!(point = %point.name, timeout = ?self.step_timeout, "Reference point timed out, skipping");
        }
        self.stats.skipped_points += 1;
        match self.calibration.skip_point() {
            Ok(CalibrationPhase::Calibrated) => info!(
                degraded = self.calibration.is_degraded(),
                "Calibration complete"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Guided calibration failed, restarting"),
        }
        self.after_calibration_change();
        self.prompt_if_awaiting();
    }

    fn after_calibration_change(&mut self) {
        self.smoother.reset();
        self.last_longitude = None;
        self.landmark = None;
        self.step_deadline = None;
    }

    /// Logs the operator prompt and starts the step timer while guided
    /// calibration is waiting for a capture
    fn prompt_if_awaiting(&mut self) {
        let Some(point) = self.calibration.current_point() else {
            return;
        };
        info!(
            point = %point.name,
            lat = point.location.latitude,
            lon = point.location.longitude,
            "Point the globe at the reference location and calibrate"
        );
        self.step_deadline = Some(Instant::now() + self.step_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Capabilities;
    use crate::simulated::SimulatedGlobe;
    use crate::transport::LogSink;
    use crate::types::{CalibrationSettings, ProjectorSettings};
    use std::collections::VecDeque;

    fn driver(
        sensor: SimulatedGlobe,
        commands: VecDeque<CalibrationCommand>,
    ) -> CoordinateDriver<SimulatedGlobe, LogSink, VecDeque<CalibrationCommand>> {
        let projector = Projector::new(&ProjectorSettings::default(), Capabilities::ORIENTATION).unwrap();
        let calibration = CalibrationState::new(CalibrationSettings::default(), &projector);
        CoordinateDriver::new(
            sensor,
            LogSink::new(),
            commands,
            projector,
            calibration,
            DriverSettings::default(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_outcome_delays() {
        let settings = DriverSettings::default();
        assert_eq!(IterationOutcome::NoData.delay(&settings), settings.retry_interval());
        assert_eq!(IterationOutcome::Dropped.delay(&settings), settings.emit_interval());
        assert_eq!(IterationOutcome::Failed.delay(&settings), settings.error_backoff());
    }

    #[tokio::test]
    async fn test_emits_projected_coordinate() {
        let mut driver = driver(SimulatedGlobe::new(90.0, 0.0), VecDeque::new());
        let outcome = driver.step().await;
        assert_eq!(outcome, IterationOutcome::Emitted(CoordinateMessage { lat: 0.0, lon: 0.0 }));
        let outcome = driver.step().await;
        assert_eq!(outcome, IterationOutcome::Emitted(CoordinateMessage { lat: 0.0, lon: 90.0 }));
        assert_eq!(driver.sink().sent(), 2);
    }

    #[tokio::test]
    async fn test_warmup_is_no_data() {
        let mut driver = driver(SimulatedGlobe::new(10.0, 0.0).with_warmup(2), VecDeque::new());
        assert_eq!(driver.step().await, IterationOutcome::NoData);
        assert_eq!(driver.step().await, IterationOutcome::NoData);
        assert!(matches!(driver.step().await, IterationOutcome::Emitted(_)));
        assert_eq!(driver.stats().no_data, 2);
        assert_eq!(driver.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_toggle_smoothing_command() {
        let mut driver = driver(
            SimulatedGlobe::new(10.0, 0.0),
            VecDeque::from([CalibrationCommand::ToggleSmoothing]),
        );
        assert!(!driver.smoothing_enabled());
        assert_eq!(driver.step().await, IterationOutcome::CommandHandled);
        assert!(driver.smoothing_enabled());
        assert_eq!(driver.sink().sent(), 0);
    }

    #[tokio::test]
    async fn test_zero_point_command_recenters_stream() {
        let mut driver = driver(
            SimulatedGlobe::new(0.0, 25.0),
            VecDeque::from([CalibrationCommand::Calibrate]),
        );
        assert_eq!(driver.step().await, IterationOutcome::CommandHandled);
        assert_eq!(driver.stats().calibrations, 1);

        let IterationOutcome::Emitted(message) = driver.step().await else {
            panic!("expected an emitted coordinate");
        };
        assert_eq!(message, CoordinateMessage { lat: 0.0, lon: 0.0 });
        assert_eq!(driver.landmark(), Some(Landmark::NullIsland));
    }

    #[tokio::test]
    async fn test_landmark_follows_the_stream() {
        let mut driver = driver(SimulatedGlobe::new(90.0, 0.0), VecDeque::new());
        driver.step().await;
        assert_eq!(driver.landmark(), Some(Landmark::NullIsland));
        driver.step().await;
        assert_eq!(driver.landmark(), Some(Landmark::Equator));
    }
}
