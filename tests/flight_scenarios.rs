//! Whole simulated flights through the payload context.

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use payload_rocket::camera::Camera;
use payload_rocket::config::FlightConfig;
use payload_rocket::context::Context;
use payload_rocket::error::PayloadError;
use payload_rocket::imu::SensorSample;
use payload_rocket::logger::Logger;
use payload_rocket::mock::{MockCamera, MockImu};
use payload_rocket::receiver::Receiver;
use payload_rocket::transmitter::{Transmitter, TransmitterDataPacket};

const GROUND_LEVEL: f64 = 1_000.0;

/// A ground station the test can talk through mid-flight.
#[derive(Clone, Default)]
struct GroundStation(Arc<Mutex<String>>);

impl GroundStation {
    fn send(&self, message: &str) {
        *self.0.lock().unwrap() = message.to_string();
    }
}

impl Receiver for GroundStation {
    fn start(&mut self) -> Result<(), PayloadError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn latest_message(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

/// Keeps every packet it was asked to send.
#[derive(Clone, Default)]
struct RecordingTransmitter(Arc<Mutex<Vec<String>>>);

impl RecordingTransmitter {
    fn sent(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Transmitter for RecordingTransmitter {
    fn start(&mut self) -> Result<(), PayloadError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn send(&mut self, data_packet: &TransmitterDataPacket) -> Result<(), PayloadError> {
        self.0.lock().unwrap().push(data_packet.compress_packet());
        Ok(())
    }
}

struct BrokenCamera;

impl Camera for BrokenCamera {
    fn start_recording(&mut self) -> Result<(), PayloadError> {
        Err(PayloadError::Hook {
            hook: "camera",
            reason: "no camera connected".to_string(),
        })
    }

    fn stop_recording(&mut self) -> Result<(), PayloadError> {
        Err(PayloadError::Hook {
            hook: "camera",
            reason: "no camera connected".to_string(),
        })
    }
}

struct Flight {
    context: Context,
    ground_station: GroundStation,
    transmitter: RecordingTransmitter,
}

impl Flight {
    fn new(samples: Vec<SensorSample>, camera: Box<dyn Camera>) -> Self {
        let config = FlightConfig::default();
        let ground_station = GroundStation::default();
        let transmitter = RecordingTransmitter::default();
        let logger = Logger::from_writer(Box::new(std::io::sink()), &config.logging);
        let mut context = Context::new(
            config,
            Box::new(MockImu::from_samples(samples)),
            camera,
            Some(Box::new(transmitter.clone())),
            Box::new(ground_station.clone()),
            logger,
        );
        context.start().unwrap();
        Flight {
            context,
            ground_station,
            transmitter,
        }
    }

    /// Runs until the samples run out, returning every phase entered and when.
    fn fly(&mut self) -> Vec<(&'static str, u64)> {
        let mut phases = Vec::new();
        while self.context.update() {
            let state = &self.context.state;
            if phases.last().map(|(name, _)| *name) != Some(state.name()) {
                phases.push((state.name(), state.start_time()));
            }
        }
        phases
    }

    /// Runs until `phase` is entered.
    fn fly_until(&mut self, phase: &str) {
        while self.context.state.name() != phase {
            assert!(self.context.update(), "ran out of samples before {phase}");
        }
    }
}

/// Samples 100 ms apart at the given altitudes above the pad.
fn samples_at(altitudes: impl IntoIterator<Item = f64>) -> Vec<SensorSample> {
    altitudes
        .into_iter()
        .enumerate()
        .map(|(i, altitude)| SensorSample {
            timestamp: i as u64 * 100,
            pressure_altitude: Some(GROUND_LEVEL + altitude),
            temperature: Some(18.0),
            ..Default::default()
        })
        .collect()
}

/// Two seconds on the pad, 10 s climbing at 30 m/s to 300 m, 30 s coming down at 10 m/s,
/// then 15 s sitting on the ground.
fn launch_profile() -> Vec<f64> {
    let mut altitudes = vec![0.0; 20];
    altitudes.extend((1..=100).map(|i| i as f64 * 3.0));
    altitudes.extend((1..=300).map(|i| 300.0 - i as f64));
    altitudes.extend(std::iter::repeat_n(0.0, 150));
    altitudes
}

fn names(phases: &[(&'static str, u64)]) -> Vec<&'static str> {
    phases.iter().map(|(name, _)| *name).collect()
}

#[test]
fn full_launch_visits_every_phase_once() {
    let mut flight = Flight::new(samples_at(launch_profile()), Box::new(MockCamera::default()));
    let phases = flight.fly();

    assert_eq!(
        names(&phases),
        vec!["Standby", "MotorBurn", "Coast", "FreeFall", "Landed"]
    );
    let packet = flight.context.processor_data_packet();
    assert_relative_eq!(packet.maximum_altitude, 300.0, epsilon = 1e-6);

    // Lift off once above 10 m, the burn lasts 2.6 s.
    assert_eq!(phases[1].1, 2_300);
    assert_eq!(phases[2].1, 4_900);
    // Landing needs 10 s of confirmation after reaching 15 m.
    let (_, free_fall_at) = phases[3];
    let (_, landed_at) = phases[4];
    assert!(landed_at > free_fall_at);
    assert_eq!(landed_at, 50_400);
}

#[test]
fn burnout_is_detected_from_falling_velocity() {
    // 1.2 s at 30 m/s, then the motor burns out and the climb slows to 10 m/s up to 56 m.
    let mut altitudes = vec![0.0; 20];
    let mut altitude = 0.0;
    for step in std::iter::repeat_n(3.0, 12).chain(std::iter::repeat_n(1.0, 20)) {
        altitude += step;
        altitudes.push(altitude);
    }
    altitudes.extend((1..=56).map(|i| 56.0 - i as f64));
    altitudes.extend(std::iter::repeat_n(0.0, 150));

    let mut flight = Flight::new(samples_at(altitudes), Box::new(MockCamera::default()));
    let phases = flight.fly();

    assert_eq!(
        names(&phases),
        vec!["Standby", "MotorBurn", "Coast", "FreeFall", "Landed"]
    );
    let (_, burn_at) = phases[1];
    let (_, coast_at) = phases[2];
    assert_eq!(burn_at, 2_300);
    assert_eq!(coast_at, 3_200);
    // Well before the burn timer would have fired.
    assert!(coast_at - burn_at < 2_600);
    assert_eq!(phases[3].1, 5_700);
    assert_eq!(phases[4].1, 19_200);
    assert_relative_eq!(
        flight.context.processor_data_packet().maximum_altitude,
        56.0,
        epsilon = 1e-6
    );
}

#[test]
fn landing_report_goes_out_once() {
    let mut flight = Flight::new(samples_at(launch_profile()), Box::new(MockCamera::default()));
    flight.fly();

    let packet = flight.context.processor_data_packet();
    assert_relative_eq!(packet.landing_velocity, -10.0, epsilon = 1e-9);
    // Coming down at 10 m/s is a hard landing.
    assert_relative_eq!(packet.crew_survivability, 0.5, epsilon = 1e-9);

    let sent = flight.transmitter.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("apogee=984.25ft"));
    assert!(sent[0].contains("landing_vel=-32.81ft/s"));
    assert!(sent[0].contains("crew_survival=50.0%"));
}

#[test]
fn broken_camera_does_not_stop_the_flight() {
    let mut flight = Flight::new(samples_at(launch_profile()), Box::new(BrokenCamera));
    let phases = flight.fly();
    assert_eq!(names(&phases).last(), Some(&"Landed"));
    assert_eq!(flight.transmitter.sent().len(), 1);
}

#[test]
fn standby_holds_on_the_pad() {
    let mut flight = Flight::new(samples_at(vec![0.0; 100]), Box::new(MockCamera::default()));
    let phases = flight.fly();
    assert_eq!(names(&phases), vec!["Standby"]);
    assert!(flight.transmitter.sent().is_empty());
}

#[test]
fn free_fall_times_out_without_reaching_the_ground() {
    // Climb to 300 m, sink to 200 m and get stuck there (say, caught in a tree).
    let mut altitudes = vec![0.0; 20];
    altitudes.extend((1..=100).map(|i| i as f64 * 3.0));
    altitudes.extend((1..=100).map(|i| 300.0 - i as f64));
    altitudes.extend(std::iter::repeat_n(200.0, 3_000));

    let mut flight = Flight::new(samples_at(altitudes), Box::new(MockCamera::default()));
    let phases = flight.fly();

    assert_eq!(
        names(&phases),
        vec!["Standby", "MotorBurn", "Coast", "FreeFall", "Landed"]
    );
    let (_, free_fall_at) = phases[3];
    let (_, landed_at) = phases[4];
    assert_eq!(landed_at - free_fall_at, 300_000);
    assert_eq!(flight.transmitter.sent().len(), 1);
}

#[test]
fn transmit_forces_landing_during_coast() {
    let mut flight = Flight::new(samples_at(launch_profile()), Box::new(MockCamera::default()));
    flight.fly_until("Coast");

    flight.ground_station.send("TRANSMIT");
    assert!(flight.context.update());
    assert!(flight.context.state.is_landed());
    assert!(flight.context.processor_data_packet().current_altitude > 50.0);
    assert_eq!(flight.transmitter.sent().len(), 1);

    // The rest of the flight only repeats the beacon, every 15 s of flight time.
    let phases = flight.fly();
    assert_eq!(names(&phases), vec!["Landed"]);
    assert_eq!(flight.transmitter.sent().len(), 4);
}

#[test]
fn repeated_messages_are_latched() {
    let mut flight = Flight::new(samples_at(vec![0.0; 50]), Box::new(MockCamera::default()));
    flight.ground_station.send("TRANSMIT");
    for _ in 0..10 {
        assert!(flight.context.update());
    }
    assert!(flight.context.state.is_landed());
    assert_eq!(flight.transmitter.sent().len(), 1);

    flight.ground_station.send("STOP");
    for _ in 0..10 {
        flight.context.update();
    }
    assert_eq!(flight.transmitter.sent().len(), 1);

    flight.ground_station.send("TRANSMIT");
    flight.context.update();
    assert_eq!(flight.transmitter.sent().len(), 2);
}
