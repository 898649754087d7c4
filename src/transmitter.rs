//! The radio beacon: what we tell the ground station once we've landed.

use std::io::Write;
use std::time::Duration;

use log::info;
use serde::Serialize;
use serialport::SerialPort;

use crate::config::VelocitySource;
use crate::data_processor::ProcessorDataPacket;
use crate::error::PayloadError;
use crate::imu::SensorSample;

const METERS_TO_FEET: f64 = 3.28084;

// Valid ranges for every transmitted value, anything outside is clamped.
const TEMPERATURE_RANGE_CELSIUS: (f64, f64) = (-40.0, 85.0);
const APOGEE_RANGE_METERS: (f64, f64) = (0.0, 10_000.0);
const BATTERY_RANGE_PERCENT: (f64, f64) = (0.0, 100.0);
const ROLL_YAW_RANGE_DEGREES: (f64, f64) = (-180.0, 180.0);
const PITCH_RANGE_DEGREES: (f64, f64) = (-90.0, 90.0);
const MAX_VELOCITY_RANGE_METERS_PER_SECOND: (f64, f64) = (0.0, 500.0);
const LANDING_VELOCITY_RANGE_METERS_PER_SECOND: (f64, f64) = (-200.0, 200.0);
const SURVIVABILITY_RANGE: (f64, f64) = (0.0, 1.0);
const LATITUDE_RANGE_DEGREES: (f64, f64) = (-90.0, 90.0);
const LONGITUDE_RANGE_DEGREES: (f64, f64) = (-180.0, 180.0);

// Battery voltage → percent, as (empty voltage, usable span).
const PI_BATTERY_VOLTAGE: (f64, f64) = (2.2, 1.1);
const TX_BATTERY_VOLTAGE: (f64, f64) = (2.0, 1.0);

/// The subset of the flight data that goes over the radio.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransmitterDataPacket {
    pub temperature: f64,      // Celsius
    pub apogee: f64,           // meters
    pub battery_level_pi: f64, // percent
    pub battery_level_tx: f64, // percent
    pub orientation: [f64; 3], // Roll, Pitch, Yaw in degrees
    pub time_of_landing: String,
    pub max_velocity: f64,
    pub landing_velocity: f64,
    pub crew_survivability: f64,
    pub landing_coordinates: [f64; 2], // latitude, longitude
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(min, max)
    }
}

impl TransmitterDataPacket {
    /// Builds a validated packet from the latest sample and processor state.
    pub fn new(
        sample: &SensorSample,
        processor_data_packet: &ProcessorDataPacket,
        time_of_landing: &str,
        velocity_source: VelocitySource,
    ) -> Self {
        let orientation = processor_data_packet
            .orientation
            .map_or([0.0; 3], |o| [o.roll, o.pitch, o.yaw]);
        let mut packet = TransmitterDataPacket {
            temperature: sample.temperature.unwrap_or(0.0),
            apogee: processor_data_packet.maximum_altitude,
            battery_level_pi: Self::battery_percent(sample.voltage_pi, PI_BATTERY_VOLTAGE),
            battery_level_tx: Self::battery_percent(sample.voltage_tx, TX_BATTERY_VOLTAGE),
            orientation,
            time_of_landing: time_of_landing.to_string(),
            max_velocity: processor_data_packet.maximum_velocity_for(velocity_source),
            landing_velocity: processor_data_packet.landing_velocity,
            crew_survivability: processor_data_packet.crew_survivability,
            landing_coordinates: [
                sample.gps_latitude.unwrap_or(0.0),
                sample.gps_longitude.unwrap_or(0.0),
            ],
        };
        packet.validate_data_points();
        packet
    }

    /// Converts a battery voltage to a percentage of its usable range. A missing reading is
    /// reported as an empty battery.
    pub fn battery_percent(voltage: Option<f64>, (empty, span): (f64, f64)) -> f64 {
        voltage.map_or(0.0, |v| clamp((v - empty) / span * 100.0, BATTERY_RANGE_PERCENT))
    }

    /// Clamps every field into its valid range and replaces NaN with zero.
    pub fn validate_data_points(&mut self) {
        self.temperature = clamp(self.temperature, TEMPERATURE_RANGE_CELSIUS);
        self.apogee = clamp(self.apogee, APOGEE_RANGE_METERS);
        self.battery_level_pi = clamp(self.battery_level_pi, BATTERY_RANGE_PERCENT);
        self.battery_level_tx = clamp(self.battery_level_tx, BATTERY_RANGE_PERCENT);
        self.orientation = [
            clamp(self.orientation[0], ROLL_YAW_RANGE_DEGREES),
            clamp(self.orientation[1], PITCH_RANGE_DEGREES),
            clamp(self.orientation[2], ROLL_YAW_RANGE_DEGREES),
        ];
        self.max_velocity = clamp(self.max_velocity, MAX_VELOCITY_RANGE_METERS_PER_SECOND);
        self.landing_velocity =
            clamp(self.landing_velocity, LANDING_VELOCITY_RANGE_METERS_PER_SECOND);
        self.crew_survivability = clamp(self.crew_survivability, SURVIVABILITY_RANGE);
        self.landing_coordinates = [
            clamp(self.landing_coordinates[0], LATITUDE_RANGE_DEGREES),
            clamp(self.landing_coordinates[1], LONGITUDE_RANGE_DEGREES),
        ];
    }

    /// Beacon text in the units the ground station reads (°F, ft, ft/s). Landing coordinates
    /// are sent separately, see `beacon_line`.
    pub fn compress_packet(&self) -> String {
        format!(
            "temperature={:.2}°F,apogee={:.2}ft,battery_status=CPU:{:.2}% | TX:{:.2}%,\
             orientation=(roll={:.2},pitch={:.2},yaw={:.2}),time_landing={},\
             max_vel={:.2}ft/s,landing_vel={:.2}ft/s,crew_survival={:.1}%",
            self.temperature * 9.0 / 5.0 + 32.0,
            self.apogee * METERS_TO_FEET,
            self.battery_level_pi,
            self.battery_level_tx,
            self.orientation[0],
            self.orientation[1],
            self.orientation[2],
            self.time_of_landing,
            self.max_velocity * METERS_TO_FEET,
            self.landing_velocity * METERS_TO_FEET,
            self.crew_survivability * 100.0,
        )
    }

    /// One full line for the radio: the compressed packet followed by the landing position.
    pub fn beacon_line(&self) -> String {
        format!(
            "{},landing=({:.5},{:.5})",
            self.compress_packet(),
            self.landing_coordinates[0],
            self.landing_coordinates[1]
        )
    }
}

pub trait Transmitter {
    fn start(&mut self) -> Result<(), PayloadError>;
    fn stop(&mut self);
    fn send(&mut self, data_packet: &TransmitterDataPacket) -> Result<(), PayloadError>;
}

/// Radio transceiver hanging off a serial port. Each packet is written as one line.
pub struct SerialTransmitter {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransmitter {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        SerialTransmitter {
            path: path.to_string(),
            baud_rate,
            port: None,
        }
    }
}

impl Transmitter for SerialTransmitter {
    fn start(&mut self) -> Result<(), PayloadError> {
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(Duration::from_millis(1000))
            .open()?;
        info!("Transmitter serial port {} opened", self.path);
        self.port = Some(port);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
        }
    }

    fn send(&mut self, data_packet: &TransmitterDataPacket) -> Result<(), PayloadError> {
        let port = self.port.as_mut().ok_or_else(|| PayloadError::Hook {
            hook: "transmitter",
            reason: format!("serial port {} is not open", self.path),
        })?;
        let line = data_packet.beacon_line() + "\n";
        port.write_all(line.as_bytes())?;
        Ok(())
    }
}
