//! Data processing logic for the rocket: turns raw samples into altitude, velocity,
//! acceleration, orientation and crew survivability.

use fixed_deque::Deque;
use log::debug;
use nalgebra::UnitQuaternion;
use serde::Serialize;

use crate::config::{EstimatorConfig, FlightConfig, VelocitySource};
use crate::imu::SensorSample;
use crate::orientation::{EulerAngles, OrientationFusion};
use crate::survivability::SurvivabilityScorer;

pub struct DataProcessor {
    config: EstimatorConfig,
    initial_altitude: Option<f64>,
    current_altitude: f64,
    max_altitude: f64,
    vertical_velocity: f64,
    max_velocity: f64,
    velocity_from_acceleration: f64,
    max_velocity_from_acceleration: f64,
    vertical_acceleration: f64,
    time_difference: f64,
    landing_velocity: f64,
    orientation: Option<UnitQuaternion<f64>>,
    last_data_packet: Option<SensorSample>,
    last_velocity_calculation_packet: Option<SensorSample>,
    velocity_rolling_average: Deque<f64>,
    fusion: OrientationFusion,
    survivability: SurvivabilityScorer,
}

/// What the rest of the payload sees of the processor after each update. Altitudes are
/// relative to the first altitude reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessorDataPacket {
    pub timestamp: u64,
    pub current_altitude: f64,
    /// Moving average of the differentiated altitude.
    pub vertical_velocity: f64,
    pub velocity_from_acceleration: f64,
    pub vertical_acceleration: f64,
    pub time_since_last_data_packet: f64,
    pub maximum_altitude: f64,
    pub maximum_velocity: f64,
    pub maximum_velocity_from_acceleration: f64,
    pub orientation: Option<EulerAngles>,
    pub landing_velocity: f64,
    pub crew_survivability: f64,
}

impl ProcessorDataPacket {
    pub fn velocity(&self, source: VelocitySource) -> f64 {
        match source {
            VelocitySource::Altitude => self.vertical_velocity,
            VelocitySource::Acceleration => self.velocity_from_acceleration,
        }
    }

    pub fn maximum_velocity_for(&self, source: VelocitySource) -> f64 {
        match source {
            VelocitySource::Altitude => self.maximum_velocity,
            VelocitySource::Acceleration => self.maximum_velocity_from_acceleration,
        }
    }
}

impl DataProcessor {
    pub fn new(config: &FlightConfig) -> Self {
        DataProcessor {
            config: config.estimator.clone(),
            initial_altitude: None,
            current_altitude: 0.0,
            max_altitude: 0.0,
            vertical_velocity: 0.0,
            max_velocity: 0.0,
            velocity_from_acceleration: 0.0,
            max_velocity_from_acceleration: 0.0,
            vertical_acceleration: 0.0,
            time_difference: 0.0,
            landing_velocity: 0.0,
            orientation: None,
            last_data_packet: None,
            last_velocity_calculation_packet: None,
            velocity_rolling_average: Deque::new(config.estimator.velocity_window_size),
            fusion: OrientationFusion::new(&config.estimator),
            survivability: SurvivabilityScorer::new(&config.survivability),
        }
    }

    /// Timestamp of the last processed sample, in milliseconds.
    pub fn current_timestamp(&self) -> u64 {
        self.last_data_packet.as_ref().map_or(0, |p| p.timestamp)
    }

    pub fn current_altitude(&self) -> f64 {
        self.current_altitude
    }

    pub fn max_altitude(&self) -> f64 {
        self.max_altitude
    }

    /// Recomputes everything from a new sample. Samples must arrive in order.
    pub fn update(&mut self, data_packet: &SensorSample) {
        // Priming with the first packet makes the first time difference (and velocity) zero.
        let last_timestamp = self
            .last_data_packet
            .get_or_insert_with(|| data_packet.clone())
            .timestamp;
        self.time_difference = (data_packet.timestamp as f64 - last_timestamp as f64) / 1000.0;
        // Duplicate or out of order timestamps can't be differentiated or integrated.
        let fresh_tick = self.time_difference > 0.0;

        if self.initial_altitude.is_none() {
            self.first_update(data_packet);
        } else if fresh_tick {
            if let Some(velocity) = self.calculate_velocity_from_altitude(data_packet) {
                self.vertical_velocity = velocity;
            }
        }
        if let (Some(initial), Some(altitude)) =
            (self.initial_altitude, data_packet.pressure_altitude)
        {
            self.current_altitude = altitude - initial;
            self.max_altitude = self.max_altitude.max(self.current_altitude);
        }

        self.orientation = self.fusion.update(data_packet, self.time_difference);
        let acceleration_updated = self.calculate_vertical_acceleration(data_packet);
        if fresh_tick && acceleration_updated {
            let acceleration = deadband(
                self.vertical_acceleration,
                self.config.accel_deadband_meters_per_second_squared,
            );
            self.velocity_from_acceleration += acceleration * self.time_difference;
        }

        self.max_velocity = self.max_velocity.max(self.vertical_velocity.abs());
        self.max_velocity_from_acceleration = self
            .max_velocity_from_acceleration
            .max(self.velocity_from_acceleration.abs());

        let pitch = self.orientation.map(|q| q.euler_angles().1);
        self.survivability
            .update(self.vertical_acceleration, data_packet.gyro_y, pitch);

        self.last_data_packet = Some(data_packet.clone());
    }

    pub fn snapshot(&self) -> ProcessorDataPacket {
        ProcessorDataPacket {
            timestamp: self.current_timestamp(),
            current_altitude: self.current_altitude,
            vertical_velocity: self.vertical_velocity,
            velocity_from_acceleration: self.velocity_from_acceleration,
            vertical_acceleration: self.vertical_acceleration,
            time_since_last_data_packet: self.time_difference,
            maximum_altitude: self.max_altitude,
            maximum_velocity: self.max_velocity,
            maximum_velocity_from_acceleration: self.max_velocity_from_acceleration,
            orientation: self.orientation.as_ref().map(EulerAngles::from_quaternion),
            landing_velocity: self.landing_velocity,
            crew_survivability: self.survivability.crew_survivability(),
        }
    }

    /// Averages the older half of the velocity window, i.e. the descent just before we
    /// noticed the ground.
    pub fn calculate_landing_velocity(&mut self) -> f64 {
        let count = (self.velocity_rolling_average.len() / 2).max(1);
        let samples = self.velocity_rolling_average.len().min(count);
        self.landing_velocity = if samples == 0 {
            0.0
        } else {
            self.velocity_rolling_average.iter().take(samples).sum::<f64>() / samples as f64
        };
        self.landing_velocity
    }

    pub fn start_survivability(&mut self) {
        self.survivability.start();
    }

    /// Ends scoring, penalizing a hard landing. Uses the last calculated landing velocity.
    pub fn stop_survivability(&mut self) {
        self.survivability.stop(self.landing_velocity);
    }

    /// Captures the altitude baseline from the first sample that has one.
    fn first_update(&mut self, data_packet: &SensorSample) {
        let Some(altitude) = data_packet.pressure_altitude else {
            return;
        };
        debug!("Initial altitude: {:.2} m", altitude);
        self.initial_altitude = Some(altitude);
        self.current_altitude = 0.0;
        self.max_altitude = 0.0;
        self.last_velocity_calculation_packet = Some(data_packet.clone());
        self.velocity_rolling_average.clear();
        self.velocity_rolling_average.push_back(0.0);
    }

    /// Returns None when the altitude change is inside the deadband (or the altitude is
    /// missing), in which case the previous velocity stands.
    fn calculate_velocity_from_altitude(&mut self, data_packet: &SensorSample) -> Option<f64> {
        let altitude = data_packet.pressure_altitude?;
        let last = self.last_velocity_calculation_packet.as_ref()?;
        let altitude_diff = altitude - last.pressure_altitude?;

        if altitude_diff.abs() < self.config.altitude_deadband_meters {
            return None;
        }
        let time_diff = (data_packet.timestamp as f64 - last.timestamp as f64) / 1000.0;
        if time_diff <= 0.0 {
            return None;
        }

        self.last_velocity_calculation_packet = Some(data_packet.clone());
        self.velocity_rolling_average.push_back(altitude_diff / time_diff);
        Some(
            self.velocity_rolling_average.iter().sum::<f64>()
                / self.velocity_rolling_average.len() as f64,
        )
    }

    /// Rotates the body acceleration into the world frame and removes gravity. Returns false
    /// (holding the last value) without an orientation or a full accelerometer reading.
    fn calculate_vertical_acceleration(&mut self, data_packet: &SensorSample) -> bool {
        let (Some(orientation), Some(acceleration)) =
            (self.orientation, data_packet.acceleration())
        else {
            return false;
        };
        self.vertical_acceleration = self.fusion.up_specific_force(&orientation, &acceleration)
            - self.config.gravity_meters_per_second_squared;
        true
    }
}

/// Zero inside the threshold, untouched outside it.
pub fn deadband(input_value: f64, threshold: f64) -> f64 {
    if input_value.abs() < threshold {
        0.0
    } else {
        input_value
    }
}
