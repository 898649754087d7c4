//! Tunable thresholds for the estimator, the state machine and the radio.
//!
//! Every section falls back to the values in [`crate::constants`], so a TOML file only needs
//! the fields it wants to override:
//!
//! ```toml
//! [state_machine]
//! ground_altitude_meters = 20.0
//! velocity_source = "acceleration"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ConfigError, PayloadError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    pub estimator: EstimatorConfig,
    pub state_machine: StateMachineConfig,
    pub survivability: SurvivabilityConfig,
    pub transmission: TransmissionConfig,
    pub logging: LoggingConfig,
}

/// Which orientation strategy the payload hardware supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Accelerometer + magnetometer, solved from scratch every tick.
    Direct,
    /// Gyroscope integration seeded from the IMU quaternion.
    Gyro,
}

/// Which velocity estimate drives the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocitySource {
    Altitude,
    Acceleration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub velocity_window_size: usize,
    pub altitude_deadband_meters: f64,
    pub accel_deadband_meters_per_second_squared: f64,
    pub gravity_meters_per_second_squared: f64,
    pub fusion: FusionMode,
    pub magnetic_dip_degrees: f64,
    pub accelerometer_weight: f64,
    pub magnetometer_weight: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            velocity_window_size: VELOCITY_FROM_ALTITUDE_WINDOW_SIZE,
            altitude_deadband_meters: ALTITUDE_DEADBAND_METERS,
            accel_deadband_meters_per_second_squared: ACCEL_DEADBAND_METERS_PER_SECOND_SQUARED,
            gravity_meters_per_second_squared: GRAVITY_METERS_PER_SECOND_SQUARED,
            fusion: FusionMode::Gyro,
            magnetic_dip_degrees: MAGNETIC_DIP_DEGREES,
            accelerometer_weight: ACCELEROMETER_WEIGHT,
            magnetometer_weight: MAGNETOMETER_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    pub takeoff_height_meters: f64,
    pub takeoff_velocity_meters_per_second: f64,
    pub motor_burn_time_seconds: f64,
    pub max_velocity_threshold: f64,
    pub max_altitude_threshold: f64,
    pub ground_altitude_meters: f64,
    pub seconds_to_considered_landed: f64,
    pub max_free_fall_seconds: f64,
    pub velocity_source: VelocitySource,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            takeoff_height_meters: TAKEOFF_HEIGHT_METERS,
            takeoff_velocity_meters_per_second: TAKEOFF_VELOCITY_METERS_PER_SECOND,
            motor_burn_time_seconds: MOTOR_BURN_TIME_SECONDS,
            max_velocity_threshold: MAX_VELOCITY_THRESHOLD,
            max_altitude_threshold: MAX_ALTITUDE_THRESHOLD,
            ground_altitude_meters: GROUND_ALTITUDE_METERS,
            seconds_to_considered_landed: SECONDS_TO_CONSIDERED_LANDED,
            max_free_fall_seconds: MAX_FREE_FALL_SECONDS,
            velocity_source: VelocitySource::Altitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivabilityConfig {
    pub accel_weight: f64,
    pub gyro_weight: f64,
    pub pitch_weight: f64,
    pub intensity_scale: f64,
    pub intensity_threshold: f64,
    pub max_intensity: f64,
    pub landing_velocity_threshold_meters_per_second: f64,
    pub landing_penalty_factor: f64,
}

impl Default for SurvivabilityConfig {
    fn default() -> Self {
        Self {
            accel_weight: SURVIVABILITY_ACCEL_WEIGHT,
            gyro_weight: SURVIVABILITY_GYRO_WEIGHT,
            pitch_weight: SURVIVABILITY_PITCH_WEIGHT,
            intensity_scale: SURVIVABILITY_INTENSITY_SCALE,
            intensity_threshold: SURVIVABILITY_INTENSITY_THRESHOLD,
            max_intensity: SURVIVABILITY_MAX_INTENSITY,
            landing_velocity_threshold_meters_per_second:
                LANDING_VELOCITY_THRESHOLD_METERS_PER_SECOND,
            landing_penalty_factor: LANDING_PENALTY_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub number_of_transmissions: u32,
    pub transmission_interval_seconds: f64,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            number_of_transmissions: NUMBER_OF_TRANSMISSIONS,
            transmission_interval_seconds: TRANSMISSION_INTERVAL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub idle_log_capacity: usize,
    pub log_buffer_size: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            idle_log_capacity: IDLE_LOG_CAPACITY,
            log_buffer_size: LOG_BUFFER_SIZE,
        }
    }
}

impl FlightConfig {
    /// Reads a TOML file and validates it.
    pub fn load(path: &Path) -> Result<Self, PayloadError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, PayloadError> {
        let config: FlightConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.estimator;
        if e.velocity_window_size < 2 {
            return Err(ConfigError::WindowTooSmall(e.velocity_window_size));
        }
        non_negative("altitude_deadband_meters", e.altitude_deadband_meters)?;
        non_negative(
            "accel_deadband_meters_per_second_squared",
            e.accel_deadband_meters_per_second_squared,
        )?;
        positive(
            "gravity_meters_per_second_squared",
            e.gravity_meters_per_second_squared,
        )?;
        within("magnetic_dip_degrees", e.magnetic_dip_degrees, -90.0, 90.0)?;
        positive("accelerometer_weight", e.accelerometer_weight)?;
        positive("magnetometer_weight", e.magnetometer_weight)?;

        let s = &self.state_machine;
        positive("takeoff_height_meters", s.takeoff_height_meters)?;
        positive(
            "takeoff_velocity_meters_per_second",
            s.takeoff_velocity_meters_per_second,
        )?;
        positive("motor_burn_time_seconds", s.motor_burn_time_seconds)?;
        fraction("max_velocity_threshold", s.max_velocity_threshold)?;
        fraction("max_altitude_threshold", s.max_altitude_threshold)?;
        non_negative("ground_altitude_meters", s.ground_altitude_meters)?;
        positive(
            "seconds_to_considered_landed",
            s.seconds_to_considered_landed,
        )?;
        positive("max_free_fall_seconds", s.max_free_fall_seconds)?;

        let c = &self.survivability;
        non_negative("accel_weight", c.accel_weight)?;
        non_negative("gyro_weight", c.gyro_weight)?;
        non_negative("pitch_weight", c.pitch_weight)?;
        positive("intensity_scale", c.intensity_scale)?;
        non_negative("intensity_threshold", c.intensity_threshold)?;
        // Strictly below 100 so one tick can never zero the score.
        if !(c.max_intensity > 0.0 && c.max_intensity < 100.0) {
            return Err(ConfigError::OutOfRange {
                field: "max_intensity",
                value: c.max_intensity,
                min: 0.0,
                max: 100.0,
            });
        }
        finite(
            "landing_velocity_threshold_meters_per_second",
            c.landing_velocity_threshold_meters_per_second,
        )?;
        fraction("landing_penalty_factor", c.landing_penalty_factor)?;

        positive(
            "transmission_interval_seconds",
            self.transmission.transmission_interval_seconds,
        )?;
        positive("log_buffer_size", self.logging.log_buffer_size as f64)?;
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: f64::INFINITY,
        })
    }
}

fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::NotAFraction { field, value })
    }
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(FlightConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = FlightConfig::from_toml(
            r#"
            [state_machine]
            ground_altitude_meters = 20.0
            velocity_source = "acceleration"

            [estimator]
            fusion = "direct"
            "#,
        )
        .unwrap();

        assert_eq!(config.state_machine.ground_altitude_meters, 20.0);
        assert_eq!(
            config.state_machine.velocity_source,
            VelocitySource::Acceleration
        );
        assert_eq!(config.estimator.fusion, FusionMode::Direct);
        assert_eq!(
            config.state_machine.takeoff_height_meters,
            TAKEOFF_HEIGHT_METERS
        );
        assert_eq!(config.survivability, SurvivabilityConfig::default());
    }

    #[test]
    fn rejects_fraction_above_one() {
        let mut config = FlightConfig::default();
        config.state_machine.max_altitude_threshold = 1.5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotAFraction {
                field: "max_altitude_threshold",
                value: 1.5
            })
        );
    }

    #[test]
    fn rejects_tiny_window_and_runaway_intensity() {
        let mut config = FlightConfig::default();
        config.estimator.velocity_window_size = 1;
        assert_eq!(config.validate(), Err(ConfigError::WindowTooSmall(1)));

        let mut config = FlightConfig::default();
        config.survivability.max_intensity = 100.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "max_intensity",
                ..
            })
        ));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let result = FlightConfig::from_toml("[state_machine]\nground_altitude_meters = \"low\"");
        assert!(matches!(result, Err(PayloadError::ConfigParse(_))));
    }

    #[test]
    fn out_of_range_toml_is_a_config_error() {
        let result = FlightConfig::from_toml("[state_machine]\nmax_free_fall_seconds = -1.0");
        assert!(matches!(
            result,
            Err(PayloadError::Config(ConfigError::NotPositive { .. }))
        ));
    }
}
