//! Constants used throughout the program. These are the defaults of
//! [`crate::config::FlightConfig`].

// ----------------- Standby to MotorBurn ----------------

/// Height above the pad the rocket must reach before we consider it to have taken off:
pub const TAKEOFF_HEIGHT_METERS: f64 = 10.0;
/// Velocity above which the rocket is considered to be in powered flight:
pub const TAKEOFF_VELOCITY_METERS_PER_SECOND: f64 = 10.0;

// ---------------- MotorBurn to Coast ----------------

/// Slightly longer than the actual burn time of the motor (2.2 s).
pub const MOTOR_BURN_TIME_SECONDS: f64 = 2.6;
/// Velocity % below which the rocket is considered to be in coast:
pub const MAX_VELOCITY_THRESHOLD: f64 = 0.96;

// ----------------- Coast to FreeFall -----------------

/// Altitude % below which the rocket is considered to be in free fall:
pub const MAX_ALTITUDE_THRESHOLD: f64 = 0.9;

// ----------------- FreeFall to Landed -----------------

/// Altitude below which the rocket is considered to have landed from free fall:
pub const GROUND_ALTITUDE_METERS: f64 = 15.0;
/// Seconds spent under the ground altitude before we consider the rocket landed:
pub const SECONDS_TO_CONSIDERED_LANDED: f64 = 10.0;
/// Maximum time we can be in free fall. Covers the main parachute deploying at apogee.
pub const MAX_FREE_FALL_SECONDS: f64 = 300.0;

// ----------------- Data processing -----------------

pub const VELOCITY_FROM_ALTITUDE_WINDOW_SIZE: usize = 20;
pub const ALTITUDE_DEADBAND_METERS: f64 = 0.05;
/// Stationary IMU noise below this is not integrated into velocity.
pub const ACCEL_DEADBAND_METERS_PER_SECOND_SQUARED: f64 = 0.35;
pub const GRAVITY_METERS_PER_SECOND_SQUARED: f64 = 9.798;

/// Magnetic dip angle at the launch site, used as the magnetometer reference.
pub const MAGNETIC_DIP_DEGREES: f64 = 62.0;
pub const ACCELEROMETER_WEIGHT: f64 = 3.0;
pub const MAGNETOMETER_WEIGHT: f64 = 1.0;

// ----------------- Crew survivability -----------------

pub const SURVIVABILITY_ACCEL_WEIGHT: f64 = 0.1;
pub const SURVIVABILITY_GYRO_WEIGHT: f64 = 0.5;
pub const SURVIVABILITY_PITCH_WEIGHT: f64 = 1.0;
pub const SURVIVABILITY_INTENSITY_SCALE: f64 = 10.0;
pub const SURVIVABILITY_INTENSITY_THRESHOLD: f64 = 0.5;
/// Caps a single tick's decay at 50%.
pub const SURVIVABILITY_MAX_INTENSITY: f64 = 50.0;
/// Landing faster than this (downwards is negative) costs the crew:
pub const LANDING_VELOCITY_THRESHOLD_METERS_PER_SECOND: f64 = -8.0;
pub const LANDING_PENALTY_FACTOR: f64 = 0.5;

// ----------------- Radio -----------------

pub const TRANSMIT_MESSAGE: &str = "TRANSMIT";
pub const STOP_MESSAGE: &str = "STOP";
pub const NO_MESSAGE: &str = "";

pub const NUMBER_OF_TRANSMISSIONS: u32 = 5;
pub const TRANSMISSION_INTERVAL_SECONDS: f64 = 15.0;

pub const IMU_SERIAL_PORT: &str = "/dev/ttyUSB0";
pub const IMU_BAUD_RATE: u32 = 115_200;
pub const TRANSMITTER_SERIAL_PORT: &str = "/dev/ttyS0";
pub const TRANSMITTER_BAUD_RATE: u32 = 9600;
pub const RECEIVER_SERIAL_PORT: &str = "/dev/ttyAMA1";
pub const RECEIVER_BAUD_RATE: u32 = 9600;

/// Bounded hand-off between the serial reader thread and the flight loop.
pub const MAX_QUEUE_SIZE: usize = 100_000;

// ----------------- Logging -----------------

pub const LOGS_PATH: &str = "logs";
/// Rows logged in a row while in Standby or Landed before we start buffering.
pub const IDLE_LOG_CAPACITY: usize = 5000;
/// Rows kept once the idle capacity is reached, flushed on the next state change.
pub const LOG_BUFFER_SIZE: usize = 5000;
