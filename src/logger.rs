//! This module logs every sample and what we made of it to a csv file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fixed_deque::Deque;
use serde::Serialize;

use crate::config::LoggingConfig;
use crate::data_processor::ProcessorDataPacket;
use crate::error::PayloadError;
use crate::imu::SensorSample;

/// One csv row. The sample columns keep their field names so a log can be replayed.
#[derive(Clone, Debug, Serialize)]
struct LogRow {
    state: char,
    received_message: String,
    timestamp: u64,
    voltage_pi: Option<f64>,
    voltage_tx: Option<f64>,
    temperature: Option<f64>,
    pressure: Option<f64>,
    pressure_altitude: Option<f64>,
    accel_x: Option<f64>,
    accel_y: Option<f64>,
    accel_z: Option<f64>,
    gyro_x: Option<f64>,
    gyro_y: Option<f64>,
    gyro_z: Option<f64>,
    mag_x: Option<f64>,
    mag_y: Option<f64>,
    mag_z: Option<f64>,
    quat_w: Option<f64>,
    quat_x: Option<f64>,
    quat_y: Option<f64>,
    quat_z: Option<f64>,
    gps_latitude: Option<f64>,
    gps_longitude: Option<f64>,
    gps_altitude: Option<f64>,
    current_altitude: f64,
    vertical_velocity: f64,
    velocity_from_acceleration: f64,
    vertical_acceleration: f64,
    time_since_last_data_packet: f64,
    maximum_altitude: f64,
    maximum_velocity: f64,
    maximum_velocity_from_acceleration: f64,
    roll: Option<f64>,
    pitch: Option<f64>,
    yaw: Option<f64>,
    landing_velocity: f64,
    crew_survivability: f64,
}

impl LogRow {
    fn new(state: char, received_message: &str, s: &SensorSample, p: &ProcessorDataPacket) -> Self {
        LogRow {
            state,
            received_message: received_message.to_string(),
            timestamp: s.timestamp,
            voltage_pi: s.voltage_pi,
            voltage_tx: s.voltage_tx,
            temperature: s.temperature,
            pressure: s.pressure,
            pressure_altitude: s.pressure_altitude,
            accel_x: s.accel_x,
            accel_y: s.accel_y,
            accel_z: s.accel_z,
            gyro_x: s.gyro_x,
            gyro_y: s.gyro_y,
            gyro_z: s.gyro_z,
            mag_x: s.mag_x,
            mag_y: s.mag_y,
            mag_z: s.mag_z,
            quat_w: s.quat_w,
            quat_x: s.quat_x,
            quat_y: s.quat_y,
            quat_z: s.quat_z,
            gps_latitude: s.gps_latitude,
            gps_longitude: s.gps_longitude,
            gps_altitude: s.gps_altitude,
            current_altitude: p.current_altitude,
            vertical_velocity: p.vertical_velocity,
            velocity_from_acceleration: p.velocity_from_acceleration,
            vertical_acceleration: p.vertical_acceleration,
            time_since_last_data_packet: p.time_since_last_data_packet,
            maximum_altitude: p.maximum_altitude,
            maximum_velocity: p.maximum_velocity,
            maximum_velocity_from_acceleration: p.maximum_velocity_from_acceleration,
            roll: p.orientation.map(|o| o.roll),
            pitch: p.orientation.map(|o| o.pitch),
            yaw: p.orientation.map(|o| o.yaw),
            landing_velocity: p.landing_velocity,
            crew_survivability: p.crew_survivability,
        }
    }
}

pub struct Logger {
    path: Option<PathBuf>,
    writer: csv::Writer<Box<dyn Write + Send>>,
    idle_log_capacity: usize,
    idle_rows_logged: usize,
    // Idle rows past the capacity. Only the most recent ones are kept.
    idle_buffer: Deque<LogRow>,
    last_state: Option<char>,
}

/// Standby and Landed can last hours, so their rows are throttled.
fn is_idle_state(state: char) -> bool {
    matches!(state, 'S' | 'L')
}

impl Logger {
    /// Creates `<dir>/<YYYY-MM-DD_HH-MM-SS>.csv`, creating the directory if needed.
    pub fn create(dir: &Path, config: &LoggingConfig) -> Result<Self, PayloadError> {
        fs::create_dir_all(dir)?;
        // File name is the date and time in the format YYYY-MM-DD_HH-MM-SS.csv (UTC)
        let path = dir.join(format!(
            "{}.csv",
            chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S")
        ));
        let file = File::create(&path)?;
        let mut logger = Self::from_writer(Box::new(file), config);
        logger.path = Some(path);
        Ok(logger)
    }

    /// A logger writing to anything, e.g. `std::io::sink()` when no log is wanted.
    pub fn from_writer(writer: Box<dyn Write + Send>, config: &LoggingConfig) -> Self {
        Logger {
            path: None,
            writer: csv::Writer::from_writer(writer),
            idle_log_capacity: config.idle_log_capacity,
            idle_rows_logged: 0,
            idle_buffer: Deque::new(config.log_buffer_size),
            last_state: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log_packets(
        &mut self,
        state: char,
        received_message: &str,
        sample: &SensorSample,
        processor_data_packet: &ProcessorDataPacket,
    ) -> Result<(), PayloadError> {
        if self.last_state != Some(state) {
            // The rows right before a phase change are the interesting ones, write them out.
            self.flush_idle_buffer()?;
            self.idle_rows_logged = 0;
            self.last_state = Some(state);
        }

        let row = LogRow::new(state, received_message, sample, processor_data_packet);
        if !is_idle_state(state) {
            self.writer.serialize(&row)?;
        } else if self.idle_rows_logged < self.idle_log_capacity {
            self.writer.serialize(&row)?;
            self.idle_rows_logged += 1;
        } else {
            self.idle_buffer.push_back(row);
        }
        Ok(())
    }

    fn flush_idle_buffer(&mut self) -> Result<(), PayloadError> {
        for row in self.idle_buffer.iter() {
            self.writer.serialize(row)?;
        }
        self.idle_buffer.clear();
        Ok(())
    }

    /// Writes out any buffered rows and flushes the file.
    pub fn flush(&mut self) -> Result<(), PayloadError> {
        self.flush_idle_buffer()?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlightConfig;
    use crate::data_processor::DataProcessor;

    fn sample(timestamp: u64) -> SensorSample {
        SensorSample {
            timestamp,
            pressure_altitude: Some(100.0),
            temperature: Some(21.5),
            ..Default::default()
        }
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(path).expect("log file should exist");
        reader.records().collect::<Result<_, _>>().expect("valid csv")
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = Logger::create(dir.path(), &LoggingConfig::default()).unwrap();
        let mut processor = DataProcessor::new(&FlightConfig::default());
        for t in 0..5 {
            processor.update(&sample(t * 10));
            logger.log_packets('S', "", &sample(t * 10), &processor.snapshot()).unwrap();
        }
        logger.flush().unwrap();
        let path = logger.path().unwrap().to_path_buf();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "state");
        assert!(headers.iter().any(|h| h == "crew_survivability"));

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[4][0], "S");
        assert_eq!(&rows[4][2], "40");
        // Missing readings stay empty, never zero.
        assert_eq!(&rows[0][3], "");
    }

    #[test]
    fn idle_rows_are_capped_and_flushed_on_launch() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            idle_log_capacity: 3,
            log_buffer_size: 2,
        };
        let mut logger = Logger::create(dir.path(), &config).unwrap();
        let processor = DataProcessor::new(&FlightConfig::default());
        let snapshot = processor.snapshot();

        for t in 0..10 {
            logger.log_packets('S', "", &sample(t), &snapshot).unwrap();
        }
        logger.log_packets('M', "", &sample(10), &snapshot).unwrap();
        logger.flush().unwrap();

        let rows = read_rows(logger.path().unwrap());
        let timestamps: Vec<&str> = rows.iter().map(|r| &r[2]).collect();
        assert_eq!(timestamps, vec!["0", "1", "2", "8", "9", "10"]);
    }

    #[test]
    fn log_replays_as_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = Logger::create(dir.path(), &LoggingConfig::default()).unwrap();
        let processor = DataProcessor::new(&FlightConfig::default());
        logger.log_packets('S', "", &sample(7), &processor.snapshot()).unwrap();
        logger.flush().unwrap();

        let mut reader = csv::Reader::from_path(logger.path().unwrap()).unwrap();
        let replayed: Vec<SensorSample> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(replayed, vec![sample(7)]);
    }
}
