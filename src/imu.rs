//! The sensor sample the flight loop consumes and the sources that produce it.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_QUEUE_SIZE;
use crate::error::PayloadError;

/// One reading from the payload sensors. Every field but the timestamp may be missing for a
/// cycle; a missing field means "no reading", never zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSample {
    /// Milliseconds since boot.
    pub timestamp: u64,
    pub voltage_pi: Option<f64>,
    pub voltage_tx: Option<f64>,
    pub temperature: Option<f64>, // Celsius
    pub pressure: Option<f64>,
    pub pressure_altitude: Option<f64>,
    // Compensated acceleration in m/s^2, gravity included.
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    // rad/s
    pub gyro_x: Option<f64>,
    pub gyro_y: Option<f64>,
    pub gyro_z: Option<f64>,
    pub mag_x: Option<f64>,
    pub mag_y: Option<f64>,
    pub mag_z: Option<f64>,
    pub quat_w: Option<f64>,
    pub quat_x: Option<f64>,
    pub quat_y: Option<f64>,
    pub quat_z: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
}

impl SensorSample {
    pub fn acceleration(&self) -> Option<Vector3<f64>> {
        Some(Vector3::new(self.accel_x?, self.accel_y?, self.accel_z?))
    }

    pub fn angular_rate(&self) -> Option<Vector3<f64>> {
        Some(Vector3::new(self.gyro_x?, self.gyro_y?, self.gyro_z?))
    }

    pub fn magnetic_field(&self) -> Option<Vector3<f64>> {
        Some(Vector3::new(self.mag_x?, self.mag_y?, self.mag_z?))
    }

    /// The IMU's own orientation estimate, not normalized.
    pub fn quaternion(&self) -> Option<Quaternion<f64>> {
        Some(Quaternion::new(
            self.quat_w?,
            self.quat_x?,
            self.quat_y?,
            self.quat_z?,
        ))
    }

    /// Drops non-finite readings (NaN, inf), which mean "no reading" just like an empty
    /// field.
    pub fn sanitize(self) -> SensorSample {
        let finite = |value: Option<f64>| value.filter(|v| v.is_finite());
        SensorSample {
            timestamp: self.timestamp,
            voltage_pi: finite(self.voltage_pi),
            voltage_tx: finite(self.voltage_tx),
            temperature: finite(self.temperature),
            pressure: finite(self.pressure),
            pressure_altitude: finite(self.pressure_altitude),
            accel_x: finite(self.accel_x),
            accel_y: finite(self.accel_y),
            accel_z: finite(self.accel_z),
            gyro_x: finite(self.gyro_x),
            gyro_y: finite(self.gyro_y),
            gyro_z: finite(self.gyro_z),
            mag_x: finite(self.mag_x),
            mag_y: finite(self.mag_y),
            mag_z: finite(self.mag_z),
            quat_w: finite(self.quat_w),
            quat_x: finite(self.quat_x),
            quat_y: finite(self.quat_y),
            quat_z: finite(self.quat_z),
            gps_latitude: finite(self.gps_latitude),
            gps_longitude: finite(self.gps_longitude),
            gps_altitude: finite(self.gps_altitude),
        }
    }

    /// Holds the last known GPS fix, battery voltages, temperature and pressure when this
    /// sample has no fresh reading for them. Motion fields are never filled in.
    pub fn carry_forward(&self, previous: &SensorSample) -> SensorSample {
        SensorSample {
            voltage_pi: self.voltage_pi.or(previous.voltage_pi),
            voltage_tx: self.voltage_tx.or(previous.voltage_tx),
            temperature: self.temperature.or(previous.temperature),
            pressure: self.pressure.or(previous.pressure),
            gps_latitude: self.gps_latitude.or(previous.gps_latitude),
            gps_longitude: self.gps_longitude.or(previous.gps_longitude),
            gps_altitude: self.gps_altitude.or(previous.gps_altitude),
            ..self.clone()
        }
    }
}

/// Anything that hands the flight loop sensor samples: the real IMU or a replay.
pub trait SampleSource {
    fn start(&mut self) -> Result<(), PayloadError>;
    fn stop(&mut self);
    /// Returns the next sample if one has arrived. Never blocks.
    fn fetch(&mut self) -> Option<SensorSample>;
    fn is_running(&self) -> bool;
}

pub const PACKET_START_MARKER: [u8; 4] = [0xFF, 0xFE, 0xFD, 0xFC];
pub const PACKET_FIELD_COUNT: usize = 22;
pub const PACKET_BYTE_SIZE: usize = PACKET_FIELD_COUNT * 4;

/// Splits the microcontroller's byte stream into samples. Each packet is the start marker
/// followed by [`PACKET_FIELD_COUNT`] little-endian `f32`s; NaN marks a missing reading.
#[derive(Default)]
pub struct PacketFramer {
    buffer: Vec<u8>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds newly read bytes and returns every complete packet found so far.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SensorSample> {
        self.buffer.extend_from_slice(bytes);
        let mut samples = Vec::new();

        loop {
            let Some(marker_idx) = self
                .buffer
                .windows(PACKET_START_MARKER.len())
                .position(|window| window == PACKET_START_MARKER)
            else {
                // A marker may be split across reads, keep its possible prefix.
                let keep = self.buffer.len().min(PACKET_START_MARKER.len() - 1);
                let drop = self.buffer.len() - keep;
                self.buffer.drain(..drop);
                break;
            };

            let packet_start = marker_idx + PACKET_START_MARKER.len();
            if self.buffer.len() < packet_start + PACKET_BYTE_SIZE {
                self.buffer.drain(..marker_idx);
                break;
            }

            samples.push(decode_packet(
                &self.buffer[packet_start..packet_start + PACKET_BYTE_SIZE],
            ));
            self.buffer.drain(..packet_start + PACKET_BYTE_SIZE);
        }

        samples
    }
}

/// Field order: timestamp, voltage_pi, voltage_tx, temperature, pressure, pressure_altitude,
/// accel xyz, gyro xyz, mag xyz, quat wxyz, gps lat/lon/alt.
pub fn decode_packet(bytes: &[u8]) -> SensorSample {
    let mut fields = [f32::NAN; PACKET_FIELD_COUNT];
    for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(4)) {
        *field = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let value = |i: usize| {
        let v = fields[i];
        v.is_finite().then_some(v as f64)
    };

    SensorSample {
        timestamp: value(0).filter(|t| *t >= 0.0).map_or(0, |t| t as u64),
        voltage_pi: value(1),
        voltage_tx: value(2),
        temperature: value(3),
        pressure: value(4),
        pressure_altitude: value(5),
        accel_x: value(6),
        accel_y: value(7),
        accel_z: value(8),
        gyro_x: value(9),
        gyro_y: value(10),
        gyro_z: value(11),
        mag_x: value(12),
        mag_y: value(13),
        mag_z: value(14),
        quat_w: value(15),
        quat_x: value(16),
        quat_y: value(17),
        quat_z: value(18),
        gps_latitude: value(19),
        gps_longitude: value(20),
        gps_altitude: value(21),
    }
}

/// The microcontroller that streams IMU, barometer and GPS packets over serial.
pub struct SerialImu {
    path: String,
    baud_rate: u32,
    running: Arc<AtomicBool>,
    packets: Option<mpsc::Receiver<SensorSample>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl SerialImu {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        SerialImu {
            path: path.to_string(),
            baud_rate,
            running: Arc::new(AtomicBool::new(false)),
            packets: None,
            reader_thread: None,
        }
    }
}

impl SampleSource for SerialImu {
    fn start(&mut self) -> Result<(), PayloadError> {
        let mut port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;
        info!("IMU serial port {} opened", self.path);

        let (sender, receiver) = mpsc::sync_channel(MAX_QUEUE_SIZE);
        self.packets = Some(receiver);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        self.reader_thread = Some(thread::spawn(move || {
            let mut framer = PacketFramer::new();
            let mut buffer = [0u8; 1024];
            while running.load(Ordering::SeqCst) {
                match port.read(&mut buffer) {
                    Ok(0) => continue,
                    Ok(n) => {
                        for sample in framer.push(&buffer[..n]) {
                            match sender.try_send(sample) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    warn!("IMU queue full, dropping packet")
                                }
                                Err(TrySendError::Disconnected(_)) => return,
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        error!("Failed to read from IMU serial port: {}", e);
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            if handle.join().is_err() {
                error!("IMU reader thread panicked");
            }
        }
    }

    fn fetch(&mut self) -> Option<SensorSample> {
        self.packets.as_ref()?.try_recv().ok()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
