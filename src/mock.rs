//! Stand-ins for the hardware, so whole flights can be replayed from a log on any machine.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::info;

use crate::camera::Camera;
use crate::constants::NO_MESSAGE;
use crate::error::PayloadError;
use crate::imu::{SampleSource, SensorSample};
use crate::receiver::Receiver;
use crate::transmitter::{Transmitter, TransmitterDataPacket};

/// Replays samples from a csv log (any file whose columns are named like the sample fields,
/// including our own flight logs).
pub struct MockImu {
    log_file_path: Option<PathBuf>,
    real_time_replay: bool,
    samples: VecDeque<SensorSample>,
    replay_start: Option<(Instant, u64)>,
    running: bool,
}

impl MockImu {
    pub fn new(log_file_path: &Path, real_time_replay: bool) -> Self {
        MockImu {
            log_file_path: Some(log_file_path.to_path_buf()),
            real_time_replay,
            samples: VecDeque::new(),
            replay_start: None,
            running: false,
        }
    }

    /// Replays the given samples as fast as they're fetched.
    pub fn from_samples(samples: impl IntoIterator<Item = SensorSample>) -> Self {
        MockImu {
            log_file_path: None,
            real_time_replay: false,
            samples: samples.into_iter().collect(),
            replay_start: None,
            running: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }

    fn read_log(path: &Path) -> Result<VecDeque<SensorSample>, PayloadError> {
        let mut reader = csv::Reader::from_path(path)?;
        let samples = reader
            .deserialize()
            .map(|row| row.map(SensorSample::sanitize))
            .collect::<Result<VecDeque<SensorSample>, _>>()?;
        Ok(samples)
    }

    /// With real time replay, a sample is only due once as much time has passed since the
    /// first one as its timestamp says.
    fn next_is_due(&mut self) -> bool {
        let Some(next) = self.samples.front() else {
            return false;
        };
        if !self.real_time_replay {
            return true;
        }
        let (started, first_timestamp) = *self
            .replay_start
            .get_or_insert_with(|| (Instant::now(), next.timestamp));
        let offset = Duration::from_millis(next.timestamp.saturating_sub(first_timestamp));
        started.elapsed() >= offset
    }
}

impl SampleSource for MockImu {
    fn start(&mut self) -> Result<(), PayloadError> {
        if let Some(path) = &self.log_file_path {
            self.samples = Self::read_log(path)?;
            info!("Replaying {} samples from {}", self.samples.len(), path.display());
        }
        self.replay_start = None;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn fetch(&mut self) -> Option<SensorSample> {
        if !self.running {
            return None;
        }
        if self.samples.is_empty() {
            self.running = false;
            return None;
        }
        if !self.next_is_due() {
            return None;
        }
        let sample = self.samples.pop_front();
        if self.samples.is_empty() {
            info!("Replay finished");
            self.running = false;
        }
        sample
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Pretends the ground station sent `message` once `initial_delay` has passed.
pub struct MockReceiver {
    message: String,
    initial_delay: Duration,
    started: Option<Instant>,
}

impl MockReceiver {
    pub fn new(message: &str, initial_delay: Duration) -> Self {
        MockReceiver {
            message: message.to_string(),
            initial_delay,
            started: None,
        }
    }
}

impl Receiver for MockReceiver {
    fn start(&mut self) -> Result<(), PayloadError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn latest_message(&self) -> String {
        match self.started {
            Some(started) if started.elapsed() >= self.initial_delay => self.message.clone(),
            _ => NO_MESSAGE.to_string(),
        }
    }
}

/// Writes every packet it's asked to send to a text file instead of the radio.
pub struct MockTransmitter {
    message_file_path: PathBuf,
    file: Option<File>,
}

impl MockTransmitter {
    pub fn new(message_file_path: &Path) -> Self {
        MockTransmitter {
            message_file_path: message_file_path.to_path_buf(),
            file: None,
        }
    }
}

impl Transmitter for MockTransmitter {
    fn start(&mut self) -> Result<(), PayloadError> {
        // Truncates whatever the last run sent.
        self.file = Some(File::create(&self.message_file_path)?);
        Ok(())
    }

    fn stop(&mut self) {
        self.file = None;
    }

    fn send(&mut self, data_packet: &TransmitterDataPacket) -> Result<(), PayloadError> {
        let file = self.file.as_mut().ok_or_else(|| PayloadError::Hook {
            hook: "transmitter",
            reason: "mock transmitter was not started".to_string(),
        })?;
        writeln!(file, "{}", data_packet.compress_packet())?;
        file.flush()?;
        Ok(())
    }
}

/// A camera that only says what it would have done.
#[derive(Default)]
pub struct MockCamera {
    recording: bool,
}

impl MockCamera {
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl Camera for MockCamera {
    fn start_recording(&mut self) -> Result<(), PayloadError> {
        if !self.recording {
            info!("Mock camera: recording started");
            self.recording = true;
        }
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), PayloadError> {
        if self.recording {
            info!("Mock camera: recording stopped");
            self.recording = false;
        }
        Ok(())
    }
}
