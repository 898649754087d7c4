use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::{
    camera::Camera,
    config::{FlightConfig, TransmissionConfig},
    data_processor::{DataProcessor, ProcessorDataPacket},
    error::PayloadError,
    imu::{SampleSource, SensorSample},
    logger::Logger,
    receiver::{Receiver, RemoteCommand},
    state::RocketState,
    transmitter::{Transmitter, TransmitterDataPacket},
};

/// Repeats the landed packet a few times, spaced out in sample time.
#[derive(Debug, Default)]
struct Beacon {
    enabled: bool,
    transmissions_sent: u32,
    last_transmission: Option<u64>,
}

impl Beacon {
    fn arm(&mut self) {
        self.enabled = true;
        self.transmissions_sent = 0;
        self.last_transmission = None;
    }

    fn record(&mut self, timestamp: u64) {
        self.transmissions_sent += 1;
        self.last_transmission = Some(timestamp);
    }

    fn is_due(&self, timestamp: u64, config: &TransmissionConfig) -> bool {
        if !self.enabled || self.transmissions_sent >= config.number_of_transmissions {
            return false;
        }
        match self.last_transmission {
            Some(last) => {
                let elapsed = timestamp.saturating_sub(last) as f64 / 1000.0;
                elapsed >= config.transmission_interval_seconds
            }
            None => true,
        }
    }
}

/// Owns everything on the payload and runs one step of the flight per sample.
pub struct Context {
    config: FlightConfig,
    pub state: RocketState,
    pub data_processor: DataProcessor,
    imu: Box<dyn SampleSource>,
    camera: Box<dyn Camera>,
    transmitter: Option<Box<dyn Transmitter>>,
    receiver: Box<dyn Receiver>,
    logger: Logger,
    imu_data_packet: Option<SensorSample>,
    processor_data_packet: ProcessorDataPacket,
    received_message: String,
    transmitting_latch: bool,
    stop_latch: bool,
    beacon: Beacon,
    landing_time: String,
    shutdown: Arc<AtomicBool>,
    stopped: bool,
}

impl Context {
    pub fn new(
        config: FlightConfig,
        imu: Box<dyn SampleSource>,
        camera: Box<dyn Camera>,
        transmitter: Option<Box<dyn Transmitter>>,
        receiver: Box<dyn Receiver>,
        logger: Logger,
    ) -> Self {
        let data_processor = DataProcessor::new(&config);
        let processor_data_packet = data_processor.snapshot();
        Context {
            config,
            state: RocketState::standby(0),
            data_processor,
            imu,
            camera,
            transmitter,
            receiver,
            logger,
            imu_data_packet: None,
            processor_data_packet,
            received_message: String::new(),
            transmitting_latch: false,
            stop_latch: false,
            beacon: Beacon::default(),
            landing_time: String::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            stopped: false,
        }
    }

    /// Starts every collaborator. Only a sample source that fails to start is fatal, without
    /// the radio or receiver we can still fly and log.
    pub fn start(&mut self) -> Result<(), PayloadError> {
        self.imu.start()?;
        let transmitter_error = match &mut self.transmitter {
            Some(transmitter) => transmitter.start().err(),
            None => None,
        };
        if let Some(e) = transmitter_error {
            error!("Could not start the transmitter, flying without it: {}", e);
            self.transmitter = None;
        }
        if let Err(e) = self.receiver.start() {
            warn!("Could not start the receiver: {}", e);
        }
        info!("Payload started in {}", self.state.name());
        Ok(())
    }

    /// Stops everything. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.imu.stop();
        if let Err(e) = self.camera.stop_recording() {
            warn!("Could not stop the camera: {}", e);
        }
        if let Some(transmitter) = &mut self.transmitter {
            transmitter.stop();
        }
        self.receiver.stop();
        if let Err(e) = self.logger.flush() {
            error!("Could not flush the flight log: {}", e);
        }
        self.stopped = true;
        self.shutdown.store(true, Ordering::SeqCst);
        info!("Stopped everything");
    }

    /// Runs the flight until shutdown is requested or the sample source runs dry.
    pub fn run(&mut self) {
        while !self.shutdown_requested() {
            if !self.update() {
                if !self.imu.is_running() {
                    break;
                }
                // Nothing new from the IMU yet
                thread::sleep(Duration::from_millis(1));
            }
        }
        info!("Flight loop finished in {}", self.state.name());
    }

    /// Runs one step of the flight. Returns false, changing nothing, when no sample arrived.
    pub fn update(&mut self) -> bool {
        let Some(sample) = self.imu.fetch() else {
            return false;
        };
        let sample = sample.sanitize();
        let sample = match &self.imu_data_packet {
            Some(previous) => sample.carry_forward(previous),
            None => {
                // Standby starts with the first sample, not at boot.
                if let RocketState::Standby(_) = self.state {
                    self.state = RocketState::standby(sample.timestamp);
                }
                sample
            }
        };

        self.data_processor.update(&sample);
        self.processor_data_packet = self.data_processor.snapshot();
        self.imu_data_packet = Some(sample.clone());
        let timestamp = self.processor_data_packet.timestamp;

        // Check if we have a message from the ground station
        self.received_message = self.receiver.latest_message();
        let message = self.received_message.clone();
        self.remote_override(&message, timestamp);

        self.state
            .update_internal(&self.processor_data_packet, &self.config.state_machine);
        if let Some(new_state) = self
            .state
            .should_transition(&self.processor_data_packet, &self.config.state_machine)
        {
            self.transition_to(new_state);
        }

        if self.beacon.is_due(timestamp, &self.config.transmission) {
            self.transmit_data(timestamp);
        }

        if let Err(e) = self.logger.log_packets(
            self.state.letter(),
            &self.received_message,
            &sample,
            &self.processor_data_packet,
        ) {
            warn!("Failed to write to the flight log: {}", e);
        }
        true
    }

    /// Acts on a message from the ground station. Each command latches until the other one
    /// arrives, so a message that keeps being received only counts once.
    pub fn remote_override(&mut self, message: &str, timestamp: u64) {
        match RemoteCommand::parse(message) {
            Some(RemoteCommand::Transmit) if !self.transmitting_latch => {
                self.transmitting_latch = true;
                self.stop_latch = false;
                info!("Ground station requested a transmission");
                if self.state.is_landed() {
                    self.beacon.arm();
                    self.transmit_data(timestamp);
                } else {
                    self.transition_to(RocketState::landed(timestamp));
                }
            }
            Some(RemoteCommand::Stop) if !self.stop_latch => {
                self.stop_latch = true;
                self.transmitting_latch = false;
                self.beacon.enabled = false;
                info!("Ground station requested to stop transmitting");
            }
            _ => {}
        }
    }

    fn transition_to(&mut self, new_state: RocketState) {
        info!(
            "State transition: {} -> {} at {} ms (altitude {:.2} m)",
            self.state.name(),
            new_state.name(),
            new_state.start_time(),
            self.processor_data_packet.current_altitude
        );
        self.state = new_state;
        match self.state {
            RocketState::MotorBurn(_) => {
                if let Err(e) = self.camera.start_recording() {
                    warn!("Could not start the camera: {}", e);
                }
            }
            RocketState::Coast(_) => self.data_processor.start_survivability(),
            RocketState::Landed(_) => self.on_landed(),
            RocketState::Standby(_) | RocketState::FreeFall(_) => {}
        }
    }

    fn on_landed(&mut self) {
        let landing_velocity = self.data_processor.calculate_landing_velocity();
        self.data_processor.stop_survivability();
        self.processor_data_packet = self.data_processor.snapshot();
        info!(
            "Landed at {:.2} m/s, crew survivability {:.1}%",
            landing_velocity,
            self.processor_data_packet.crew_survivability * 100.0
        );
        if let Err(e) = self.camera.stop_recording() {
            warn!("Could not stop the camera: {}", e);
        }
        self.landing_time = chrono::Utc::now().format("%H:%M:%S").to_string();
        self.beacon.arm();
        self.transmit_data(self.processor_data_packet.timestamp);
    }

    /// Sends the landed packet to the ground station.
    fn transmit_data(&mut self, timestamp: u64) {
        self.beacon.record(timestamp);
        let (Some(transmitter), Some(sample)) = (self.transmitter.as_mut(), &self.imu_data_packet)
        else {
            return;
        };
        let data_packet = TransmitterDataPacket::new(
            sample,
            &self.processor_data_packet,
            &self.landing_time,
            self.config.state_machine.velocity_source,
        );
        match transmitter.send(&data_packet) {
            Ok(()) => info!("Transmitted: {}", data_packet.compress_packet()),
            Err(e) => error!("Transmission failed: {}", e),
        }
    }

    pub fn processor_data_packet(&self) -> &ProcessorDataPacket {
        &self.processor_data_packet
    }

    pub fn transmissions_sent(&self) -> u32 {
        self.beacon.transmissions_sent
    }

    pub fn log_file_path(&self) -> Option<&Path> {
        self.logger.path()
    }

    pub fn imu_is_running(&self) -> bool {
        self.imu.is_running()
    }

    /// Setting the returned flag asks [`Context::run`] to return after the current step.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
