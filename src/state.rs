use crate::config::StateMachineConfig;
use crate::data_processor::ProcessorDataPacket;

pub trait State {
    /// Used for updating the struct with new data if we have to.
    fn update_internal(
        &mut self,
        processor_data_packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    );
    /// Determines if the state should transition to the next one.
    fn should_transition(
        &self,
        processor_data_packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RocketState {
    Standby(StandbyState),
    MotorBurn(MotorBurnState),
    Coast(CoastState),
    FreeFall(FreeFallState),
    Landed(LandedState),
}

// Every state remembers the sample timestamp (ms) it was entered at.

#[derive(Debug, Clone, PartialEq)]
pub struct StandbyState {
    start_time: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorBurnState {
    start_time: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoastState {
    start_time: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreeFallState {
    start_time: u64,
    /// When we first saw ourselves at ground altitude, if we still are.
    landing_timer: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandedState {
    start_time: u64,
}

/// Seconds between two sample timestamps, zero if time went backwards.
fn seconds_since(start_time: u64, timestamp: u64) -> f64 {
    timestamp.saturating_sub(start_time) as f64 / 1000.0
}

impl RocketState {
    pub fn standby(timestamp: u64) -> Self {
        RocketState::Standby(StandbyState {
            start_time: timestamp,
        })
    }

    pub fn landed(timestamp: u64) -> Self {
        RocketState::Landed(LandedState {
            start_time: timestamp,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RocketState::Standby(_) => "Standby",
            RocketState::MotorBurn(_) => "MotorBurn",
            RocketState::Coast(_) => "Coast",
            RocketState::FreeFall(_) => "FreeFall",
            RocketState::Landed(_) => "Landed",
        }
    }

    /// Single character used in the flight log.
    pub fn letter(&self) -> char {
        match self {
            RocketState::Standby(_) => 'S',
            RocketState::MotorBurn(_) => 'M',
            RocketState::Coast(_) => 'O',
            RocketState::FreeFall(_) => 'F',
            RocketState::Landed(_) => 'L',
        }
    }

    /// Position in the flight, phases only ever move to a higher ordinal.
    pub fn ordinal(&self) -> u8 {
        match self {
            RocketState::Standby(_) => 0,
            RocketState::MotorBurn(_) => 1,
            RocketState::Coast(_) => 2,
            RocketState::FreeFall(_) => 3,
            RocketState::Landed(_) => 4,
        }
    }

    pub fn start_time(&self) -> u64 {
        match self {
            RocketState::Standby(state) => state.start_time,
            RocketState::MotorBurn(state) => state.start_time,
            RocketState::Coast(state) => state.start_time,
            RocketState::FreeFall(state) => state.start_time,
            RocketState::Landed(state) => state.start_time,
        }
    }

    pub fn is_landed(&self) -> bool {
        matches!(self, RocketState::Landed(_))
    }

    /// The phase that follows this one, entered at `timestamp`. Landed has none.
    pub fn next_state(&self, timestamp: u64) -> Option<RocketState> {
        match self {
            RocketState::Standby(_) => Some(RocketState::MotorBurn(MotorBurnState {
                start_time: timestamp,
            })),
            RocketState::MotorBurn(_) => Some(RocketState::Coast(CoastState {
                start_time: timestamp,
            })),
            RocketState::Coast(_) => Some(RocketState::FreeFall(FreeFallState {
                start_time: timestamp,
                landing_timer: None,
            })),
            RocketState::FreeFall(_) => Some(RocketState::landed(timestamp)),
            RocketState::Landed(_) => None,
        }
    }

    pub fn update_internal(
        &mut self,
        processor_data_packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) {
        match self {
            RocketState::Standby(state) => state.update_internal(processor_data_packet, config),
            RocketState::MotorBurn(state) => state.update_internal(processor_data_packet, config),
            RocketState::Coast(state) => state.update_internal(processor_data_packet, config),
            RocketState::FreeFall(state) => state.update_internal(processor_data_packet, config),
            RocketState::Landed(state) => state.update_internal(processor_data_packet, config),
        }
    }

    pub fn should_transition(
        &self,
        processor_data_packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState> {
        match self {
            RocketState::Standby(state) => state.should_transition(processor_data_packet, config),
            RocketState::MotorBurn(state) => state.should_transition(processor_data_packet, config),
            RocketState::Coast(state) => state.should_transition(processor_data_packet, config),
            RocketState::FreeFall(state) => state.should_transition(processor_data_packet, config),
            RocketState::Landed(state) => state.should_transition(processor_data_packet, config),
        }
    }
}

impl State for StandbyState {
    fn update_internal(&mut self, _: &ProcessorDataPacket, _: &StateMachineConfig) {}
    fn should_transition(
        &self,
        packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState> {
        let velocity = packet.velocity(config.velocity_source);
        if packet.current_altitude > config.takeoff_height_meters
            && velocity > config.takeoff_velocity_meters_per_second
        {
            Some(RocketState::MotorBurn(MotorBurnState {
                start_time: packet.timestamp,
            }))
        } else {
            None
        }
    }
}

impl State for MotorBurnState {
    fn update_internal(&mut self, _: &ProcessorDataPacket, _: &StateMachineConfig) {}
    fn should_transition(
        &self,
        packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState> {
        let burn_time_elapsed =
            seconds_since(self.start_time, packet.timestamp) >= config.motor_burn_time_seconds;
        // Velocity dropping off its peak means the motor burned out.
        let velocity = packet.velocity(config.velocity_source);
        let max_velocity = packet.maximum_velocity_for(config.velocity_source);
        if burn_time_elapsed || velocity < max_velocity * config.max_velocity_threshold {
            Some(RocketState::Coast(CoastState {
                start_time: packet.timestamp,
            }))
        } else {
            None
        }
    }
}

impl State for CoastState {
    fn update_internal(&mut self, _: &ProcessorDataPacket, _: &StateMachineConfig) {}
    fn should_transition(
        &self,
        packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState> {
        if packet.current_altitude <= packet.maximum_altitude * config.max_altitude_threshold {
            Some(RocketState::FreeFall(FreeFallState {
                start_time: packet.timestamp,
                landing_timer: None,
            }))
        } else {
            None
        }
    }
}

impl FreeFallState {
    pub fn landing_timer(&self) -> Option<u64> {
        self.landing_timer
    }
}

impl State for FreeFallState {
    fn update_internal(&mut self, packet: &ProcessorDataPacket, config: &StateMachineConfig) {
        if packet.current_altitude <= config.ground_altitude_meters {
            self.landing_timer.get_or_insert(packet.timestamp);
        } else {
            // A bounce back above the ground altitude restarts the confirmation.
            self.landing_timer = None;
        }
    }

    fn should_transition(
        &self,
        packet: &ProcessorDataPacket,
        config: &StateMachineConfig,
    ) -> Option<RocketState> {
        if seconds_since(self.start_time, packet.timestamp) >= config.max_free_fall_seconds {
            return Some(RocketState::landed(packet.timestamp));
        }
        if let Some(timer) = self.landing_timer {
            if seconds_since(timer, packet.timestamp) >= config.seconds_to_considered_landed {
                return Some(RocketState::landed(packet.timestamp));
            }
        }
        None
    }
}

impl State for LandedState {
    fn update_internal(&mut self, _: &ProcessorDataPacket, _: &StateMachineConfig) {}
    fn should_transition(
        &self,
        _: &ProcessorDataPacket,
        _: &StateMachineConfig,
    ) -> Option<RocketState> {
        None
    }
}
