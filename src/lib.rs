//! Flight computer for a rocket payload: estimates the flight from the payload's sensors, tracks
//! which phase of the flight we're in and reports home once landed.

pub mod camera;
pub mod config;
pub mod constants;
pub mod context;
pub mod data_processor;
pub mod error;
pub mod imu;
pub mod logger;
pub mod mock;
pub mod orientation;
pub mod receiver;
pub mod state;
pub mod survivability;
pub mod transmitter;
