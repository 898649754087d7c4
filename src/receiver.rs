//! Messages from the ground station.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::constants::{NO_MESSAGE, STOP_MESSAGE, TRANSMIT_MESSAGE};
use crate::error::PayloadError;

/// A message the flight loop acts on. Anything else the ground station sends is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Transmit,
    Stop,
}

impl RemoteCommand {
    pub fn parse(message: &str) -> Option<Self> {
        match message.trim() {
            TRANSMIT_MESSAGE => Some(RemoteCommand::Transmit),
            STOP_MESSAGE => Some(RemoteCommand::Stop),
            _ => None,
        }
    }
}

pub trait Receiver {
    fn start(&mut self) -> Result<(), PayloadError>;
    fn stop(&mut self);
    /// The last line received, or an empty string if nothing arrived yet.
    fn latest_message(&self) -> String;
}

/// Keeps only complete, non-empty lines from the bytes read so far.
#[derive(Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut latest = None;
        while let Some(newline) = self.pending.find('\n') {
            let line = self.pending[..newline].trim().to_string();
            self.pending.drain(..=newline);
            if !line.is_empty() {
                latest = Some(line);
            }
        }
        latest
    }
}

/// Listens on a serial radio in the background.
pub struct SerialReceiver {
    path: String,
    baud_rate: u32,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<String>>,
    listen_thread: Option<JoinHandle<()>>,
}

impl SerialReceiver {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        SerialReceiver {
            path: path.to_string(),
            baud_rate,
            running: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(Mutex::new(NO_MESSAGE.to_string())),
            listen_thread: None,
        }
    }
}

impl Receiver for SerialReceiver {
    fn start(&mut self) -> Result<(), PayloadError> {
        let mut port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(Duration::from_millis(200))
            .open()?;
        info!("Receiver serial port {} opened", self.path);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let latest = Arc::clone(&self.latest);
        self.listen_thread = Some(thread::spawn(move || {
            let mut lines = LineBuffer::default();
            let mut buffer = [0u8; 256];
            while running.load(Ordering::SeqCst) {
                match port.read(&mut buffer) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if let Some(line) = lines.push(&buffer[..n]) {
                            debug!("Received message: {}", line);
                            if let Ok(mut latest) = latest.lock() {
                                *latest = line;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        error!("Failed to read from receiver serial port: {}", e);
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
        if let Some(handle) = self.listen_thread.take() {
            if handle.join().is_err() {
                error!("Receiver thread panicked");
            }
        }
    }

    fn latest_message(&self) -> String {
        self.latest
            .lock()
            .map(|message| message.clone())
            .unwrap_or_default()
    }
}
