use thiserror::Error;

/// Errors raised by the collaborators around the flight core.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("{hook} failed: {reason}")]
    Hook { hook: &'static str, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("`{field}` must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("`{field}` must be a fraction in (0, 1], got {value}")]
    NotAFraction { field: &'static str, value: f64 },
    #[error("`{field}` must lie in {min}..{max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("velocity window must hold at least 2 samples, got {0}")]
    WindowTooSmall(usize),
}
