use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use payload_rocket::camera::RpicamCamera;
use payload_rocket::config::FlightConfig;
use payload_rocket::constants::{
    IMU_BAUD_RATE, IMU_SERIAL_PORT, LOGS_PATH, NO_MESSAGE, RECEIVER_BAUD_RATE, RECEIVER_SERIAL_PORT,
    TRANSMITTER_BAUD_RATE, TRANSMITTER_SERIAL_PORT,
};
use payload_rocket::context::Context;
use payload_rocket::imu::SerialImu;
use payload_rocket::logger::Logger;
use payload_rocket::mock::{MockCamera, MockImu, MockReceiver, MockTransmitter};
use payload_rocket::receiver::SerialReceiver;
use payload_rocket::transmitter::SerialTransmitter;

#[derive(Parser, Debug)]
#[command(name = "payload-rocket")]
#[command(about = "Payload flight computer")]
#[command(version)]
struct Args {
    /// TOML file overriding the default flight parameters
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Fly with the real hardware
    Real,
    /// Replay a flight log with mock hardware
    Mock {
        /// The flight log to replay
        #[arg(short, long)]
        path: PathBuf,

        /// Replay as fast as possible instead of in real time
        #[arg(short, long)]
        fast_replay: bool,

        /// Keep the log file written during the replay
        #[arg(short, long)]
        keep_log_file: bool,

        /// Message the mock ground station sends
        #[arg(long, default_value = NO_MESSAGE)]
        remote_message: String,

        /// Seconds before the mock ground station sends its message
        #[arg(long, default_value_t = 0.0)]
        remote_delay: f64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match &args.config {
        Some(path) => FlightConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FlightConfig::default(),
    };
    let logger = Logger::create(Path::new(LOGS_PATH), &config.logging)
        .context("Failed to create the flight log")?;

    let (mut context, keep_log_file) = match args.mode {
        Mode::Real => {
            let context = Context::new(
                config,
                Box::new(SerialImu::new(IMU_SERIAL_PORT, IMU_BAUD_RATE)),
                Box::new(RpicamCamera::new(Path::new("flight.h264"))),
                Some(Box::new(SerialTransmitter::new(
                    TRANSMITTER_SERIAL_PORT,
                    TRANSMITTER_BAUD_RATE,
                ))),
                Box::new(SerialReceiver::new(RECEIVER_SERIAL_PORT, RECEIVER_BAUD_RATE)),
                logger,
            );
            (context, true)
        }
        Mode::Mock {
            path,
            fast_replay,
            keep_log_file,
            remote_message,
            remote_delay,
        } => {
            let remote_delay = Duration::try_from_secs_f64(remote_delay)
                .context("--remote-delay must be a non-negative number of seconds")?;
            let context = Context::new(
                config,
                Box::new(MockImu::new(&path, !fast_replay)),
                Box::new(MockCamera::default()),
                Some(Box::new(MockTransmitter::new(&Path::new(LOGS_PATH).join("transmitter.txt")))),
                Box::new(MockReceiver::new(&remote_message, remote_delay)),
                logger,
            );
            (context, keep_log_file)
        }
    };

    context.start().context("Failed to start the payload")?;
    watch_for_shutdown(context.shutdown_handle())?;
    context.run();
    context.stop();

    if !keep_log_file {
        remove_log_file(&context);
    }
    Ok(())
}

/// Sets `shutdown` on Ctrl+C or SIGTERM so the flight loop returns and the log gets flushed.
fn watch_for_shutdown(shutdown: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("Failed to build the signal runtime")?;
    thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || {
            runtime.block_on(shutdown_signal());
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to spawn the signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn remove_log_file(context: &Context) {
    let Some(path) = context.log_file_path() else {
        return;
    };
    match fs::remove_file(path) {
        Ok(()) => info!("Removed log file {}", path.display()),
        Err(e) => warn!("Could not remove log file {}: {}", path.display(), e),
    }
}
