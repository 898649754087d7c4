use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::info;

use crate::error::PayloadError;

pub trait Camera {
    /// Starts recording. Calling it while already recording does nothing.
    fn start_recording(&mut self) -> Result<(), PayloadError>;
    fn stop_recording(&mut self) -> Result<(), PayloadError>;
}

/// Records video with `rpicam-vid` until stopped.
pub struct RpicamCamera {
    program: String,
    output_path: PathBuf,
    recording: Option<Child>,
}

impl RpicamCamera {
    pub fn new(output_path: &Path) -> Self {
        Self::with_program("rpicam-vid", output_path)
    }

    pub fn with_program(program: &str, output_path: &Path) -> Self {
        RpicamCamera {
            program: program.to_string(),
            output_path: output_path.to_path_buf(),
            recording: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }
}

impl Camera for RpicamCamera {
    fn start_recording(&mut self) -> Result<(), PayloadError> {
        if self.recording.is_some() {
            return Ok(());
        }
        // -t 0 records until the process is killed.
        let child = Command::new(&self.program)
            .args([
                "-t", "0", "--inline", "--awb", "auto", "--width", "1920", "--height", "1080",
                "-o",
            ])
            .arg(&self.output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!("Video recording started, saving to {}", self.output_path.display());
        self.recording = Some(child);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), PayloadError> {
        let Some(mut child) = self.recording.take() else {
            return Ok(());
        };
        child.kill()?;
        child.wait()?;
        info!("Video recording stopped");
        Ok(())
    }
}

impl Drop for RpicamCamera {
    fn drop(&mut self) {
        let _ = self.stop_recording();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_recording_is_fine() {
        let mut camera = RpicamCamera::new(Path::new("video.h264"));
        assert!(camera.stop_recording().is_ok());
        assert!(!camera.is_recording());
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut camera =
            RpicamCamera::with_program("definitely-not-a-camera-binary", Path::new("video.h264"));
        assert!(matches!(camera.start_recording(), Err(PayloadError::Io(_))));
        assert!(!camera.is_recording());
    }
}
