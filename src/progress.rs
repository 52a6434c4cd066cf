//! Terminal progress display
//!
//! Log records and the port-wait spinner share stderr. All log output goes
//! through [`LogWriter`], which hides the spinner while a record is written,
//! so lines never land in the middle of a spinner frame.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use samflash_core::board::BoardConfig;
use samflash_core::upload::UploadProgress;
use std::io::{self, Write};
use std::time::Duration;

/// `env_logger` target that writes around the active progress bars
pub struct LogWriter {
    progress: MultiProgress,
}

impl LogWriter {
    pub fn new(progress: MultiProgress) -> Self {
        Self { progress }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Spinner shown while the board re-enumerates
pub struct PortSpinner {
    progress: MultiProgress,
    style: ProgressStyle,
    bar: Option<ProgressBar>,
}

impl PortSpinner {
    pub fn new(progress: MultiProgress) -> Result<Self, indicatif::style::TemplateError> {
        Ok(Self {
            progress,
            style: ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?,
            bar: None,
        })
    }
}

impl UploadProgress for PortSpinner {
    fn waiting_for_port(&mut self, board: &BoardConfig) {
        let pb = self.progress.add(ProgressBar::new_spinner());
        pb.set_style(self.style.clone());
        pb.set_message(format!("Waiting for {} upload port", board.name));
        pb.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(pb);
    }

    fn port_ready(&mut self, _port: Option<&str>) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
            self.progress.remove(&pb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn test_log_writer_passes_records_through() {
        let mut writer = LogWriter::new(hidden());
        let record = b"[INFO samflash] Looking for upload port...\n";
        assert_eq!(writer.write(record).unwrap(), record.len());
        writer.flush().unwrap();
    }

    #[test]
    fn test_spinner_cleared_when_port_ready() {
        let mut spinner = PortSpinner::new(hidden()).unwrap();
        let board = BoardConfig {
            id: "sodaq_one".into(),
            name: "SODAQ ONE".into(),
            vendor: "SODAQ".into(),
            mcu: "samd21g18a".into(),
            cpu: "cortex-m0plus".into(),
            f_cpu: 48_000_000,
            variant: "sodaq_one".into(),
            upload_protocol: "sam-ba".into(),
            section_start: Some(0x2000),
            upload_flags: Default::default(),
            upload_speed: None,
            openocd_config: None,
        };

        spinner.waiting_for_port(&board);
        let pb = spinner.bar.clone().unwrap();
        assert_eq!(pb.message(), "Waiting for SODAQ ONE upload port");

        spinner.port_ready(Some("ttyACM1"));
        assert!(spinner.bar.is_none());
        assert!(pb.is_finished());
    }
}
