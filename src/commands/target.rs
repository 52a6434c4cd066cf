//! Build target commands

use crate::progress::PortSpinner;
use indicatif::MultiProgress;
use samflash_core::board::BoardConfig;
use samflash_core::exec::ProcessRunner;
use samflash_core::negotiate::PortNegotiator;
use samflash_core::port::SystemClock;
use samflash_core::settings::BuildSettings;
use samflash_core::upload::{Pipeline, Target};
use samflash_serial::{SerialPortLine, SystemPorts};

/// Run one build target for `board`
pub fn run_target(
    target: Target,
    board: &BoardConfig,
    settings: &BuildSettings,
    progress: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pipeline = Pipeline::new(board, settings, ProcessRunner::new())?;
    let mut negotiator = PortNegotiator::new(
        SystemPorts::new(),
        SerialPortLine::new(),
        SystemClock::new(),
        settings.wait,
    );
    let mut spinner = PortSpinner::new(progress.clone())?;

    pipeline.run_with_progress(target, &mut negotiator, &mut spinner)?;
    if target == Target::Upload {
        log::info!("Upload complete");
    }
    Ok(())
}
