//! The per-invocation pipeline: artifact -> negotiate -> plan -> execute

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backend::UploadBackend;
use crate::board::BoardConfig;
use crate::error::{Error, Result};
use crate::exec::{self, CommandRunner};
use crate::negotiate::{NegotiationEvent, PortNegotiator};
use crate::port::{Clock, PortEnumerator, SerialLine};
use crate::settings::BuildSettings;
use crate::toolchain::{self, FirmwareFormat};
use crate::UploadOutcome;

/// Build targets understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Convert the ELF into the upload artifact and report its size
    Build,
    /// Size report only
    Size,
    /// Build, negotiate the port and flash
    Upload,
    /// Prepare the artifact exactly as `Upload` would, without touching
    /// the board
    UploadLazy,
}

impl Target {
    /// Target name on the command line
    pub fn name(self) -> &'static str {
        match self {
            Target::Build => "build",
            Target::Size => "size",
            Target::Upload => "upload",
            Target::UploadLazy => "uploadlazy",
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        [Target::Build, Target::Size, Target::Upload, Target::UploadLazy]
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("unknown target: {}", s))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observer of the interactive part of an upload
///
/// Both hooks are only called for backends that talk to a serial port.
pub trait UploadProgress {
    /// Port negotiation is about to start
    fn waiting_for_port(&mut self, _board: &BoardConfig) {}

    /// Port negotiation ended; `port` is `None` when it failed
    fn port_ready(&mut self, _port: Option<&str>) {}
}

impl UploadProgress for () {}

/// Pipeline for one board and one set of settings
///
/// The backend is selected on construction, so configuration errors surface
/// before any tool runs or any port is opened.
pub struct Pipeline<'a, R> {
    board: &'a BoardConfig,
    settings: &'a BuildSettings,
    backend: Option<UploadBackend>,
    runner: R,
}

impl<'a, R: CommandRunner> Pipeline<'a, R> {
    /// Select the backend for `board` and set up the pipeline
    pub fn new(board: &'a BoardConfig, settings: &'a BuildSettings, runner: R) -> Result<Self> {
        let backend = UploadBackend::select(board, settings)?;
        Ok(Self {
            board,
            settings,
            backend,
            runner,
        })
    }

    /// Selected backend, `None` for boards without an upload protocol
    pub fn backend(&self) -> Option<&UploadBackend> {
        self.backend.as_ref()
    }

    /// Image format the artifact is produced in
    pub fn firmware_format(&self) -> FirmwareFormat {
        self.backend
            .as_ref()
            .map_or(FirmwareFormat::Bin, UploadBackend::firmware_format)
    }

    /// Path of the upload artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.firmware_format()
            .artifact_path(&self.settings.build_dir)
    }

    /// Convert the linked ELF into the upload artifact
    pub fn build_artifact(&mut self) -> Result<PathBuf> {
        let elf = self.settings.elf_path();
        let artifact = self.artifact_path();
        log::info!(
            "Building {} ({})",
            artifact.display(),
            self.firmware_format()
        );
        let invocation = toolchain::objcopy(&elf, &artifact, self.firmware_format());
        exec::run_checked(&mut self.runner, &invocation, None)?;
        Ok(artifact)
    }

    /// Print the size of the linked ELF
    pub fn size(&mut self) -> Result<String> {
        let elf = self.settings.elf_path();
        log::info!("Calculating size {}", elf.display());
        exec::run_checked(&mut self.runner, &toolchain::size_report(&elf), None)
    }

    /// Run `target`
    ///
    /// The negotiator is only consulted for [`Target::Upload`] with a serial
    /// backend.
    pub fn run<E, L, C>(
        &mut self,
        target: Target,
        negotiator: &mut PortNegotiator<E, L, C>,
    ) -> UploadOutcome
    where
        E: PortEnumerator,
        L: SerialLine,
        C: Clock,
    {
        self.run_with_progress(target, negotiator, &mut ())
    }

    /// [`Pipeline::run`], reporting the port wait to `progress`
    pub fn run_with_progress<E, L, C>(
        &mut self,
        target: Target,
        negotiator: &mut PortNegotiator<E, L, C>,
        progress: &mut dyn UploadProgress,
    ) -> UploadOutcome
    where
        E: PortEnumerator,
        L: SerialLine,
        C: Clock,
    {
        match target {
            Target::Build => {
                self.build_artifact()?;
                self.size()?;
            }
            Target::Size => {
                self.size()?;
            }
            Target::UploadLazy => {
                let artifact = self.build_artifact()?;
                match &self.backend {
                    Some(b) => log::info!(
                        "{} ready for {}, not uploading",
                        artifact.display(),
                        b.protocol().uploader()
                    ),
                    None => log::info!("{} ready", artifact.display()),
                }
            }
            Target::Upload => self.upload_with_progress(negotiator, progress)?,
        }
        Ok(())
    }

    /// Build the artifact, bring up the port and flash
    pub fn upload<E, L, C>(&mut self, negotiator: &mut PortNegotiator<E, L, C>) -> UploadOutcome
    where
        E: PortEnumerator,
        L: SerialLine,
        C: Clock,
    {
        self.upload_with_progress(negotiator, &mut ())
    }

    /// [`Pipeline::upload`], reporting the port wait to `progress`
    pub fn upload_with_progress<E, L, C>(
        &mut self,
        negotiator: &mut PortNegotiator<E, L, C>,
        progress: &mut dyn UploadProgress,
    ) -> UploadOutcome
    where
        E: PortEnumerator,
        L: SerialLine,
        C: Clock,
    {
        let artifact = self.build_artifact()?;

        let port = if self.needs_port() {
            progress.waiting_for_port(self.board);
            let port = self.negotiate_port(negotiator);
            progress.port_ready(port.as_ref().ok().and_then(Option::as_deref));
            port?
        } else {
            None
        };
        if let Some(port) = &port {
            log::info!("Uploading through {}", port);
        }

        self.flash(port.as_deref(), &artifact)
    }

    /// True if the selected backend talks to a serial port
    pub fn needs_port(&self) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| b.protocol().uses_serial_port())
    }

    /// Run port negotiation if the selected backend talks to a serial port
    ///
    /// Returns `Ok(None)` for the debug adapter backend and for boards without
    /// an upload protocol; neither opens a port.
    pub fn negotiate_port<E, L, C>(
        &mut self,
        negotiator: &mut PortNegotiator<E, L, C>,
    ) -> Result<Option<String>>
    where
        E: PortEnumerator,
        L: SerialLine,
        C: Clock,
    {
        let Some(protocol) = self.backend.as_ref().map(UploadBackend::protocol) else {
            return Ok(None);
        };
        if !protocol.uses_serial_port() {
            return Ok(None);
        }

        log::info!("Looking for upload port...");
        let negotiated =
            negotiator.negotiate(self.settings.upload_port.as_deref(), self.board, protocol)?;
        if self.settings.strict_touch {
            if let Some(NegotiationEvent::TouchFailed { port, reason }) = negotiated
                .events
                .iter()
                .find(|e| matches!(e, NegotiationEvent::TouchFailed { .. }))
            {
                return Err(Error::TouchFailed {
                    port: port.clone(),
                    reason: reason.clone(),
                });
            }
        }
        Ok(Some(negotiated.port))
    }

    /// Flash `artifact` through the selected backend
    ///
    /// A board without an upload protocol is a no-op.
    pub fn flash(&mut self, port: Option<&str>, artifact: &Path) -> UploadOutcome {
        let Some(backend) = &self.backend else {
            log::warn!(
                "Board {} has no upload protocol, only the firmware was built",
                self.board.id
            );
            return Ok(());
        };

        let plan = backend.plan(port, artifact)?;
        log::debug!("Upload command: {}", plan.invocation());
        exec::execute(&mut self.runner, &plan, self.settings.upload_timeout)
    }
}
