//! Upload backend selection
//!
//! Every board names one upload protocol. The protocol decides which
//! external tool flashes the image, which image format it needs, and
//! whether a serial port is involved at all:
//!
//! | Protocol   | Tool      | Image | Serial port |
//! |------------|-----------|-------|-------------|
//! | `openocd`  | `openocd` | bin   | no (debug adapter) |
//! | `sam-ba`   | `bossac`  | bin   | yes, bare device name |
//! | `stk500v2` | `avrdude` | hex   | yes |
//!
//! Selection happens before any hardware is touched; an unknown protocol is
//! a configuration error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::board::BoardConfig;
use crate::error::{Error, Result};
use crate::plan::{Invocation, UploadPlan};
use crate::settings::BuildSettings;
use crate::toolchain::FirmwareFormat;

/// Chip id handed to avrdude. The stk500v2 protocol is only used as an
/// upload shim for the Arduino M0/Tian bootloaders, which answer as an
/// ATmega2560 regardless of the real MCU.
pub const AVRDUDE_PART: &str = "atmega2560";

/// Supported upload protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Debug adapter via OpenOCD
    OpenOcd,
    /// SAM-BA bootloader via bossac
    SamBa,
    /// STK500v2 bootloader via avrdude
    Stk500v2,
}

impl Protocol {
    /// All supported protocols
    pub const ALL: [Protocol; 3] = [Protocol::OpenOcd, Protocol::SamBa, Protocol::Stk500v2];

    /// Protocol name as written in board files
    pub fn name(self) -> &'static str {
        match self {
            Protocol::OpenOcd => "openocd",
            Protocol::SamBa => "sam-ba",
            Protocol::Stk500v2 => "stk500v2",
        }
    }

    /// External tool that implements this protocol
    pub fn uploader(self) -> &'static str {
        match self {
            Protocol::OpenOcd => "openocd",
            Protocol::SamBa => "bossac",
            Protocol::Stk500v2 => "avrdude",
        }
    }

    /// Image format the uploader expects
    pub fn firmware_format(self) -> FirmwareFormat {
        match self {
            Protocol::Stk500v2 => FirmwareFormat::Hex,
            Protocol::OpenOcd | Protocol::SamBa => FirmwareFormat::Bin,
        }
    }

    /// False for debug-adapter uploads, which never open a serial port
    pub fn uses_serial_port(self) -> bool {
        !matches!(self, Protocol::OpenOcd)
    }

    /// bossac wants `ttyACM0`, not `/dev/ttyACM0`
    pub fn wants_bare_port_name(self) -> bool {
        matches!(self, Protocol::SamBa)
    }

    /// Resolve the protocol of a board
    ///
    /// Returns `Ok(None)` for boards without an upload protocol (empty or
    /// `"none"`).
    pub fn of_board(board: &BoardConfig) -> Result<Option<Protocol>> {
        match board.upload_protocol.as_str() {
            "" | "none" => Ok(None),
            other => other
                .parse()
                .map(Some)
                .map_err(|_| Error::UnknownProtocol {
                    board: board.id.clone(),
                    protocol: other.to_string(),
                }),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown upload protocol: {}", s))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A selected uploader with all board/project parameters resolved
///
/// Only the serial port and the image path are left open; they are bound by
/// [`UploadBackend::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadBackend {
    /// Debug adapter flashing
    OpenOcd {
        /// Board config script (`-f`)
        config_script: String,
        /// Script search paths (`-s`), in order
        search_paths: Vec<PathBuf>,
        /// Flash offset passed to `program`
        flash_offset: Option<u32>,
    },
    /// SAM-BA bootloader flashing
    Bossac {
        /// `-U true`: talk to the native USB port
        native_usb: bool,
        /// Prepend `--info --debug`
        verbose: bool,
        /// Append `--boot` (boot from flash after upload, SAM3X only)
        boot_from_flash: bool,
    },
    /// STK500v2 flashing
    Avrdude {
        /// `avrdude.conf` location
        config_file: PathBuf,
        /// Serial baud rate
        baud: u32,
        /// Prepend `-v`
        verbose: bool,
    },
}

impl UploadBackend {
    /// Select and parameterize the backend for `board`
    ///
    /// Returns `Ok(None)` when the board has no upload protocol.
    pub fn select(board: &BoardConfig, settings: &BuildSettings) -> Result<Option<Self>> {
        let Some(protocol) = Protocol::of_board(board)? else {
            return Ok(None);
        };

        let backend = match protocol {
            Protocol::OpenOcd => {
                let config_script =
                    board
                        .openocd_config
                        .clone()
                        .ok_or_else(|| Error::MissingSetting {
                            board: board.id.clone(),
                            setting: "debug.openocd_cfg",
                        })?;
                let openocd = settings.packages.openocd.clone().unwrap_or_default();
                let scripts = openocd.join("share").join("openocd").join("scripts");
                let mut search_paths = vec![scripts.clone(), scripts.join("board")];
                if board.id.contains("zero") {
                    let framework = settings.packages.framework.clone().unwrap_or_default();
                    search_paths.push(
                        framework
                            .join("variants")
                            .join(&board.variant)
                            .join("openocd_scripts"),
                    );
                }
                UploadBackend::OpenOcd {
                    config_script,
                    search_paths,
                    flash_offset: board.section_start,
                }
            }
            Protocol::SamBa => UploadBackend::Bossac {
                native_usb: board.uses_native_usb(),
                verbose: settings.verbose,
                boot_from_flash: board.is_sam3x(),
            },
            Protocol::Stk500v2 => {
                let baud = settings
                    .upload_speed
                    .or(board.upload_speed)
                    .ok_or_else(|| Error::MissingSetting {
                        board: board.id.clone(),
                        setting: "upload.speed",
                    })?;
                let avrdude = settings.packages.avrdude.clone().unwrap_or_default();
                UploadBackend::Avrdude {
                    config_file: avrdude.join("avrdude.conf"),
                    baud,
                    verbose: settings.verbose,
                }
            }
        };

        log::debug!("Selected {} backend for {}", backend.protocol(), board.id);
        Ok(Some(backend))
    }

    /// Protocol implemented by this backend
    pub fn protocol(&self) -> Protocol {
        match self {
            UploadBackend::OpenOcd { .. } => Protocol::OpenOcd,
            UploadBackend::Bossac { .. } => Protocol::SamBa,
            UploadBackend::Avrdude { .. } => Protocol::Stk500v2,
        }
    }

    /// Image format the uploader expects
    pub fn firmware_format(&self) -> FirmwareFormat {
        self.protocol().firmware_format()
    }

    /// Path of the image this backend flashes
    pub fn artifact_path(&self, build_dir: &Path) -> PathBuf {
        self.firmware_format().artifact_path(build_dir)
    }

    /// Bind port and image, producing the final command
    ///
    /// Serial backends fail with [`Error::PortNotFound`] when no port is
    /// given; the debug adapter backend ignores the port.
    pub fn plan(&self, port: Option<&str>, artifact: &Path) -> Result<UploadPlan> {
        let protocol = self.protocol();
        let firmware = artifact.display().to_string();

        let port = if protocol.uses_serial_port() {
            match port.filter(|p| !p.is_empty()) {
                Some(p) => Some(p.to_string()),
                None => {
                    return Err(Error::PortNotFound {
                        waited: std::time::Duration::ZERO,
                    })
                }
            }
        } else {
            None
        };

        let mut args: Vec<String> = Vec::new();
        match self {
            UploadBackend::OpenOcd {
                config_script,
                search_paths,
                flash_offset,
            } => {
                args.push("-f".into());
                args.push(config_script.clone());
                for path in search_paths {
                    args.push("-s".into());
                    args.push(path.display().to_string());
                }
                let reset = match flash_offset {
                    Some(offset) => format!("reset {:#x}", offset),
                    None => "reset".to_string(),
                };
                args.push("-c".into());
                args.push(format!(
                    "telnet_port disabled; program {{{}}} verify {}; shutdown",
                    firmware, reset
                ));
            }
            UploadBackend::Bossac {
                native_usb,
                verbose,
                boot_from_flash,
            } => {
                if *verbose {
                    args.push("--info".into());
                    args.push("--debug".into());
                }
                args.push("--port".into());
                args.extend(port.clone());
                for flag in ["--erase", "--write", "--verify", "--reset", "-U"] {
                    args.push(flag.into());
                }
                args.push(native_usb.to_string());
                if *boot_from_flash {
                    args.push("--boot".into());
                }
                args.push(firmware);
            }
            UploadBackend::Avrdude {
                config_file,
                baud,
                verbose,
            } => {
                if *verbose {
                    args.push("-v".into());
                }
                args.extend([
                    "-p".to_string(),
                    AVRDUDE_PART.to_string(),
                    "-C".to_string(),
                    config_file.display().to_string(),
                    "-c".to_string(),
                    protocol.name().to_string(),
                    "-P".to_string(),
                ]);
                args.extend(port.clone());
                args.push("-b".into());
                args.push(baud.to_string());
                args.push("-U".into());
                args.push(format!("flash:w:{}:i", firmware));
            }
        }

        Ok(UploadPlan::new(
            protocol,
            Invocation::new(protocol.uploader(), args),
            artifact.to_path_buf(),
            port,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::test_boards::board;

    fn settings() -> BuildSettings {
        let mut s = BuildSettings::new("test");
        s.packages.openocd = Some(PathBuf::from("/pkg/openocd"));
        s.packages.avrdude = Some(PathBuf::from("/pkg/avrdude"));
        s.packages.framework = Some(PathBuf::from("/pkg/framework"));
        s
    }

    #[test]
    fn test_selection_is_exclusive() {
        let s = settings();
        let mut openocd = board("zero_edbg", "openocd");
        openocd.openocd_config = Some("arduino_zero.cfg".into());
        let mut avr = board("tian", "stk500v2");
        avr.upload_speed = Some(57600);

        let cases = [
            (openocd, Protocol::OpenOcd),
            (board("sodaq_one", "sam-ba"), Protocol::SamBa),
            (avr, Protocol::Stk500v2),
        ];
        for (b, expected) in cases {
            let backend = UploadBackend::select(&b, &s).unwrap().unwrap();
            assert_eq!(backend.protocol(), expected);
            assert_eq!(backend.protocol().uploader(), expected.uploader());
        }
    }

    #[test]
    fn test_unknown_protocol_is_error() {
        let s = settings();
        for name in ["dfu", "SAM-BA", "openocd ", "stk500"] {
            let err = UploadBackend::select(&board("b", name), &s).unwrap_err();
            assert!(matches!(err, Error::UnknownProtocol { ref protocol, .. } if protocol == name));
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_no_protocol() {
        let s = settings();
        assert_eq!(UploadBackend::select(&board("b", ""), &s).unwrap(), None);
        assert_eq!(UploadBackend::select(&board("b", "none"), &s).unwrap(), None);
    }

    #[test]
    fn test_bossac_usb_flag() {
        let s = settings();
        let usb_flag = |id: &str| {
            let backend = UploadBackend::select(&board(id, "sam-ba"), &s)
                .unwrap()
                .unwrap();
            let plan = backend
                .plan(Some("ttyACM0"), Path::new("firmware.bin"))
                .unwrap();
            let args = plan.args();
            let idx = args.iter().position(|a| a == "-U").unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(usb_flag("zeroUSB"), "true");
        assert_eq!(usb_flag("sodaq_autonomo"), "false");
        assert_eq!(usb_flag("digix"), "true");
    }

    #[test]
    fn test_bossac_args() {
        let mut s = settings();
        s.verbose = true;
        let mut due = board("due", "sam-ba");
        due.mcu = "at91sam3x8e".into();
        let plan = UploadBackend::select(&due, &s)
            .unwrap()
            .unwrap()
            .plan(Some("ttyACM0"), Path::new(".build/firmware.bin"))
            .unwrap();
        assert_eq!(plan.program(), "bossac");
        assert_eq!(
            plan.args(),
            [
                "--info",
                "--debug",
                "--port",
                "ttyACM0",
                "--erase",
                "--write",
                "--verify",
                "--reset",
                "-U",
                "false",
                "--boot",
                ".build/firmware.bin"
            ]
        );
        assert_eq!(plan.port(), Some("ttyACM0"));
    }

    #[test]
    fn test_avrdude_part_is_fixed() {
        let s = settings();
        let mut tian = board("tian", "stk500v2");
        tian.mcu = "samd21g18a".into();
        tian.upload_speed = Some(57600);
        let backend = UploadBackend::select(&tian, &s).unwrap().unwrap();
        assert_eq!(backend.firmware_format(), FirmwareFormat::Hex);

        let artifact = backend.artifact_path(Path::new(".build"));
        assert_eq!(artifact, PathBuf::from(".build/firmware.hex"));
        let plan = backend.plan(Some("/dev/ttyACM0"), &artifact).unwrap();
        assert_eq!(
            plan.args(),
            [
                "-p",
                "atmega2560",
                "-C",
                "/pkg/avrdude/avrdude.conf",
                "-c",
                "stk500v2",
                "-P",
                "/dev/ttyACM0",
                "-b",
                "57600",
                "-U",
                "flash:w:.build/firmware.hex:i"
            ]
        );

        tian.mcu = "atmega328p".into();
        let plan = UploadBackend::select(&tian, &s)
            .unwrap()
            .unwrap()
            .plan(Some("COM4"), &artifact)
            .unwrap();
        assert_eq!(plan.args()[1], AVRDUDE_PART);
    }

    #[test]
    fn test_avrdude_requires_speed() {
        let s = settings();
        let err = UploadBackend::select(&board("tian", "stk500v2"), &s).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingSetting {
                setting: "upload.speed",
                ..
            }
        ));

        let mut s = settings();
        s.upload_speed = Some(115200);
        s.verbose = true;
        let plan = UploadBackend::select(&board("tian", "stk500v2"), &s)
            .unwrap()
            .unwrap()
            .plan(Some("COM4"), Path::new("fw.hex"))
            .unwrap();
        assert_eq!(plan.args()[0], "-v");
        assert!(plan.args().windows(2).any(|w| w == &["-b", "115200"]));
    }

    #[test]
    fn test_openocd_args() {
        let s = settings();
        let mut zero = board("zero_edbg", "openocd");
        zero.openocd_config = Some("arduino_zero.cfg".into());
        zero.variant = "arduino_zero".into();
        zero.section_start = Some(0x2000);
        let plan = UploadBackend::select(&zero, &s)
            .unwrap()
            .unwrap()
            .plan(Some("/dev/ttyACM0"), Path::new(".build/firmware.bin"))
            .unwrap();
        assert_eq!(plan.program(), "openocd");
        assert_eq!(plan.port(), None);
        assert_eq!(
            plan.args(),
            [
                "-f",
                "arduino_zero.cfg",
                "-s",
                "/pkg/openocd/share/openocd/scripts",
                "-s",
                "/pkg/openocd/share/openocd/scripts/board",
                "-s",
                "/pkg/framework/variants/arduino_zero/openocd_scripts",
                "-c",
                "telnet_port disabled; program {.build/firmware.bin} verify reset 0x2000; shutdown"
            ]
        );
    }

    #[test]
    fn test_openocd_without_offset_or_variant_scripts() {
        let s = settings();
        let mut b = board("sodaq_sara_dbg", "openocd");
        b.openocd_config = Some("atmel_samd21.cfg".into());
        let plan = UploadBackend::select(&b, &s)
            .unwrap()
            .unwrap()
            .plan(None, Path::new("fw.bin"))
            .unwrap();
        assert_eq!(plan.args().len(), 8);
        assert_eq!(
            plan.args()[7],
            "telnet_port disabled; program {fw.bin} verify reset; shutdown"
        );
    }

    #[test]
    fn test_openocd_requires_config_script() {
        let err = UploadBackend::select(&board("zero_edbg", "openocd"), &settings()).unwrap_err();
        assert!(matches!(err, Error::MissingSetting { setting: "debug.openocd_cfg", .. }));
    }

    #[test]
    fn test_serial_backend_requires_port() {
        let backend = UploadBackend::select(&board("sodaq_one", "sam-ba"), &settings())
            .unwrap()
            .unwrap();
        assert!(matches!(
            backend.plan(None, Path::new("fw.bin")),
            Err(Error::PortNotFound { .. })
        ));
        assert!(matches!(
            backend.plan(Some(""), Path::new("fw.bin")),
            Err(Error::PortNotFound { .. })
        ));
    }
}
