//! Board descriptions and the board database
//!
//! A [`BoardConfig`] is everything the upload pipeline needs to know about a
//! board: which MCU it carries, how it is programmed, and which quirks its
//! bootloader has. Boards are loaded from RON files at runtime.

mod database;
mod flags;

pub use database::{BoardDatabase, BoardDbError};
pub use flags::UploadFlags;

use crate::error::{Error, Result};

/// Board id that predates the `*usb*` naming scheme but still uses the
/// native USB port for bossac
pub const LEGACY_USB_BOARD: &str = "digix";

/// Immutable description of one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Board identifier (e.g. "sodaq_autonomo")
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Vendor name
    pub vendor: String,
    /// MCU part (e.g. "samd21j18a", "sam3x8e")
    pub mcu: String,
    /// CPU core passed to `-mcpu=` (e.g. "cortex-m0plus")
    pub cpu: String,
    /// Core clock in Hz
    pub f_cpu: u32,
    /// Framework variant directory name
    pub variant: String,
    /// Upload protocol as written in the board file
    pub upload_protocol: String,
    /// Start of the user code section, when a bootloader occupies the
    /// bottom of flash
    pub section_start: Option<u32>,
    /// Bootloader quirks
    pub upload_flags: UploadFlags,
    /// Upload baud rate
    pub upload_speed: Option<u32>,
    /// OpenOCD board config script (debug adapter uploads)
    pub openocd_config: Option<String>,
}

impl BoardConfig {
    /// True if bossac must talk to the native USB port of this board
    pub fn uses_native_usb(&self) -> bool {
        self.id.to_lowercase().contains("usb") || self.id == LEGACY_USB_BOARD
    }

    /// True for the SAM3X family (Arduino Due and friends)
    pub fn is_sam3x(&self) -> bool {
        self.mcu.contains("sam3x8e")
    }

    /// True for the SAMD family
    pub fn is_samd(&self) -> bool {
        self.mcu.contains("samd")
    }
}

/// Source of board descriptions
pub trait BoardProvider {
    /// Look up a board by id
    fn board(&self, id: &str) -> Option<&BoardConfig>;

    /// Look up a board by id, failing with [`Error::UnknownBoard`]
    fn require(&self, id: &str) -> Result<&BoardConfig> {
        self.board(id)
            .ok_or_else(|| Error::UnknownBoard(id.to_string()))
    }
}
