//! Board database for runtime loading and lookup
//!
//! Board files are RON documents, one per vendor:
//!
//! ```ron
//! (
//!     vendor: "SODAQ",
//!     boards: [
//!         (
//!             id: "sodaq_autonomo",
//!             name: "SODAQ Autonomo",
//!             mcu: "samd21j18a",
//!             cpu: "cortex-m0plus",
//!             f_cpu: 48000000,
//!             variant: "sodaq_autonomo",
//!             upload: (
//!                 protocol: "sam-ba",
//!                 section_start: Some(0x2000),
//!                 use_1200bps_touch: true,
//!                 wait_for_upload_port: true,
//!             ),
//!         ),
//!     ],
//! )
//! ```

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use super::{BoardConfig, BoardProvider, UploadFlags};

/// Error type for board database operations
#[derive(Debug, Error)]
pub enum BoardDbError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Upload section of a board definition
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct UploadDef {
    protocol: String,
    section_start: Option<u32>,
    speed: Option<u32>,
    use_1200bps_touch: bool,
    wait_for_upload_port: bool,
    disable_flushing: bool,
}

impl UploadDef {
    fn flags(&self) -> UploadFlags {
        let mut f = UploadFlags::empty();
        if self.wait_for_upload_port {
            f |= UploadFlags::WAIT_FOR_UPLOAD_PORT;
        }
        if self.use_1200bps_touch {
            f |= UploadFlags::USE_1200BPS_TOUCH;
        }
        if self.disable_flushing {
            f |= UploadFlags::DISABLE_FLUSHING;
        }
        f
    }
}

/// Debug section of a board definition
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct DebugDef {
    openocd_cfg: Option<String>,
}

/// Single board definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct BoardDef {
    id: String,
    name: String,
    mcu: String,
    cpu: String,
    #[serde(default = "default_f_cpu")]
    f_cpu: u32,
    #[serde(default)]
    variant: String,
    #[serde(default)]
    upload: UploadDef,
    #[serde(default)]
    debug: DebugDef,
}

fn default_f_cpu() -> u32 {
    48_000_000
}

/// Vendor file containing multiple boards
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    boards: Vec<BoardDef>,
}

// ============================================================================
// Board database
// ============================================================================

/// Runtime board database
#[derive(Debug, Clone, Default)]
pub struct BoardDatabase {
    boards: Vec<BoardConfig>,
}

impl BoardDatabase {
    /// Create an empty board database
    pub fn new() -> Self {
        Self { boards: Vec::new() }
    }

    /// Load board definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, BoardDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load board definitions from a RON string
    pub fn load_ron(&mut self, content: &str) -> Result<usize, BoardDbError> {
        let vendor_def: VendorDef = ron::from_str(content)?;
        let count = vendor_def.boards.len();

        for def in vendor_def.boards {
            if self.board(&def.id).is_some() {
                return Err(BoardDbError::Validation(format!(
                    "duplicate board id '{}'",
                    def.id
                )));
            }
            let upload_flags = def.upload.flags();
            self.boards.push(BoardConfig {
                vendor: vendor_def.vendor.clone(),
                id: def.id,
                name: def.name,
                mcu: def.mcu,
                cpu: def.cpu,
                f_cpu: def.f_cpu,
                variant: def.variant,
                upload_protocol: def.upload.protocol,
                section_start: def.upload.section_start,
                upload_flags,
                upload_speed: def.upload.speed,
                openocd_config: def.debug.openocd_cfg,
            });
        }

        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, BoardDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get the number of boards in the database
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Find boards by vendor (case-insensitive partial match)
    pub fn find_by_vendor(&self, vendor: &str) -> Vec<&BoardConfig> {
        let vendor_lower = vendor.to_lowercase();
        self.boards
            .iter()
            .filter(|b| b.vendor.to_lowercase().contains(&vendor_lower))
            .collect()
    }

    /// Iterate over all boards
    pub fn iter(&self) -> impl Iterator<Item = &BoardConfig> {
        self.boards.iter()
    }
}

impl BoardProvider for BoardDatabase {
    fn board(&self, id: &str) -> Option<&BoardConfig> {
        self.boards.iter().find(|b| b.id == id)
    }
}
