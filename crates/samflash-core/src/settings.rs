//! Per-invocation build settings and the project file
//!
//! Settings are assembled once, from the project file and command line, and
//! then passed down by reference. Nothing in the pipeline mutates them.
//!
//! The project file is TOML:
//!
//! ```toml
//! [env]
//! board = "sodaq_autonomo"
//! upload_port = "/dev/ttyACM0"
//! build_dir = ".build"
//!
//! [packages]
//! openocd = "/opt/tool-openocd"
//! avrdude = "/opt/tool-avrdude"
//! framework = "/opt/framework-sodaqsamd"
//!
//! [wait]
//! poll_interval_ms = 250
//! timeout_ms = 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::negotiate::WaitSettings;

/// Default build output directory
pub const DEFAULT_BUILD_DIR: &str = ".build";

/// Error loading the project file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the file
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Invalid TOML or unexpected keys
    #[error("Invalid project file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Install locations of the external tool packages
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPackages {
    /// OpenOCD package root (contains `share/openocd/scripts`)
    pub openocd: Option<PathBuf>,
    /// avrdude package root (contains `avrdude.conf`)
    pub avrdude: Option<PathBuf>,
    /// Arduino framework root (contains `variants/`)
    pub framework: Option<PathBuf>,
}

/// Immutable configuration of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    /// Board id to build/upload for
    pub board: String,
    /// Upload port; `None` means auto-detect
    pub upload_port: Option<String>,
    /// Overrides the board's upload speed
    pub upload_speed: Option<u32>,
    /// Enables diagnostic flags of the uploaders
    pub verbose: bool,
    /// Directory holding `firmware.elf` and the converted artifacts
    pub build_dir: PathBuf,
    /// Tool package locations
    pub packages: ToolPackages,
    /// Port re-enumeration timing
    pub wait: WaitSettings,
    /// Kill the uploader after this long
    pub upload_timeout: Option<Duration>,
    /// Treat a failed 1200 bps touch as fatal
    pub strict_touch: bool,
}

impl BuildSettings {
    /// Settings for `board` with every other value at its default
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            upload_port: None,
            upload_speed: None,
            verbose: false,
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            packages: ToolPackages::default(),
            wait: WaitSettings::default(),
            upload_timeout: None,
            strict_touch: false,
        }
    }

    /// Path of the linked ELF produced by the external build engine
    pub fn elf_path(&self) -> PathBuf {
        self.build_dir.join("firmware.elf")
    }
}

// ============================================================================
// Project file
// ============================================================================

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EnvSection {
    board: Option<String>,
    upload_port: Option<String>,
    upload_speed: Option<u32>,
    build_dir: Option<PathBuf>,
    upload_timeout_secs: Option<u64>,
    strict_touch: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WaitSection {
    poll_interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    touch_settle_ms: Option<u64>,
}

/// Parsed project file
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    env: EnvSection,
    packages: ToolPackages,
    wait: WaitSection,
}

impl ProjectConfig {
    /// Load a project file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a project file from a string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Board named in the project file
    pub fn board(&self) -> Option<&str> {
        self.env.board.as_deref()
    }

    /// Resolve into settings for `board`
    pub fn into_settings(self, board: impl Into<String>) -> BuildSettings {
        let mut settings = BuildSettings::new(board);
        settings.upload_port = self.env.upload_port.filter(|p| !p.is_empty());
        settings.upload_speed = self.env.upload_speed;
        if let Some(dir) = self.env.build_dir {
            settings.build_dir = dir;
        }
        settings.upload_timeout = self.env.upload_timeout_secs.map(Duration::from_secs);
        settings.strict_touch = self.env.strict_touch;
        settings.packages = self.packages;
        if let Some(ms) = self.wait.poll_interval_ms {
            settings.wait.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.wait.timeout_ms {
            settings.wait.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.wait.touch_settle_ms {
            settings.wait.touch_settle = Duration::from_millis(ms);
        }
        settings
    }
}
