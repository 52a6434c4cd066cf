//! Error types for samflash-core

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Pipeline error
///
/// Configuration errors are raised before any hardware is touched. The
/// remaining variants are the tagged failures an upload can end with.
#[derive(Debug, Error)]
pub enum Error {
    /// Board id not present in the board database
    #[error("Unknown board: {0}")]
    UnknownBoard(String),

    /// Upload protocol string is not one of the supported backends
    #[error("Unknown upload protocol '{protocol}' for board {board}")]
    UnknownProtocol {
        /// Board the protocol was read from
        board: String,
        /// Offending protocol string
        protocol: String,
    },

    /// A backend needs a setting the board/project does not provide
    #[error("Board {board} is missing required setting `{setting}`")]
    MissingSetting {
        /// Board id
        board: String,
        /// Name of the missing setting
        setting: &'static str,
    },

    /// No upload port could be found (auto-detect or re-enumeration)
    #[error("Couldn't find a board on the selected port (waited {waited:?}). Check that the board is connected")]
    PortNotFound {
        /// How long we polled before giving up
        waited: Duration,
    },

    /// Opening the port at the touch baud rate failed
    ///
    /// Only raised with `strict_touch`; otherwise a failed touch is logged
    /// and negotiation carries on.
    #[error("1200 bps touch on {port} failed: {reason}")]
    TouchFailed {
        /// Port that was touched
        port: String,
        /// Error reported by the serial layer
        reason: String,
    },

    /// The uploader exited with a non-zero status
    #[error("{program} exited with {}", exit_code_text(.code))]
    UploaderExit {
        /// Uploader executable
        program: String,
        /// Exit code, `None` if the process was killed by a signal
        code: Option<i32>,
        /// Captured stdout/stderr of the uploader
        output: String,
    },

    /// A build tool (objcopy, size) exited with a non-zero status
    #[error("Build tool {program} exited with {}", exit_code_text(.code))]
    ToolExit {
        /// Tool executable
        program: String,
        /// Exit code, `None` if the process was killed by a signal
        code: Option<i32>,
        /// Captured stdout/stderr of the tool
        output: String,
    },

    /// An external tool did not finish within the configured limit
    #[error("{program} did not finish within {limit:?}")]
    Timeout {
        /// Tool executable
        program: String,
        /// Configured limit
        limit: Duration,
    },

    /// Failed to start an external tool
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Executable that could not be started
        program: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Serial port enumeration failed
    #[error("Serial port enumeration failed: {0}")]
    Enumerate(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "no exit code (terminated by signal)".into(),
    }
}

impl Error {
    /// Process exit status this error should map to
    ///
    /// Uploader failures propagate the uploader's own exit code; build tool
    /// failures do not.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::UploaderExit { code: Some(c), .. } if *c != 0 => *c,
            _ => 1,
        }
    }

    /// True for errors detected before any hardware interaction
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownBoard(_) | Error::UnknownProtocol { .. } | Error::MissingSetting { .. }
        )
    }
}

/// Result type for samflash-core operations
pub type Result<T> = core::result::Result<T, Error>;

/// Result of one upload invocation
pub type UploadOutcome = Result<()>;
