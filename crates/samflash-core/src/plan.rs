//! Fully resolved external commands

use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::Protocol;

/// One external command: executable plus ordered arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path
    pub program: String,
    /// Arguments, passed verbatim (no shell)
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }
}

impl fmt::Display for Invocation {
    /// Shell-like rendering for logs; arguments with spaces are quoted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Everything needed to flash one firmware image
///
/// Built by [`UploadBackend::plan`](crate::backend::UploadBackend::plan)
/// once the upload port is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    protocol: Protocol,
    invocation: Invocation,
    artifact: PathBuf,
    port: Option<String>,
}

impl UploadPlan {
    pub(crate) fn new(
        protocol: Protocol,
        invocation: Invocation,
        artifact: PathBuf,
        port: Option<String>,
    ) -> Self {
        Self {
            protocol,
            invocation,
            artifact,
            port,
        }
    }

    /// Protocol this plan was built for
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Uploader command
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Uploader executable
    pub fn program(&self) -> &str {
        &self.invocation.program
    }

    /// Uploader arguments
    pub fn args(&self) -> &[String] {
        &self.invocation.args
    }

    /// Firmware image that gets flashed
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Serial port passed to the uploader, if it uses one
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaces() {
        let inv = Invocation::new(
            "openocd",
            ["-c".to_string(), "program {fw.bin} verify".to_string()],
        );
        assert_eq!(inv.to_string(), "openocd -c \"program {fw.bin} verify\"");
    }
}
