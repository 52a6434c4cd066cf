//! samflash-core - Upload orchestration for Atmel SAM boards
//!
//! This crate turns a board description into a concrete firmware upload:
//!
//! - **Board database** - RON files describing MCU, CPU, upload protocol and
//!   the upload quirks of each board
//! - **Port negotiation** - flush, 1200 bps touch and re-enumeration
//!   detection for boards with native USB bootloaders
//! - **Backend selection** - `openocd`, `bossac` or `avrdude`, chosen from
//!   the board's upload protocol
//! - **Execution** - running the chosen uploader and reporting its exit status
//!
//! Hardware access goes through the [`port::PortEnumerator`] and
//! [`port::SerialLine`] traits so the whole pipeline can run against fakes.
//!
//! # Example
//!
//! ```ignore
//! use samflash_core::board::{BoardDatabase, BoardProvider};
//! use samflash_core::backend::UploadBackend;
//! use samflash_core::settings::BuildSettings;
//!
//! let mut db = BoardDatabase::new();
//! db.load_dir("boards".as_ref())?;
//! let board = db.require("sodaq_autonomo")?;
//! let settings = BuildSettings::new(&board.id);
//!
//! // Fails here, before any hardware is touched, for unknown protocols
//! let backend = UploadBackend::select(board, &settings)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod board;
pub mod error;
pub mod exec;
pub mod negotiate;
pub mod plan;
pub mod port;
pub mod settings;
pub mod toolchain;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result, UploadOutcome};
