//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "samflash")]
#[command(author, version, about = "Build and upload firmware for SAM boards", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to board database directory (contains .ron files)
    /// Defaults to looking in ./boards/ and /usr/share/samflash/boards/
    #[arg(long, global = true)]
    pub board_db: Option<PathBuf>,

    /// Project file (TOML format)
    /// Defaults to ./samflash.toml when present
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by every build target
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Board id (overrides the project file)
    #[arg(short, long)]
    pub board: Option<String>,

    /// Directory holding firmware.elf
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// OpenOCD package root
    #[arg(long)]
    pub openocd_dir: Option<PathBuf>,

    /// avrdude package root
    #[arg(long)]
    pub avrdude_dir: Option<PathBuf>,

    /// Arduino framework root
    #[arg(long)]
    pub framework_dir: Option<PathBuf>,
}

/// Options of the upload target
#[derive(clap::Args, Debug, Clone, Default)]
pub struct UploadArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Serial port to upload through (auto-detected if not specified)
    #[arg(short = 'p', long)]
    pub upload_port: Option<String>,

    /// Upload baud rate (overrides the board)
    #[arg(long)]
    pub upload_speed: Option<u32>,

    /// Kill the uploader after this many seconds
    #[arg(long)]
    pub upload_timeout: Option<u64>,

    /// Fail when the 1200 bps touch cannot open the port
    #[arg(long)]
    pub strict_touch: bool,

    /// Seconds to wait for the bootloader port to appear
    #[arg(long)]
    pub wait_timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert firmware.elf into the upload image and report its size
    Build(TargetArgs),

    /// Report the size of firmware.elf
    Size(TargetArgs),

    /// Build the upload image, bring up the upload port and flash
    Upload(UploadArgs),

    /// Build the upload image without flashing
    #[command(name = "uploadlazy")]
    UploadLazy(TargetArgs),

    /// Print the compiler and linker flags for a board
    Flags {
        /// Board id (overrides the project file)
        #[arg(short, long)]
        board: Option<String>,
    },

    /// List known boards
    ListBoards {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },

    /// List serial ports
    ListPorts,
}
