//! arm-none-eabi toolchain glue
//!
//! Compiling and linking belong to the external build engine. This module
//! only derives the flags it should use for a board and describes the
//! `objcopy`/`size` invocations that turn its ELF into an uploadable image.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::board::BoardConfig;
use crate::plan::Invocation;

/// objcopy of the arm-none-eabi toolchain
pub const OBJCOPY: &str = "arm-none-eabi-objcopy";
/// size tool of the arm-none-eabi toolchain
pub const SIZETOOL: &str = "arm-none-eabi-size";

/// Base name of all firmware artifacts in the build directory
pub const PROGNAME: &str = "firmware";

/// Image format expected by an uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFormat {
    /// Raw binary (`.bin`)
    Bin,
    /// Intel HEX (`.hex`)
    Hex,
}

impl FirmwareFormat {
    /// File extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            FirmwareFormat::Bin => "bin",
            FirmwareFormat::Hex => "hex",
        }
    }

    /// Path of the artifact inside `build_dir`
    pub fn artifact_path(self, build_dir: &Path) -> PathBuf {
        build_dir.join(PROGNAME).with_extension(self.extension())
    }
}

impl fmt::Display for FirmwareFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareFormat::Bin => write!(f, "binary"),
            FirmwareFormat::Hex => write!(f, "Intel HEX"),
        }
    }
}

/// `objcopy` invocation converting `elf` into `out`
pub fn objcopy(elf: &Path, out: &Path, format: FirmwareFormat) -> Invocation {
    let mut args = vec!["-O".to_string()];
    match format {
        FirmwareFormat::Bin => args.push("binary".into()),
        FirmwareFormat::Hex => {
            args.extend(["ihex", "-R", ".eeprom"].map(String::from));
        }
    }
    args.push(elf.display().to_string());
    args.push(out.display().to_string());
    Invocation::new(OBJCOPY, args)
}

/// Berkeley-style decimal size report of `elf`
pub fn size_report(elf: &Path) -> Invocation {
    Invocation::new(
        SIZETOOL,
        ["-B".to_string(), "-d".to_string(), elf.display().to_string()],
    )
}

/// Compiler and linker flags for one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
    /// Assembler flags
    pub asflags: Vec<String>,
    /// C-only flags
    pub cflags: Vec<String>,
    /// Flags shared by C and C++
    pub ccflags: Vec<String>,
    /// C++-only flags
    pub cxxflags: Vec<String>,
    /// Preprocessor defines (without `-D`)
    pub cppdefines: Vec<String>,
    /// Linker flags
    pub linkflags: Vec<String>,
    /// Libraries to link
    pub libs: Vec<String>,
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.into_iter().map(String::from).collect()
}

impl BuildFlags {
    /// Derive the flag set for `board`
    pub fn for_board(board: &BoardConfig) -> Self {
        let mcpu = format!("-mcpu={}", board.cpu);

        let mut ccflags = strings([
            "-g",
            "-Os",
            "-ffunction-sections",
            "-fdata-sections",
            "-Wall",
            "-mthumb",
        ]);
        ccflags.push(mcpu.clone());
        ccflags.extend(strings(["-nostdlib", "--param", "max-inline-insns-single=500"]));

        let mut asflags = strings(["-x", "assembler-with-cpp"]);
        asflags.extend(ccflags.iter().cloned());

        let mut cppdefines = vec![format!("F_CPU={}L", board.f_cpu), "USBCON".to_string()];

        let mut linkflags = strings(["-Os", "-Wl,--gc-sections,--relax", "-mthumb"]);
        linkflags.push(mcpu);
        linkflags.extend(strings([
            "-Wl,--check-sections",
            "-Wl,--unresolved-symbols=report-all",
            "-Wl,--warn-common",
            "-Wl,--warn-section-align",
        ]));

        if let Some(start) = board.section_start {
            cppdefines.push("printf=iprintf".into());
            linkflags.push("-Wl,--entry=Reset_Handler".into());
            linkflags.push(format!("-Wl,--section-start=.text={:#x}", start));
        }

        if board.is_sam3x() {
            if board.section_start.is_none() {
                cppdefines.push("printf=iprintf".into());
                linkflags.push("-Wl,--entry=Reset_Handler".into());
            }
            linkflags.push("-Wl,--start-group".into());
        } else if board.is_samd() {
            linkflags.extend(strings(["--specs=nosys.specs", "--specs=nano.specs"]));
        }

        Self {
            asflags,
            cflags: strings(["-std=gnu11"]),
            ccflags,
            cxxflags: strings([
                "-fno-rtti",
                "-fno-exceptions",
                "-std=gnu++11",
                "-fno-threadsafe-statics",
            ]),
            cppdefines,
            linkflags,
            libs: strings(["c", "gcc", "m"]),
        }
    }
}
