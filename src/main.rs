//! samflash - Firmware build glue and uploader for Atmel SAM boards
//!
//! Turns the `firmware.elf` produced by the build engine into an upload image
//! and flashes it with the tool the board's bootloader speaks:
//!
//! - **openocd** - debug adapter (EDBG/CMSIS-DAP), no serial port involved
//! - **sam-ba** - `bossac` over the native USB or programming port, after a
//!   1200 bps touch has kicked the board into its bootloader
//! - **stk500v2** - `avrdude` through the programming chip
//!
//! The board database lives in RON files, per-project settings in
//! `samflash.toml`.

mod cli;
mod commands;
mod progress;

use clap::Parser;
use cli::{Cli, Commands, TargetArgs, UploadArgs};
use indicatif::MultiProgress;
use progress::LogWriter;
use samflash_core::board::{BoardConfig, BoardDatabase, BoardProvider};
use samflash_core::settings::{BuildSettings, ProjectConfig};
use samflash_core::upload::Target;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project file picked up from the working directory
const DEFAULT_PROJECT_FILE: &str = "samflash.toml";

fn main() {
    // Initialize logger; records are written around the port-wait spinner
    let progress = MultiProgress::new();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(LogWriter::new(
            progress.clone(),
        ))))
        .init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    // Load board database
    let db = match load_board_database(cli.board_db.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load board database: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} board definitions", db.len());

    if let Err(e) = run(&cli, &db, &progress) {
        let code = report_failure(e.as_ref(), &mut io::stderr());
        std::process::exit(code);
    }
}

/// Print the final error, independent of the log filter, and pick the exit status
fn report_failure(e: &(dyn std::error::Error + 'static), out: &mut dyn Write) -> i32 {
    let code = match e.downcast_ref::<samflash_core::Error>() {
        Some(err) => {
            report_tool_output(err, out);
            err.exit_code()
        }
        None => 1,
    };
    let _ = writeln!(out, "Error: {}", e);
    code
}

fn run(
    cli: &Cli,
    db: &BoardDatabase,
    progress: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let project = load_project(cli.project.as_deref())?;

    let default_target = Commands::Build(TargetArgs::default());
    match cli.command.as_ref().unwrap_or(&default_target) {
        Commands::Build(args) => {
            let (board, settings) = resolve(db, project, args, None, cli.verbose)?;
            commands::run_target(Target::Build, board, &settings, progress)
        }
        Commands::Size(args) => {
            let (board, settings) = resolve(db, project, args, None, cli.verbose)?;
            commands::run_target(Target::Size, board, &settings, progress)
        }
        Commands::Upload(args) => {
            let (board, settings) =
                resolve(db, project, &args.target, Some(args), cli.verbose)?;
            commands::run_target(Target::Upload, board, &settings, progress)
        }
        Commands::UploadLazy(args) => {
            let (board, settings) = resolve(db, project, args, None, cli.verbose)?;
            commands::run_target(Target::UploadLazy, board, &settings, progress)
        }
        Commands::Flags { board } => {
            let id = board_id(board.as_deref(), project.as_ref())?;
            commands::print_flags(db.require(&id)?);
            Ok(())
        }
        Commands::ListBoards { vendor } => {
            commands::list_boards(db, vendor.as_deref());
            Ok(())
        }
        Commands::ListPorts => commands::list_ports(),
    }
}

/// Load the board database from the specified path or default locations
fn load_board_database(path: Option<&Path>) -> Result<BoardDatabase, Box<dyn std::error::Error>> {
    let mut db = BoardDatabase::new();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Board database path not found: {}", path.display()).into());
        }
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("boards"),
            PathBuf::from("/usr/share/samflash/boards"),
            PathBuf::from("/usr/local/share/samflash/boards"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match db.load_dir(dir) {
                    Ok(count) => {
                        log::debug!("Loaded {} boards from {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to load boards from {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No board database found in default locations");
        }
    }

    Ok(db)
}

/// Load the project file, if there is one
///
/// An explicitly named file must exist; the default one is optional.
fn load_project(path: Option<&Path>) -> Result<Option<ProjectConfig>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Some(ProjectConfig::from_toml_file(path)?)),
        None => {
            let path = Path::new(DEFAULT_PROJECT_FILE);
            if path.is_file() {
                log::debug!("Using project file {}", path.display());
                Ok(Some(ProjectConfig::from_toml_file(path)?))
            } else {
                Ok(None)
            }
        }
    }
}

fn board_id(
    cli_board: Option<&str>,
    project: Option<&ProjectConfig>,
) -> Result<String, Box<dyn std::error::Error>> {
    cli_board
        .or_else(|| project.and_then(ProjectConfig::board))
        .map(String::from)
        .ok_or_else(|| {
            format!(
                "No board specified (use --board or set env.board in {})",
                DEFAULT_PROJECT_FILE
            )
            .into()
        })
}

/// Look up the board and assemble the settings for this invocation
///
/// Command line options override the project file. The result is never
/// modified afterwards.
fn resolve<'db>(
    db: &'db BoardDatabase,
    project: Option<ProjectConfig>,
    args: &TargetArgs,
    upload: Option<&UploadArgs>,
    verbose: u8,
) -> Result<(&'db BoardConfig, BuildSettings), Box<dyn std::error::Error>> {
    let id = board_id(args.board.as_deref(), project.as_ref())?;
    let board = db.require(&id)?;

    let mut settings = match project {
        Some(project) => project.into_settings(id),
        None => BuildSettings::new(id),
    };
    settings.verbose = verbose > 0;
    if let Some(dir) = &args.build_dir {
        settings.build_dir = dir.clone();
    }
    if let Some(dir) = &args.openocd_dir {
        settings.packages.openocd = Some(dir.clone());
    }
    if let Some(dir) = &args.avrdude_dir {
        settings.packages.avrdude = Some(dir.clone());
    }
    if let Some(dir) = &args.framework_dir {
        settings.packages.framework = Some(dir.clone());
    }

    if let Some(upload) = upload {
        if let Some(port) = upload.upload_port.as_deref().filter(|p| !p.is_empty()) {
            settings.upload_port = Some(port.to_string());
        }
        if let Some(speed) = upload.upload_speed {
            settings.upload_speed = Some(speed);
        }
        if let Some(secs) = upload.upload_timeout {
            settings.upload_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = upload.wait_timeout {
            settings.wait.timeout = Duration::from_secs(secs);
        }
        settings.strict_touch |= upload.strict_touch;
    }

    log::debug!("Settings: {:?}", settings);
    Ok((board, settings))
}

/// Show tool output that the log filter hid while it was streaming
fn report_tool_output(err: &samflash_core::Error, out: &mut dyn Write) {
    let output = match err {
        samflash_core::Error::UploaderExit { output, .. }
        | samflash_core::Error::ToolExit { output, .. } => output,
        _ => return,
    };
    if !output.is_empty() && !log::log_enabled!(target: "samflash::tool", log::Level::Info) {
        let _ = write!(out, "{}", output);
    }
}
