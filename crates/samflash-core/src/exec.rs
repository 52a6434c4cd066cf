//! Running external tools
//!
//! The executor knows nothing about protocols: it runs whatever
//! [`Invocation`] it is given, streams the tool's output into the log and
//! turns the exit status into a result. Nothing is ever retried; re-running
//! a half-finished flash can leave the device worse off.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::plan::{Invocation, UploadPlan};
use crate::UploadOutcome;

/// How often a child is polled while a timeout is armed
const TIMEOUT_POLL: Duration = Duration::from_millis(50);

/// Exit status and combined output of a finished tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// stdout and stderr lines in arrival order
    pub output: String,
}

/// Spawns external tools
pub trait CommandRunner {
    /// Run `invocation` to completion
    ///
    /// Fails with [`Error::Timeout`] if `timeout` elapses first; the child
    /// is killed in that case.
    fn run(&mut self, invocation: &Invocation, timeout: Option<Duration>) -> Result<RunOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &mut T {
    fn run(&mut self, invocation: &Invocation, timeout: Option<Duration>) -> Result<RunOutput> {
        (**self).run(invocation, timeout)
    }
}

/// [`CommandRunner`] backed by [`std::process::Command`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a process runner
    pub fn new() -> Self {
        Self
    }
}

/// Forward `stream` line by line into `lines`
///
/// Runs detached: a helper process that inherited the pipe can keep it open
/// after the tool itself is gone, and the caller must not wait for that.
fn spawn_reader<R: Read + Send + 'static>(stream: R, lines: Sender<String>) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if lines.send(line).is_err() {
                break;
            }
        }
    });
}

impl ProcessRunner {
    fn record(program: &str, line: String, output: &mut String) {
        log::info!(target: "samflash::tool", "[{}] {}", program, line);
        output.push_str(&line);
        output.push('\n');
    }

    fn kill(program: &str, child: &mut Child, limit: Duration) -> Error {
        log::error!("{} did not finish within {:?}, killing it", program, limit);
        let _ = child.kill();
        let _ = child.wait();
        Error::Timeout {
            program: program.to_string(),
            limit,
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation, timeout: Option<Duration>) -> Result<RunOutput> {
        log::debug!("Running: {}", invocation);

        let program = invocation.program.as_str();
        let mut child = Command::new(program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            spawn_reader(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, tx.clone());
        }
        drop(tx);

        let mut output = String::new();
        let Some(limit) = timeout else {
            // Both readers hang up once the pipes close
            for line in rx {
                Self::record(program, line, &mut output);
            }
            let status = child.wait()?;
            return Ok(RunOutput {
                code: status.code(),
                output,
            });
        };

        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(line) => Self::record(program, line, &mut output),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => return Err(Self::kill(program, &mut child, limit)),
            }
        }

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(RunOutput {
                    code: status.code(),
                    output,
                });
            }
            if Instant::now() >= deadline {
                return Err(Self::kill(program, &mut child, limit));
            }
            thread::sleep(TIMEOUT_POLL);
        }
    }
}

fn exit_status(invocation: &Invocation, result: &RunOutput) -> Option<Option<i32>> {
    match result.code {
        Some(0) => None,
        code => {
            log::debug!("{} exited with {:?}", invocation.program, code);
            Some(code)
        }
    }
}

/// Run a build tool and require a zero exit code
///
/// Returns the captured output on success. A non-zero exit is reported as
/// [`Error::ToolExit`].
pub fn run_checked<R: CommandRunner>(
    runner: &mut R,
    invocation: &Invocation,
    timeout: Option<Duration>,
) -> Result<String> {
    let result = runner.run(invocation, timeout)?;
    match exit_status(invocation, &result) {
        None => Ok(result.output),
        Some(code) => Err(Error::ToolExit {
            program: invocation.program.clone(),
            code,
            output: result.output,
        }),
    }
}

/// Flash the image described by `plan`
///
/// A non-zero exit of the uploader is reported as [`Error::UploaderExit`]
/// with the uploader's own exit code.
pub fn execute<R: CommandRunner>(
    runner: &mut R,
    plan: &UploadPlan,
    timeout: Option<Duration>,
) -> UploadOutcome {
    log::info!("Uploading {}", plan.artifact().display());
    let invocation = plan.invocation();
    let result = runner.run(invocation, timeout)?;
    if let Some(code) = exit_status(invocation, &result) {
        return Err(Error::UploaderExit {
            program: invocation.program.clone(),
            code,
            output: result.output,
        });
    }
    log::info!("Upload finished");
    Ok(())
}
