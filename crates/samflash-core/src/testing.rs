//! In-memory stand-ins for serial hardware, time and subprocesses

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, RunOutput};
use crate::plan::Invocation;
use crate::port::{Clock, PortEnumerator, PortSet, SerialLine};

/// Clock that only moves when slept on
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Duration,
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
    }
}

/// Replays a list of snapshots; the last one repeats forever
#[derive(Debug)]
pub struct ScriptedPorts {
    script: VecDeque<PortSet>,
    pub calls: usize,
}

impl ScriptedPorts {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = Vec<S>>,
        S: Into<String>,
    {
        Self {
            script: script
                .into_iter()
                .map(|ports| ports.into_iter().collect())
                .collect(),
            calls: 0,
        }
    }
}

impl PortEnumerator for ScriptedPorts {
    fn list_ports(&mut self) -> Result<PortSet> {
        self.calls += 1;
        if self.script.len() > 1 {
            Ok(self.script.pop_front().unwrap_or_default())
        } else {
            Ok(self.script.front().cloned().unwrap_or_default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCall {
    Flush(String),
    Touch(String, u32),
}

/// Records line operations, optionally failing them
#[derive(Debug, Default)]
pub struct FakeLine {
    pub calls: Vec<LineCall>,
    pub fail_flush: bool,
    pub fail_touch: bool,
}

impl SerialLine for FakeLine {
    fn flush(&mut self, port: &str) -> Result<()> {
        self.calls.push(LineCall::Flush(port.to_string()));
        if self.fail_flush {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        Ok(())
    }

    fn touch(&mut self, port: &str, baud: u32) -> Result<()> {
        self.calls.push(LineCall::Touch(port.to_string(), baud));
        if self.fail_touch {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device busy",
            )));
        }
        Ok(())
    }
}

/// Records invocations and answers with an exit code per program
#[derive(Debug, Default)]
pub struct FakeRunner {
    pub invocations: Vec<Invocation>,
    /// Exit code of programs without an entry in `exit_codes`
    pub exit_code: i32,
    pub exit_codes: HashMap<String, i32>,
}

impl FakeRunner {
    /// Make `program` exit with `code`; everything else keeps `exit_code`
    pub fn failing(mut self, program: &str, code: i32) -> Self {
        self.exit_codes.insert(program.to_string(), code);
        self
    }
}

impl CommandRunner for FakeRunner {
    fn run(&mut self, invocation: &Invocation, _timeout: Option<Duration>) -> Result<RunOutput> {
        self.invocations.push(invocation.clone());
        let code = self
            .exit_codes
            .get(&invocation.program)
            .copied()
            .unwrap_or(self.exit_code);
        Ok(RunOutput {
            code: Some(code),
            output: format!("{} done\n", invocation.program),
        })
    }
}
