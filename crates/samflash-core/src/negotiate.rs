//! Pre-upload serial port negotiation
//!
//! Boards with a native USB bootloader reset into the bootloader when their
//! CDC port is opened at 1200 baud, and then re-enumerate as a *different*
//! serial device. The negotiator walks through:
//!
//! 1. auto-detect the port if none was given
//! 2. flush the port (unless the board disables flushing)
//! 3. snapshot the attached ports
//! 4. 1200 bps touch (if the board needs it)
//! 5. poll until a port not present in the snapshot shows up (if the board
//!    re-enumerates), bounded by a timeout
//! 6. reduce the port to a bare device name for bossac
//!
//! Flush and touch failures are expected while a board is rebooting. They
//! are logged, recorded as [`NegotiationEvent`]s and otherwise ignored.

use std::time::Duration;

use crate::backend::Protocol;
use crate::board::{BoardConfig, UploadFlags};
use crate::error::{Error, Result};
use crate::port::{Clock, PortEnumerator, PortSet, SerialLine, TOUCH_BAUD};

/// Timing of the touch and re-enumeration steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    /// Delay between two port listings
    pub poll_interval: Duration,
    /// Give up waiting for the new port after this long
    pub timeout: Duration,
    /// Pause after a successful touch so the board can drop off the bus
    pub touch_settle: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            timeout: Duration::from_secs(5),
            touch_settle: Duration::from_millis(400),
        }
    }
}

/// Something that happened during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// No port was configured; this one was picked
    AutoDetected(String),
    /// Flushing the port failed
    FlushFailed {
        /// Port being flushed
        port: String,
        /// Error from the serial layer
        reason: String,
    },
    /// 1200 bps touch succeeded
    Touched(String),
    /// 1200 bps touch failed (board may already be in the bootloader)
    TouchFailed {
        /// Port being touched
        port: String,
        /// Error from the serial layer
        reason: String,
    },
    /// The bootloader showed up on a new port
    PortAppeared(String),
    /// A device path was reduced to its bare name
    Normalized {
        /// Original value
        from: String,
        /// Bare device name
        to: String,
    },
}

/// Result of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Port to hand to the uploader
    pub port: String,
    /// What happened on the way, in order
    pub events: Vec<NegotiationEvent>,
}

impl Negotiated {
    /// True if the touch step failed and was skipped over
    pub fn touch_failed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, NegotiationEvent::TouchFailed { .. }))
    }
}

/// Strip the directory part of a device path (`/dev/ttyACM0` -> `ttyACM0`)
pub fn bare_port_name(port: &str) -> &str {
    port.rsplit('/').next().unwrap_or(port)
}

/// Drives the negotiation steps against injectable hardware and time
pub struct PortNegotiator<E, L, C> {
    enumerator: E,
    line: L,
    clock: C,
    wait: WaitSettings,
}

impl<E, L, C> PortNegotiator<E, L, C>
where
    E: PortEnumerator,
    L: SerialLine,
    C: Clock,
{
    /// Create a negotiator
    pub fn new(enumerator: E, line: L, clock: C, wait: WaitSettings) -> Self {
        Self {
            enumerator,
            line,
            clock,
            wait,
        }
    }

    /// Bring the board's port into a state `protocol`'s uploader can use
    ///
    /// `port` is the configured upload port; `None` or an empty string
    /// means auto-detect.
    pub fn negotiate(
        &mut self,
        port: Option<&str>,
        board: &BoardConfig,
        protocol: Protocol,
    ) -> Result<Negotiated> {
        let flags = board.upload_flags;
        let mut events = Vec::new();

        let mut port = match port.filter(|p| !p.is_empty()) {
            Some(p) => Some(p.to_string()),
            None => self.autodetect(&mut events)?,
        };

        if let Some(p) = &port {
            if !flags.contains(UploadFlags::DISABLE_FLUSHING) {
                if let Err(e) = self.line.flush(p) {
                    log::debug!("Flushing {} failed, continuing: {}", p, e);
                    events.push(NegotiationEvent::FlushFailed {
                        port: p.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let before = self.enumerator.list_ports()?;
        log::trace!("Ports before touch: {:?}", before);

        if flags.contains(UploadFlags::USE_1200BPS_TOUCH) {
            match &port {
                Some(p) => self.touch(p, &mut events),
                None => log::warn!("No upload port to touch, skipping 1200 bps reset"),
            }
        }

        if flags.contains(UploadFlags::WAIT_FOR_UPLOAD_PORT) {
            let new_port = self.wait_for_new_port(&before)?;
            log::info!("Found upload port {}", new_port);
            events.push(NegotiationEvent::PortAppeared(new_port.clone()));
            port = Some(new_port);
        }

        let Some(mut port) = port else {
            return Err(Error::PortNotFound {
                waited: Duration::ZERO,
            });
        };

        if protocol.wants_bare_port_name() && port.contains('/') {
            let bare = bare_port_name(&port).to_string();
            log::debug!("Using bare port name {} for {}", bare, protocol.uploader());
            events.push(NegotiationEvent::Normalized {
                from: std::mem::replace(&mut port, bare.clone()),
                to: bare,
            });
        }

        Ok(Negotiated { port, events })
    }

    fn autodetect(&mut self, events: &mut Vec<NegotiationEvent>) -> Result<Option<String>> {
        let ports = self.enumerator.list_ports()?;
        match ports.best_candidate() {
            Some(p) => {
                log::info!("Auto-detected upload port: {}", p);
                events.push(NegotiationEvent::AutoDetected(p.to_string()));
                Ok(Some(p.to_string()))
            }
            None => {
                log::warn!("No serial port found for auto-detection");
                Ok(None)
            }
        }
    }

    fn touch(&mut self, port: &str, events: &mut Vec<NegotiationEvent>) {
        match self.line.touch(port, TOUCH_BAUD) {
            Ok(()) => {
                log::debug!("1200 bps touch on {}", port);
                events.push(NegotiationEvent::Touched(port.to_string()));
                self.clock.sleep(self.wait.touch_settle);
            }
            Err(e) => {
                // Expected when the board already sits in its bootloader
                log::warn!("1200 bps touch on {} failed, continuing: {}", port, e);
                events.push(NegotiationEvent::TouchFailed {
                    port: port.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn wait_for_new_port(&mut self, before: &PortSet) -> Result<String> {
        log::info!("Waiting for the new upload port...");
        let start = self.clock.now();
        loop {
            let now = self.enumerator.list_ports()?;
            if let Some(p) = now.newly_appeared(before) {
                return Ok(p.to_string());
            }

            let waited = self.clock.now().saturating_sub(start);
            if waited >= self.wait.timeout {
                log::error!("No new serial port appeared within {:?}", self.wait.timeout);
                return Err(Error::PortNotFound { waited });
            }
            self.clock.sleep(self.wait.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::test_boards::board;
    use crate::testing::{FakeClock, FakeLine, LineCall, ScriptedPorts};

    fn flagged(flags: UploadFlags) -> BoardConfig {
        let mut b = board("sodaq_autonomo", "sam-ba");
        b.upload_flags = flags;
        b
    }

    fn negotiator<'a>(
        ports: &'a mut ScriptedPorts,
        line: &'a mut FakeLine,
        clock: &'a mut FakeClock,
    ) -> PortNegotiator<&'a mut ScriptedPorts, &'a mut FakeLine, &'a mut FakeClock> {
        PortNegotiator::new(ports, line, clock, WaitSettings::default())
    }

    #[test]
    fn test_pass_through_without_wait() {
        for flags in [
            UploadFlags::empty(),
            UploadFlags::USE_1200BPS_TOUCH,
            UploadFlags::DISABLE_FLUSHING,
            UploadFlags::USE_1200BPS_TOUCH | UploadFlags::DISABLE_FLUSHING,
        ] {
            let mut ports = ScriptedPorts::new([vec!["COM3"], vec!["COM3", "COM9"]]);
            let mut line = FakeLine::default();
            let mut clock = FakeClock::default();
            let result = negotiator(&mut ports, &mut line, &mut clock)
                .negotiate(Some("COM3"), &flagged(flags), Protocol::Stk500v2)
                .unwrap();
            assert_eq!(result.port, "COM3");
        }
    }

    #[test]
    fn test_flush_and_touch_order() {
        let mut ports = ScriptedPorts::new([vec!["/dev/ttyACM0"]]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("/dev/ttyACM0"),
                &flagged(UploadFlags::USE_1200BPS_TOUCH),
                Protocol::Stk500v2,
            )
            .unwrap();
        assert_eq!(
            line.calls,
            [
                LineCall::Flush("/dev/ttyACM0".into()),
                LineCall::Touch("/dev/ttyACM0".into(), 1200)
            ]
        );
        // settle delay after the touch
        assert_eq!(clock.now(), Duration::from_millis(400));
    }

    #[test]
    fn test_disable_flushing() {
        let mut ports = ScriptedPorts::new([vec!["COM3"]]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("COM3"),
                &flagged(UploadFlags::DISABLE_FLUSHING),
                Protocol::SamBa,
            )
            .unwrap();
        assert!(line.calls.is_empty());
    }

    #[test]
    fn test_transient_failures_are_recorded() {
        let mut ports = ScriptedPorts::new([vec!["COM3"]]);
        let mut line = FakeLine {
            fail_flush: true,
            fail_touch: true,
            ..Default::default()
        };
        let mut clock = FakeClock::default();
        let result = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("COM3"),
                &flagged(UploadFlags::USE_1200BPS_TOUCH),
                Protocol::SamBa,
            )
            .unwrap();
        assert_eq!(result.port, "COM3");
        assert!(result.touch_failed());
        assert!(matches!(
            result.events[0],
            NegotiationEvent::FlushFailed { ref port, .. } if port == "COM3"
        ));
        assert!(matches!(
            result.events[1],
            NegotiationEvent::TouchFailed { ref port, .. } if port == "COM3"
        ));
        // no settle delay when the touch failed
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_wait_times_out() {
        let mut ports = ScriptedPorts::new([Vec::<&str>::new()]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        let err = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("COM3"),
                &flagged(UploadFlags::WAIT_FOR_UPLOAD_PORT),
                Protocol::SamBa,
            )
            .unwrap_err();
        match err {
            Error::PortNotFound { waited } => assert!(waited >= Duration::from_secs(5)),
            other => panic!("unexpected error: {other}"),
        }
        // bounded: 5s / 250ms polls plus the first one, plus the snapshot
        assert!(ports.calls <= 22, "polled {} times", ports.calls);
    }

    #[test]
    fn test_wait_picks_new_port() {
        let mut ports = ScriptedPorts::new([
            vec!["COM3"],
            vec![],
            vec![],
            vec!["COM3", "COM7"],
        ]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        let result = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("COM3"),
                &flagged(UploadFlags::WAIT_FOR_UPLOAD_PORT),
                Protocol::Stk500v2,
            )
            .unwrap();
        assert_eq!(result.port, "COM7");
        assert_eq!(
            result.events.last(),
            Some(&NegotiationEvent::PortAppeared("COM7".into()))
        );
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn test_bossac_gets_bare_name() {
        let mut ports = ScriptedPorts::new([vec!["/dev/ttyACM0"]]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        let result = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(Some("/dev/ttyACM0"), &flagged(UploadFlags::empty()), Protocol::SamBa)
            .unwrap();
        assert_eq!(result.port, "ttyACM0");
        assert_eq!(
            result.events,
            [NegotiationEvent::Normalized {
                from: "/dev/ttyACM0".into(),
                to: "ttyACM0".into()
            }]
        );

        let mut ports = ScriptedPorts::new([vec!["/dev/ttyACM0"]]);
        let result = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(
                Some("/dev/ttyACM0"),
                &flagged(UploadFlags::empty()),
                Protocol::Stk500v2,
            )
            .unwrap();
        assert_eq!(result.port, "/dev/ttyACM0");
    }

    #[test]
    fn test_autodetect() {
        let mut ports = ScriptedPorts::new([vec!["/dev/ttyS0", "/dev/ttyACM1"]]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        let result = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(None, &flagged(UploadFlags::empty()), Protocol::Stk500v2)
            .unwrap();
        assert_eq!(result.port, "/dev/ttyACM1");
        assert_eq!(
            result.events[0],
            NegotiationEvent::AutoDetected("/dev/ttyACM1".into())
        );
    }

    #[test]
    fn test_nothing_to_detect() {
        let mut ports = ScriptedPorts::new([Vec::<&str>::new()]);
        let mut line = FakeLine::default();
        let mut clock = FakeClock::default();
        let err = negotiator(&mut ports, &mut line, &mut clock)
            .negotiate(Some(""), &flagged(UploadFlags::USE_1200BPS_TOUCH), Protocol::SamBa)
            .unwrap_err();
        assert!(matches!(err, Error::PortNotFound { .. }));
        assert!(line.calls.is_empty());
    }

    #[test]
    fn test_bare_port_name() {
        assert_eq!(bare_port_name("/dev/ttyACM0"), "ttyACM0");
        assert_eq!(bare_port_name("/dev/cu.usbmodem1411"), "cu.usbmodem1411");
        assert_eq!(bare_port_name("COM7"), "COM7");
    }
}
