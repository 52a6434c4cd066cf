//! Serial port snapshots and the hardware seams of port negotiation
//!
//! The negotiator never touches hardware or real time directly. It goes
//! through three traits:
//!
//! - [`PortEnumerator`] lists the serial devices currently attached
//! - [`SerialLine`] flushes and touches a port
//! - [`Clock`] measures elapsed time and sleeps
//!
//! `samflash-serial` provides the real implementations.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Baud rate that makes SAM-BA/Caterina style bootloaders reset
pub const TOUCH_BAUD: u32 = 1200;

/// Set of serial port identifiers captured at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSet {
    ports: BTreeSet<String>,
}

impl PortSet {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the port is part of this snapshot
    pub fn contains(&self, port: &str) -> bool {
        self.ports.contains(port)
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns true if no port was visible
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Iterate over port names in sorted order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.ports.iter().map(String::as_str)
    }

    /// First port of `self` that is absent from `before`
    pub fn newly_appeared(&self, before: &PortSet) -> Option<&str> {
        self.ports
            .iter()
            .find(|p| !before.ports.contains(*p))
            .map(String::as_str)
    }

    /// Pick the most likely upload port
    ///
    /// Prefers USB serial devices. Among those the highest device number
    /// wins (`COM10` over `COM9`), which is the most recently enumerated
    /// device on every OS we know of.
    pub fn best_candidate(&self) -> Option<&str> {
        self.iter()
            .filter(|p| is_usb_serial_name(p))
            .max_by(|a, b| numbered_order(a, b))
            .or_else(|| self.iter().max_by(|a, b| numbered_order(a, b)))
    }
}

impl<S: Into<String>> FromIterator<S> for PortSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ports: iter.into_iter().map(Into::into).collect(),
        }
    }
}

static USB_SERIAL_PATTERNS: [&str; 7] = [
    "ttyACM",
    "ttyUSB",
    "cu.usbmodem",
    "tty.usbmodem",
    "cu.usbserial",
    "tty.usbserial",
    "COM",
];

/// Split `ttyACM10` into (`ttyACM`, 10); names without a trailing number
/// sort before numbered ones with the same stem
fn numbered_key(port: &str) -> (&str, Option<u64>) {
    let stem = port.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = port[stem.len()..].parse().ok();
    (stem, number)
}

fn numbered_order(a: &str, b: &str) -> Ordering {
    numbered_key(a)
        .cmp(&numbered_key(b))
        .then_with(|| a.cmp(b))
}

fn is_usb_serial_name(port: &str) -> bool {
    let name = port.rsplit('/').next().unwrap_or(port);
    USB_SERIAL_PATTERNS.iter().any(|p| name.starts_with(p))
}

/// Lists the serial ports currently visible to the OS
pub trait PortEnumerator {
    /// Take a snapshot of the attached serial ports
    fn list_ports(&mut self) -> Result<PortSet>;
}

/// Low level line control on a serial port
pub trait SerialLine {
    /// Toggle DTR/RTS and drop pending input
    fn flush(&mut self, port: &str) -> Result<()>;

    /// Open the port at `baud` and close it again
    fn touch(&mut self, port: &str, baud: u32) -> Result<()>;
}

/// Time source for polling loops
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;

    /// Block for `duration`
    fn sleep(&mut self, duration: Duration);
}

/// [`Clock`] backed by [`Instant`] and [`std::thread::sleep`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<T: PortEnumerator + ?Sized> PortEnumerator for &mut T {
    fn list_ports(&mut self) -> Result<PortSet> {
        (**self).list_ports()
    }
}

impl<T: SerialLine + ?Sized> SerialLine for &mut T {
    fn flush(&mut self, port: &str) -> Result<()> {
        (**self).flush(port)
    }

    fn touch(&mut self, port: &str, baud: u32) -> Result<()> {
        (**self).touch(port, baud)
    }
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newly_appeared() {
        let before: PortSet = ["COM3"].into_iter().collect();
        let after: PortSet = ["COM3", "COM7"].into_iter().collect();
        assert_eq!(after.newly_appeared(&before), Some("COM7"));
        assert_eq!(before.newly_appeared(&after), None);
        assert_eq!(before.newly_appeared(&before), None);
    }

    #[test]
    fn test_best_candidate_prefers_usb() {
        let ports: PortSet = ["/dev/ttyS0", "/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyS4"]
            .into_iter()
            .collect();
        assert_eq!(ports.best_candidate(), Some("/dev/ttyACM1"));

        let plain: PortSet = ["/dev/ttyS0"].into_iter().collect();
        assert_eq!(plain.best_candidate(), Some("/dev/ttyS0"));

        assert_eq!(PortSet::new().best_candidate(), None);
    }

    #[test]
    fn test_best_candidate_compares_numbers() {
        let com: PortSet = ["COM9", "COM10", "COM2"].into_iter().collect();
        assert_eq!(com.best_candidate(), Some("COM10"));

        let acm: PortSet = ["/dev/ttyACM9", "/dev/ttyACM10", "/dev/ttyS12"]
            .into_iter()
            .collect();
        assert_eq!(acm.best_candidate(), Some("/dev/ttyACM10"));

        let plain: PortSet = ["/dev/ttyS9", "/dev/ttyS10"].into_iter().collect();
        assert_eq!(plain.best_candidate(), Some("/dev/ttyS10"));
    }

    #[test]
    fn test_newly_appeared_ignores_vanished_ports() {
        let before: PortSet = ["/dev/ttyACM0", "/dev/ttyS0"].into_iter().collect();
        let after: PortSet = ["/dev/ttyACM1", "/dev/ttyS0"].into_iter().collect();
        assert_eq!(after.newly_appeared(&before), Some("/dev/ttyACM1"));
    }
}
