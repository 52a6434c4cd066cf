//! samflash-serial - Serial port access for samflash
//!
//! Real implementations of the hardware seams used by port negotiation:
//!
//! - [`SystemPorts`] lists serial devices through `serialport`
//! - [`SerialPortLine`] flushes and 1200 bps-touches a port
//!
//! # Example
//!
//! ```no_run
//! use samflash_core::port::{PortEnumerator, SerialLine};
//! use samflash_serial::{SerialPortLine, SystemPorts};
//!
//! let ports = SystemPorts::new().list_ports()?;
//! for port in ports.iter() {
//!     println!("{}", port);
//! }
//! SerialPortLine::new().touch("/dev/ttyACM0", 1200)?;
//! # Ok::<(), samflash_core::Error>(())
//! ```

use std::io;
use std::time::Duration;

use samflash_core::port::{PortEnumerator, PortSet, SerialLine};
use samflash_core::{Error, Result};
use serialport::{ClearBuffer, SerialPortType};

/// Baud rate used to open a port for flushing
const FLUSH_BAUD: u32 = 9600;
/// Time DTR/RTS are held low while flushing
const FLUSH_PULSE: Duration = Duration::from_millis(100);
/// Open timeout for flush and touch
const OPEN_TIMEOUT: Duration = Duration::from_millis(500);

fn io_error(e: serialport::Error) -> Error {
    Error::Io(io::Error::from(e))
}

/// One attached serial device, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescription {
    /// Device name/path
    pub name: String,
    /// Transport and, for USB devices, VID:PID and product strings
    pub details: String,
}

/// [`PortEnumerator`] over the serial ports the OS reports
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl SystemPorts {
    /// Create an enumerator
    pub fn new() -> Self {
        Self
    }

    /// List attached ports with their USB details
    pub fn describe(&self) -> Result<Vec<PortDescription>> {
        let ports =
            serialport::available_ports().map_err(|e| Error::Enumerate(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| PortDescription {
                details: describe_type(&p.port_type),
                name: p.port_name,
            })
            .collect())
    }
}

fn describe_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => {
            let mut s = format!("USB {:04x}:{:04x}", info.vid, info.pid);
            if let Some(m) = &info.manufacturer {
                s.push(' ');
                s.push_str(m);
            }
            if let Some(p) = &info.product {
                s.push(' ');
                s.push_str(p);
            }
            s
        }
        SerialPortType::PciPort => "PCI".into(),
        SerialPortType::BluetoothPort => "Bluetooth".into(),
        SerialPortType::Unknown => "unknown".into(),
    }
}

impl PortEnumerator for SystemPorts {
    fn list_ports(&mut self) -> Result<PortSet> {
        let ports =
            serialport::available_ports().map_err(|e| Error::Enumerate(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

/// [`SerialLine`] that opens the real device
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortLine;

impl SerialPortLine {
    /// Create a line controller
    pub fn new() -> Self {
        Self
    }
}

impl SerialLine for SerialPortLine {
    fn flush(&mut self, port: &str) -> Result<()> {
        let mut serial = serialport::new(port, FLUSH_BAUD)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(io_error)?;

        serial.clear(ClearBuffer::Input).map_err(io_error)?;
        serial.write_data_terminal_ready(false).map_err(io_error)?;
        serial.write_request_to_send(false).map_err(io_error)?;
        std::thread::sleep(FLUSH_PULSE);
        serial.write_data_terminal_ready(true).map_err(io_error)?;
        serial.write_request_to_send(true).map_err(io_error)?;
        std::thread::sleep(FLUSH_PULSE);
        serial.clear(ClearBuffer::Input).map_err(io_error)?;

        log::debug!("Flushed serial buffer of {}", port);
        Ok(())
    }

    fn touch(&mut self, port: &str, baud: u32) -> Result<()> {
        let mut serial = serialport::new(port, baud)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(io_error)?;
        // Dropping DTR with the port at 1200 baud is what resets the board
        serial.write_data_terminal_ready(false).map_err(io_error)?;
        drop(serial);

        log::debug!("Touched {} at {} baud", port, baud);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port() {
        let t = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x804d,
            serial_number: None,
            manufacturer: Some("Arduino LLC".into()),
            product: Some("Arduino Zero".into()),
        });
        assert_eq!(describe_type(&t), "USB 2341:804d Arduino LLC Arduino Zero");
        assert_eq!(describe_type(&SerialPortType::PciPort), "PCI");
    }

    #[test]
    fn test_touch_missing_port_is_error() {
        let err = SerialPortLine::new()
            .touch("/dev/samflash-does-not-exist", 1200)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
