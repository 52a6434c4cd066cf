//! Upload quirk flags

use bitflags::bitflags;

bitflags! {
    /// Bootloader quirks of a board
    ///
    /// These flags drive the port negotiation that happens before a serial
    /// upload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UploadFlags: u8 {
        /// Board re-enumerates as a new serial device when entering the
        /// bootloader; wait for it to show up
        const WAIT_FOR_UPLOAD_PORT = 1 << 0;
        /// Open/close the port at 1200 baud to reset into the bootloader
        const USE_1200BPS_TOUCH    = 1 << 1;
        /// Don't toggle DTR/RTS or drop buffered input before the upload
        const DISABLE_FLUSHING     = 1 << 2;
    }
}
