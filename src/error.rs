use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = ::std::result::Result<T, LoaderError>;

/// Broad category of a [`LoaderError`].
///
/// Callers use this to decide whether retrying makes sense: configuration and
/// capability errors need a different request, transport errors need the
/// session to be closed and reopened, framing errors usually mean the protocol
/// version does not match the ROM running on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing configuration, caught before any I/O.
    Configuration,
    /// The request exceeds what the cart can do, caught before streaming.
    Capability,
    /// USB or stream I/O failed.
    Transport,
    /// A received frame did not match its declared layout.
    Framing,
    /// The caller asked for the upload to stop.
    Cancelled,
}

/// Error type for this crate.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// A raw value does not name a variant of the enumeration.
    #[error("invalid {what} value: {value}")]
    InvalidEnumerant { what: &'static str, value: i64 },
    /// No ROM has been configured.
    #[error("rom path not set")]
    RomNotSet,
    /// The ROM path is empty.
    #[error("rom path is empty")]
    InvalidRomPath,
    /// The ROM size is zero.
    #[error("rom size must not be zero")]
    InvalidRomSize,
    /// No cart type is selected, so no capability is known.
    #[error("no cart type selected")]
    NoCartSelected,
    /// `open` was called before a successful `find`.
    #[error("no device selected, call find first")]
    NoDeviceSelected,

    /// The ROM does not fit in the cart.
    #[error("rom size {size:#x} exceeds the cart maximum of {max:#x}")]
    RomTooLarge { size: u32, max: u32 },
    /// The data frame payload does not fit in one frame.
    #[error("data size {size:#x} exceeds the maximum of {max:#x}")]
    DataTooLarge { size: usize, max: usize },
    /// The opened cart cannot use the debug channel.
    #[error("cart does not support debug mode")]
    DebugUnsupported,

    /// USB device not found.
    #[error("usb device not found")]
    DeviceNotFound,
    /// The device is already claimed.
    #[error("usb device is busy")]
    DeviceBusy,
    /// No session is open.
    #[error("device not open")]
    DeviceNotOpen,
    /// The device answered the probe with something other than a flashcart.
    #[error("device is not a supported flashcart")]
    NotCart,
    /// Failed to create the USB context.
    #[error("failed to initialize usb context: {0}")]
    UsbContextFailure(rusb::Error),
    /// Failed to enumerate or open the USB device.
    #[error("failed to open usb device: {0}")]
    UsbOpenFailure(rusb::Error),
    /// Failed to get USB bulk endpoints.
    #[error("failed to get usb bulk endpoints")]
    UsbEndpointsNotFound,
    /// Failed to detach USB kernel driver.
    #[error("failed to detach usb kernel driver: {0}")]
    UsbDetachKernelDriverFailure(rusb::Error),
    /// Failed to claim USB interface.
    #[error("failed to claim usb interface: {0}")]
    UsbClaimInterfaceFailure(rusb::Error),
    /// Failed to read from USB bulk endpoint.
    #[error("failed to read bulk: {0}")]
    UsbReadBulkFailure(rusb::Error),
    /// Failed to write to USB bulk endpoint.
    #[error("failed to write bulk: {0}")]
    UsbWriteBulkFailure(rusb::Error),
    /// The USB bulk endpoint accepted no bytes.
    #[error("usb write accepted zero bytes")]
    UsbWriteZero,
    /// A vendor control request failed.
    #[error("failed usb control request {request:#04x}: {source}")]
    UsbControlFailure { request: u8, source: rusb::Error },
    /// The device stopped answering in the middle of a reply.
    #[error("timed out waiting for the device")]
    Timeout,
    /// Failed to read the ROM stream.
    #[error("failed to read rom: {0}")]
    RomReadFailure(#[from] std::io::Error),

    /// Failed to serialize command for device.
    #[error("cmd failed to binary serialize: {0}")]
    CmdSerializeFailure(bincode::Error),
    /// Failed to deserialize reply from device.
    #[error("reply failed to binary deserialize: {0}")]
    CmdDeserializeFailure(bincode::Error),
    /// The completion token does not belong to the command sent.
    #[error("command {cmd:#04x} got an unexpected reply {reply:02x?}")]
    CmdReplyMismatch { cmd: u8, reply: [u8; 4] },
    /// The cart reported that a command failed.
    #[error("cart rejected command {0:#04x}")]
    CmdFailed(u8),
    /// Cart firmware is older than what this crate speaks.
    #[error("unsupported firmware version {major}.{minor}")]
    FirmwareUnsupported { major: u16, minor: u16 },

    /// The received frame carried fewer bytes than its header declared.
    #[error("frame declared {declared} bytes but {received} arrived")]
    FramingMismatch { declared: usize, received: usize },
    /// The frame did not start with the expected signature.
    #[error("bad frame signature {0:02x?}")]
    BadFrameSignature([u8; 4]),
    /// The frame did not end with the completion signal.
    #[error("bad frame completion signal {0:02x?}")]
    BadCompletionSignal([u8; 4]),
    /// The frame header names no known data type.
    #[error("unknown data type {0:#04x}")]
    UnknownDataType(u8),
    /// The heartbeat payload is too short.
    #[error("malformed heartbeat")]
    MalformedHeartbeat,
    /// The heartbeat names a protocol newer than this crate.
    #[error("usb protocol {0} unsupported")]
    UnsupportedProtocol(u16),
    /// The heartbeat format itself is unknown.
    #[error("heartbeat version {0} unsupported")]
    UnsupportedHeartbeat(u16),

    /// The upload was cancelled by the caller.
    #[error("upload cancelled")]
    UploadCancelled,
}

impl LoaderError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        use LoaderError::*;

        match self {
            InvalidEnumerant { .. }
            | RomNotSet
            | InvalidRomPath
            | InvalidRomSize
            | NoCartSelected
            | NoDeviceSelected => ErrorKind::Configuration,

            RomTooLarge { .. } | DataTooLarge { .. } | DebugUnsupported => ErrorKind::Capability,

            DeviceNotFound
            | DeviceBusy
            | DeviceNotOpen
            | NotCart
            | UsbContextFailure(_)
            | UsbOpenFailure(_)
            | UsbEndpointsNotFound
            | UsbDetachKernelDriverFailure(_)
            | UsbClaimInterfaceFailure(_)
            | UsbReadBulkFailure(_)
            | UsbWriteBulkFailure(_)
            | UsbWriteZero
            | UsbControlFailure { .. }
            | Timeout
            | RomReadFailure(_)
            | CmdSerializeFailure(_)
            | CmdDeserializeFailure(_)
            | CmdReplyMismatch { .. }
            | CmdFailed(_)
            | FirmwareUnsupported { .. } => ErrorKind::Transport,

            FramingMismatch { .. }
            | BadFrameSignature(_)
            | BadCompletionSignal(_)
            | UnknownDataType(_)
            | MalformedHeartbeat
            | UnsupportedProtocol(_)
            | UnsupportedHeartbeat(_) => ErrorKind::Framing,

            UploadCancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(LoaderError::RomNotSet.kind(), ErrorKind::Configuration);
        assert_eq!(
            LoaderError::RomTooLarge { size: 2, max: 1 }.kind(),
            ErrorKind::Capability
        );
        assert_eq!(
            LoaderError::UsbWriteBulkFailure(rusb::Error::Io).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            LoaderError::FramingMismatch {
                declared: 8,
                received: 4
            }
            .kind(),
            ErrorKind::Framing
        );
        assert_eq!(LoaderError::UploadCancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_display() {
        let e = LoaderError::RomTooLarge {
            size: 0x4000001,
            max: 0x4000000,
        };
        assert_eq!(
            e.to_string(),
            "rom size 0x4000001 exceeds the cart maximum of 0x4000000"
        );
    }
}
