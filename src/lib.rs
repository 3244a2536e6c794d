//! Uploading ROMs to N64 flashcarts and talking to the ROM running on the
//! console over USB.
//!
//! <br>
//!
//! The supported carts (64drive, EverDrive-64 and SummerCart64) all sit
//! behind an FTDI USB bridge. A [`Device`] finds one of them, claims it,
//! streams a ROM image to it with the padding the cart needs, and then
//! exchanges typed data frames with the debug library linked into the ROM.
//!
//! Upload progress and cancellation live in an [`UploadState`] shared through
//! an `Arc`, so a UI thread can watch or stop an upload running elsewhere.
//!
//! # Example
//!
//! Upload a ROM and print what the console sends back.
//!
//! ```rust,no_run
//! use std::fs::File;
//!
//! use cartlink_rs::{DataType, Device, LoaderError, RusbBus};
//!
//! fn main() -> cartlink_rs::Result<()> {
//!     let mut device = Device::new(RusbBus::new()?);
//!     let cart = device.find()?;
//!     println!("found {:?}", cart);
//!     device.open()?;
//!
//!     let mut rom = File::open("game.z64")?;
//!     let size = u32::try_from(rom.metadata()?.len())
//!         .map_err(|_| LoaderError::InvalidRomSize)?;
//!     device.send_rom(&mut rom, size)?;
//!
//!     loop {
//!         if let Some(frame) = device.poll_message()? {
//!             if frame.datatype() == DataType::Text {
//!                 print!("{}", String::from_utf8_lossy(frame.data()));
//!             }
//!         }
//!     }
//! }
//! ```

/// FTDI USB Vendor ID, shared by every supported cart
pub const FTDI_VID: u16 = 0x0403;

/// Error Module
pub mod error;
pub use error::{ErrorKind, LoaderError, Result};

/// Configuration Module
pub mod config;
pub use config::{CartType, CicType, Config, RomInfo, SaveType};

/// Data Frame Module
pub mod protocol;
pub use protocol::{
    DataFrame, DataHeader, DataType, Heartbeat, ProtocolVersion, MAX_DATA_SIZE,
    USBPROTOCOL_LATEST,
};

/// Upload Progress Module
pub mod upload;
pub use upload::UploadState;

/// ROM Image Module
pub mod rom;
pub use rom::RomByteOrder;

/// CIC Detection Module
pub mod cic;
pub use cic::detect_cic;

/// USB Transport Module
pub mod usb;
pub use usb::{BitMode, Control, RusbBus, RusbTransport, Transport, UsbBus, UsbDeviceInfo};

mod cart;
pub use cart::{CartCapabilities, UPLOAD_CHUNK_SIZE};

mod cmd;

/// Device Session Module
pub mod device;
pub use device::Device;
