use std::io::Read;
use std::sync::Arc;

use crate::cart::{CartCapabilities, CartLink, UPLOAD_CHUNK_SIZE};
use crate::cic::detect_cic;
use crate::config::{CartType, CicType, Config};
use crate::error::{LoaderError, Result};
use crate::protocol::{self, DataFrame, DataType, Heartbeat, ProtocolVersion};
use crate::protocol::{MAX_DATA_SIZE, USBPROTOCOL_LATEST};
use crate::rom::RomByteOrder;
use crate::upload::UploadState;
use crate::usb::{UsbBus, UsbDeviceInfo};

struct Session<T> {
    transport: T,
    link: CartLink,
    cart: CartType,
}

/// A flashcart reached through a [`UsbBus`].
///
/// Holds the upload configuration, the protocol version used for data frames,
/// and at most one open session. Every transfer borrows the device mutably,
/// so only one runs at a time and the protocol version cannot change under it.
/// Upload progress and cancellation are shared separately through
/// [`Device::upload_state`].
pub struct Device<B: UsbBus> {
    bus: B,
    config: Config,
    protocol: ProtocolVersion,
    upload: Arc<UploadState>,
    found: Option<(UsbDeviceInfo, CartType)>,
    session: Option<Session<B::Transport>>,
}

impl<B: UsbBus> Device<B> {
    pub fn new(bus: B) -> Self {
        Device {
            bus,
            config: Config::new(),
            protocol: USBPROTOCOL_LATEST,
            upload: Arc::new(UploadState::new()),
            found: None,
            session: None,
        }
    }

    /// Looks for a connected cart.
    ///
    /// If a cart type is already configured only that cart is considered,
    /// otherwise the first recognized cart wins and becomes the configured
    /// cart type. Nothing changes when no cart is found.
    pub fn find(&mut self) -> Result<CartType> {
        let wanted = self.config.cart();
        let (info, cart) = self
            .bus
            .devices()?
            .into_iter()
            .find_map(|info| {
                let cart = CartType::detect(&info)?;
                (wanted == CartType::None || wanted == cart).then_some((info, cart))
            })
            .ok_or(LoaderError::DeviceNotFound)?;

        log::info!("found {:?} at {}", cart, info);
        self.config.set_cart(cart);
        self.found = Some((info, cart));
        Ok(cart)
    }

    /// Claims the cart found by [`Device::find`] and runs its handshake.
    pub fn open(&mut self) -> Result<()> {
        let (info, cart) = self.found.as_ref().ok_or(LoaderError::NoDeviceSelected)?;
        if self.session.is_some() {
            return Err(LoaderError::DeviceBusy);
        }

        let mut transport = self.bus.open(info)?;
        let link = CartLink::open(*cart, &mut transport)?;
        log::info!("opened {:?}", cart);

        self.session = Some(Session {
            transport,
            link,
            cart: *cart,
        });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the open cart can run the debug channel with the current
    /// configuration.
    pub fn test_debug(&self) -> Result<bool> {
        let session = self.session.as_ref().ok_or(LoaderError::DeviceNotOpen)?;
        session.link.test_debug(&self.config)
    }

    /// Releases the cart. Fails with [`LoaderError::DeviceNotOpen`] if there
    /// was nothing to release.
    pub fn close(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(LoaderError::DeviceNotOpen)?;
        log::info!("closing {:?}", session.cart);
        Ok(())
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Sets the protocol version used to frame data. No handshake is made; a
    /// mismatch with the ROM shows up as framing errors.
    pub fn set_protocol(&mut self, version: ProtocolVersion) {
        log::debug!("usb protocol set to {:?}", version);
        self.protocol = version;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Capabilities of the open cart, or of the configured cart while no
    /// session is open.
    pub fn capabilities(&self) -> Result<CartCapabilities> {
        let cart = match &self.session {
            Some(session) => session.cart,
            None => self.config.cart(),
        };
        cart.capabilities().ok_or(LoaderError::NoCartSelected)
    }

    pub fn max_rom_size(&self) -> Result<u32> {
        Ok(self.capabilities()?.max_rom_size)
    }

    /// Zero bytes appended after a ROM of `size` bytes on upload.
    pub fn rom_padding(&self, size: u32) -> Result<u32> {
        Ok(self.capabilities()?.rom_padding(size))
    }

    pub fn supports_explicit_cic(&self) -> Result<bool> {
        Ok(self.capabilities()?.explicit_cic)
    }

    /// Picks the CIC from the ROM bootcode if the cart needs to be told and
    /// none is configured yet. Unknown bootcodes fall back to the 6102.
    ///
    /// Returns whether the configured CIC changed.
    pub fn explicit_cic(&mut self, header: &[u8]) -> Result<bool> {
        if !self.supports_explicit_cic()? || self.config.cic() != CicType::None {
            return Ok(false);
        }

        let cic = detect_cic(header).unwrap_or_else(|| {
            log::warn!("unknown bootcode, assuming a 6102 cic");
            CicType::Cic6102
        });
        log::info!("detected {:?}", cic);
        self.config.set_cic(cic);
        Ok(true)
    }

    /// Streams `size` bytes of ROM from `source` to the cart, followed by the
    /// padding the cart needs.
    ///
    /// Progress is published after every chunk and reaches 1.0 only when the
    /// whole image went through. A cancellation is noticed before the next
    /// chunk and returns [`LoaderError::UploadCancelled`]. After any other
    /// error the cart is in an undefined state and should be reopened.
    pub fn send_rom<R: Read + ?Sized>(&mut self, source: &mut R, size: u32) -> Result<()> {
        let session = self.session.as_mut().ok_or(LoaderError::DeviceNotOpen)?;
        let caps = session
            .cart
            .capabilities()
            .ok_or(LoaderError::NoCartSelected)?;
        if size == 0 {
            return Err(LoaderError::InvalidRomSize);
        }
        if size > caps.max_rom_size {
            return Err(LoaderError::RomTooLarge {
                size,
                max: caps.max_rom_size,
            });
        }

        let padded = size + caps.rom_padding(size);
        let _guard = self.upload.begin();
        log::info!(
            "uploading {:#x} bytes ({:#x} padding) to {:?}",
            size,
            padded - size,
            session.cart
        );

        session
            .link
            .begin_upload(&mut session.transport, &self.config, padded)?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut order = RomByteOrder::Unknown;
        let mut sent = 0u32;
        while sent < padded {
            if self.upload.is_cancelled() {
                log::info!("upload cancelled at {:#x}", sent);
                return Err(LoaderError::UploadCancelled);
            }

            let len = (padded - sent).min(UPLOAD_CHUNK_SIZE as u32) as usize;
            let chunk = &mut buf[..len];
            let from_rom = ((size.saturating_sub(sent)) as usize).min(len);
            source.read_exact(&mut chunk[..from_rom])?;
            chunk[from_rom..].fill(0);

            if sent == 0 {
                order = RomByteOrder::detect(chunk);
                log::debug!("rom byte order {:?}", order);
            }
            order.to_big_endian(chunk);

            session
                .link
                .write_chunk(&mut session.transport, sent, chunk)?;
            sent += len as u32;
            log::trace!("sent {:#x}/{:#x}", sent, padded);

            if sent < padded {
                self.upload.advance(sent as f32 / padded as f32);
            }
        }

        session.link.end_upload(&mut session.transport)?;
        self.upload.advance(1.0);
        log::info!("upload complete");
        Ok(())
    }

    /// [`Device::send_rom`] with the size recorded by [`Config::set_rom`].
    pub fn send_configured_rom<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<()> {
        let size = self.config.rom().ok_or(LoaderError::RomNotSet)?.size;
        self.send_rom(source, size)
    }

    /// Sends one frame to the ROM running on the console.
    pub fn send_data(&mut self, datatype: DataType, payload: &[u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or(LoaderError::DeviceNotOpen)?;
        if !session.link.test_debug(&self.config)? {
            return Err(LoaderError::DebugUnsupported);
        }
        if payload.len() > MAX_DATA_SIZE {
            return Err(LoaderError::DataTooLarge {
                size: payload.len(),
                max: MAX_DATA_SIZE,
            });
        }

        log::debug!("sending {:?} frame of {} bytes", datatype, payload.len());
        session
            .link
            .send_frame(&mut session.transport, self.protocol, datatype, payload)
    }

    /// Sends `text` as a NUL terminated text frame.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        self.send_data(DataType::Text, &payload)
    }

    /// Returns the next frame if one is waiting.
    pub fn try_receive_data(&mut self) -> Result<Option<DataFrame>> {
        let session = self.session.as_mut().ok_or(LoaderError::DeviceNotOpen)?;
        if !session.link.test_debug(&self.config)? {
            return Err(LoaderError::DebugUnsupported);
        }
        let frame = session
            .link
            .receive_frame(&mut session.transport, self.protocol)?;
        if let Some(frame) = &frame {
            log::debug!(
                "received {:?} frame of {} bytes",
                frame.datatype(),
                frame.data().len()
            );
        }
        Ok(frame)
    }

    /// Waits for the next frame.
    pub fn receive_data(&mut self) -> Result<DataFrame> {
        loop {
            if let Some(frame) = self.try_receive_data()? {
                return Ok(frame);
            }
        }
    }

    /// Switches to the protocol version announced by a heartbeat frame.
    pub fn handle_heartbeat(&mut self, frame: &DataFrame) -> Result<Heartbeat> {
        let heartbeat = protocol::parse_heartbeat(frame.data())?;
        if heartbeat.protocol != self.protocol {
            log::info!("rom speaks usb protocol {:?}", heartbeat.protocol);
        }
        self.protocol = heartbeat.protocol;
        Ok(heartbeat)
    }

    /// Like [`Device::try_receive_data`], but applies heartbeats instead of
    /// returning them.
    pub fn poll_message(&mut self) -> Result<Option<DataFrame>> {
        while let Some(frame) = self.try_receive_data()? {
            if frame.datatype() != DataType::Heartbeat {
                return Ok(Some(frame));
            }
            self.handle_heartbeat(&frame)?;
        }
        Ok(None)
    }

    /// Shared progress and cancellation of ROM uploads.
    pub fn upload_state(&self) -> Arc<UploadState> {
        Arc::clone(&self.upload)
    }

    pub fn cancel_upload(&self) {
        self.upload.cancel();
    }

    pub fn upload_cancelled(&self) -> bool {
        self.upload.is_cancelled()
    }

    pub fn set_upload_progress(&self, progress: f32) {
        self.upload.set_progress(progress);
    }

    pub fn upload_progress(&self) -> f32 {
        self.upload.progress()
    }
}
