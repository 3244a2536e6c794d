use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rusb::{Device, DeviceHandle, Direction, TransferType, UsbContext};

use crate::error::{LoaderError, Result};
use crate::FTDI_VID;

/// How long a non-blocking receive waits for the first bytes of a frame.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);
/// How long to wait for the rest of a reply once it started.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a bulk write may take.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// FTDI bit modes used by the carts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitMode {
    Reset = 0x00,
    SyncFifo = 0x40,
}

/// Out-of-band requests to the USB bridge chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Reset the bridge.
    Reset,
    /// Drop anything waiting to be read.
    PurgeRx,
    /// Drop anything waiting to be written.
    PurgeTx,
    SetBitmode { mask: u8, mode: BitMode },
}

/// A claimed USB connection to a cart.
///
/// This is the only thing the cart protocols talk to, which lets them run
/// against anything that moves bytes.
pub trait Transport: Send {
    /// Writes some of `buf`, returning how much was accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reads into `buf`, returning `Ok(0)` if nothing arrived within `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    fn control(&mut self, request: Control) -> Result<()>;

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let len = self.write(buf)?;
            if len == 0 {
                return Err(LoaderError::UsbWriteZero);
            }
            buf = &buf[len..];
        }
        Ok(())
    }

    /// Reads until `buf` is full or the device goes quiet for `timeout`.
    /// Returns the number of bytes read.
    fn read_full(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let len = self.read(&mut buf[filled..], timeout)?;
            if len == 0 {
                break;
            }
            filled += len;
        }
        Ok(filled)
    }

    /// Reads a whole reply, failing with [`LoaderError::Timeout`] if it stops short.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.read_full(buf, REPLY_TIMEOUT)? < buf.len() {
            return Err(LoaderError::Timeout);
        }
        Ok(())
    }

    /// Fills `buf` if data is already waiting.
    ///
    /// Returns `Ok(false)` when nothing arrived within [`POLL_TIMEOUT`]. Once the
    /// first byte arrives the rest must follow, a short read is a framing error.
    fn poll_exact(&mut self, buf: &mut [u8]) -> Result<bool> {
        let first = self.read(buf, POLL_TIMEOUT)?;
        if first == 0 {
            return Ok(false);
        }

        let rest = self.read_full(&mut buf[first..], REPLY_TIMEOUT)?;
        if first + rest < buf.len() {
            return Err(LoaderError::FramingMismatch {
                declared: buf.len(),
                received: first + rest,
            });
        }
        Ok(true)
    }
}

/// A USB device seen during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Product string descriptor, empty if it could not be read.
    pub product: String,
    pub bus: u8,
    pub address: u8,
}

impl std::fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}) at bus {} address {}",
            self.product, self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// Enumerates and claims USB devices.
pub trait UsbBus {
    type Transport: Transport;

    fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>>;

    /// Claims `info` exclusively, failing with [`LoaderError::DeviceBusy`] if it
    /// is held elsewhere.
    fn open(&mut self, info: &UsbDeviceInfo) -> Result<Self::Transport>;
}

// FTDI vendor requests
const SIO_RESET: u8 = 0x00;
const SIO_SET_BITMODE: u8 = 0x0B;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

/// Every FTDI bulk IN packet starts with two modem status bytes.
const FTDI_STATUS_LEN: usize = 2;
const READ_BUFFER_LEN: usize = 4096;

/// [`UsbBus`] backed by libusb.
#[derive(Debug)]
pub struct RusbBus<T: UsbContext> {
    context: T,
}
impl RusbBus<rusb::Context> {
    /// Creates a fresh libusb context.
    pub fn new() -> Result<Self> {
        let context = rusb::Context::new().map_err(LoaderError::UsbContextFailure)?;
        Ok(Self::with_context(context))
    }
}
impl<T: UsbContext> RusbBus<T> {
    pub fn with_context(context: T) -> Self {
        RusbBus { context }
    }

    fn find_endpoints(device: &Device<T>) -> Option<Endpoints> {
        let desc = device.device_descriptor().ok()?;
        for n in 0..desc.num_configurations() {
            let config_desc = match device.config_descriptor(n) {
                Ok(c) => c,
                Err(_) => continue,
            };

            for iface in config_desc.interfaces() {
                for iface_desc in iface.descriptors() {
                    let mut in_ep = None;
                    let mut out_ep = None;
                    for endpoint_desc in iface_desc.endpoint_descriptors() {
                        if endpoint_desc.transfer_type() != TransferType::Bulk {
                            continue;
                        }
                        match endpoint_desc.direction() {
                            Direction::In => {
                                in_ep = Some((
                                    endpoint_desc.address(),
                                    endpoint_desc.max_packet_size(),
                                ))
                            }
                            Direction::Out => out_ep = Some(endpoint_desc.address()),
                        }
                    }

                    if let (Some((in_addr, max_packet)), Some(out_addr)) = (in_ep, out_ep) {
                        return Some(Endpoints {
                            iface: iface_desc.interface_number(),
                            in_addr,
                            out_addr,
                            max_packet: max_packet as usize,
                        });
                    }
                }
            }
        }

        None
    }
}

struct Endpoints {
    iface: u8,
    in_addr: u8,
    out_addr: u8,
    max_packet: usize,
}

impl<T: UsbContext> UsbBus for RusbBus<T> {
    type Transport = RusbTransport<T>;

    fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>> {
        let devices = self
            .context
            .devices()
            .map_err(LoaderError::UsbOpenFailure)?;

        let mut found = vec![];
        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if desc.vendor_id() != FTDI_VID {
                continue;
            }

            let product = match device
                .open()
                .and_then(|handle| handle.read_product_string_ascii(&desc))
            {
                Ok(product) => product,
                Err(e) => {
                    log::debug!(
                        "could not read product string of {:04x}:{:04x}: {}",
                        desc.vendor_id(),
                        desc.product_id(),
                        e
                    );
                    String::new()
                }
            };

            found.push(UsbDeviceInfo {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                product,
                bus: device.bus_number(),
                address: device.address(),
            });
        }

        Ok(found)
    }

    fn open(&mut self, info: &UsbDeviceInfo) -> Result<RusbTransport<T>> {
        let devices = self
            .context
            .devices()
            .map_err(LoaderError::UsbOpenFailure)?;
        let device = devices
            .iter()
            .find(|d| d.bus_number() == info.bus && d.address() == info.address)
            .ok_or(LoaderError::DeviceNotFound)?;

        let endpoints = Self::find_endpoints(&device).ok_or(LoaderError::UsbEndpointsNotFound)?;

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Busy => LoaderError::DeviceBusy,
            e => LoaderError::UsbOpenFailure(e),
        })?;

        let iface = endpoints.iface;
        let has_kernel_driver = match handle.kernel_driver_active(iface) {
            Ok(true) => {
                handle
                    .detach_kernel_driver(iface)
                    .map_err(LoaderError::UsbDetachKernelDriverFailure)?;
                true
            }
            _ => false,
        };

        handle.claim_interface(iface).map_err(|e| match e {
            rusb::Error::Busy => LoaderError::DeviceBusy,
            e => LoaderError::UsbClaimInterfaceFailure(e),
        })?;

        log::debug!(
            "claimed interface {} of {} (in {:#04x}, out {:#04x})",
            iface,
            info,
            endpoints.in_addr,
            endpoints.out_addr
        );

        Ok(RusbTransport {
            handle,
            iface,
            in_addr: endpoints.in_addr,
            out_addr: endpoints.out_addr,
            max_packet: endpoints.max_packet.max(FTDI_STATUS_LEN + 1),
            has_kernel_driver,
            pending: VecDeque::new(),
        })
    }
}

/// [`Transport`] over a claimed FTDI interface.
#[derive(Debug)]
pub struct RusbTransport<T: UsbContext> {
    handle: DeviceHandle<T>,
    iface: u8,
    in_addr: u8,
    out_addr: u8,
    max_packet: usize,
    has_kernel_driver: bool,
    /// Payload bytes already read from the bus but not yet consumed.
    pending: VecDeque<u8>,
}

impl<T: UsbContext> Drop for RusbTransport<T> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.iface) {
            log::warn!("could not release interface {}: {}", self.iface, e);
        }

        if self.has_kernel_driver {
            if let Err(e) = self.handle.attach_kernel_driver(self.iface) {
                log::warn!("could not reattach kernel driver: {}", e);
            }
        }
    }
}

impl<T: UsbContext> RusbTransport<T> {
    fn vendor_request(&mut self, request: u8, value: u16) -> Result<()> {
        let timeout = Duration::from_secs(1);
        self.handle
            .write_control(
                rusb::request_type(
                    Direction::Out,
                    rusb::RequestType::Vendor,
                    rusb::Recipient::Device,
                ),
                request,
                value,
                u16::from(self.iface) + 1,
                &[],
                timeout,
            )
            .map_err(|source| LoaderError::UsbControlFailure { request, source })?;
        Ok(())
    }

    fn fill_pending(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        // the chip sends bare status packets while idle
        while self.pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let len = match self.handle.read_bulk(self.in_addr, &mut buf, deadline - now) {
                Ok(len) => len,
                Err(rusb::Error::Timeout) => break,
                Err(e) => return Err(LoaderError::UsbReadBulkFailure(e)),
            };

            for packet in buf[..len].chunks(self.max_packet) {
                if packet.len() > FTDI_STATUS_LEN {
                    self.pending.extend(&packet[FTDI_STATUS_LEN..]);
                }
            }
        }

        Ok(())
    }
}

impl<T: UsbContext> Transport for RusbTransport<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.handle
            .write_bulk(self.out_addr, buf, WRITE_TIMEOUT)
            .map_err(|e| match e {
                rusb::Error::Timeout => LoaderError::Timeout,
                e => LoaderError::UsbWriteBulkFailure(e),
            })
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.pending.is_empty() {
            self.fill_pending(timeout)?;
        }

        let len = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }

    fn control(&mut self, request: Control) -> Result<()> {
        match request {
            Control::Reset => {
                self.pending.clear();
                self.vendor_request(SIO_RESET, SIO_RESET_SIO)
            }
            Control::PurgeRx => {
                self.pending.clear();
                self.vendor_request(SIO_RESET, SIO_RESET_PURGE_RX)
            }
            Control::PurgeTx => self.vendor_request(SIO_RESET, SIO_RESET_PURGE_TX),
            Control::SetBitmode { mask, mode } => {
                self.vendor_request(SIO_SET_BITMODE, ((mode as u16) << 8) | mask as u16)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    type WriteHook = Box<dyn FnMut(usize) + Send>;

    #[derive(Default)]
    struct MockState {
        reads: VecDeque<u8>,
        writes: Vec<Vec<u8>>,
        controls: Vec<Control>,
        fail_writes_after: Option<usize>,
        on_write: Option<WriteHook>,
    }

    /// Scripted in-memory transport. Clones share the same state so a test can
    /// keep a handle after the device takes ownership.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues bytes the device will "send".
        pub fn push_read(&self, bytes: &[u8]) {
            self.state.lock().unwrap().reads.extend(bytes);
        }

        pub fn unread(&self) -> usize {
            self.state.lock().unwrap().reads.len()
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().writes.clone()
        }

        pub fn write_count(&self) -> usize {
            self.state.lock().unwrap().writes.len()
        }

        /// Everything written, concatenated.
        pub fn written(&self) -> Vec<u8> {
            self.writes().concat()
        }

        pub fn clear_writes(&self) {
            self.state.lock().unwrap().writes.clear();
        }

        pub fn controls(&self) -> Vec<Control> {
            self.state.lock().unwrap().controls.clone()
        }

        /// Lets `count` more writes succeed, then fails every write.
        pub fn fail_writes_after(&self, count: usize) {
            let mut state = self.state.lock().unwrap();
            state.fail_writes_after = Some(state.writes.len() + count);
        }

        /// Runs `hook` with the number of writes so far after every write.
        pub fn on_write(&self, hook: impl FnMut(usize) + Send + 'static) {
            self.state.lock().unwrap().on_write = Some(Box::new(hook));
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            let mut state = self.state.lock().unwrap();
            if let Some(limit) = state.fail_writes_after {
                if state.writes.len() >= limit {
                    return Err(LoaderError::UsbWriteBulkFailure(rusb::Error::Io));
                }
            }

            state.writes.push(buf.to_vec());
            let count = state.writes.len();
            if let Some(hook) = state.on_write.as_mut() {
                hook(count);
            }
            Ok(buf.len())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let mut state = self.state.lock().unwrap();
            let len = buf.len().min(state.reads.len());
            for (dst, src) in buf.iter_mut().zip(state.reads.drain(..len)) {
                *dst = src;
            }
            Ok(len)
        }

        fn control(&mut self, request: Control) -> Result<()> {
            self.state.lock().unwrap().controls.push(request);
            Ok(())
        }
    }

    /// Bus with a fixed device list that hands out one shared [`MockTransport`].
    pub(crate) struct MockBus {
        pub devices: Vec<UsbDeviceInfo>,
        pub transport: MockTransport,
        pub busy: bool,
    }

    impl MockBus {
        pub fn new(devices: Vec<UsbDeviceInfo>) -> Self {
            MockBus {
                devices,
                transport: MockTransport::new(),
                busy: false,
            }
        }
    }

    impl UsbBus for MockBus {
        type Transport = MockTransport;

        fn devices(&mut self) -> Result<Vec<UsbDeviceInfo>> {
            Ok(self.devices.clone())
        }

        fn open(&mut self, info: &UsbDeviceInfo) -> Result<MockTransport> {
            if self.busy {
                return Err(LoaderError::DeviceBusy);
            }
            if !self.devices.contains(info) {
                return Err(LoaderError::DeviceNotFound);
            }
            Ok(self.transport.clone())
        }
    }

    pub(crate) fn device(product_id: u16, product: &str) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id: FTDI_VID,
            product_id,
            product: product.to_string(),
            bus: 1,
            address: 4,
        }
    }
}
