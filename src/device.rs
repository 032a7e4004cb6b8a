//! Device façade
//!
//! Owns the native device handle, the claimed-interface table and the
//! endpoint router, and exposes the public transfer surface. Transfers take
//! `&self`; the interface table mutex is only held while resolving a handle,
//! so transfers on different pipes run concurrently.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::backend::UsbBackend;
use crate::completion::PendingTransfer;
use crate::error::{Error, Result};
use crate::interfaces::InterfaceTable;
use crate::router::EndpointRouter;
use crate::setup::{Direction, MAX_CONTROL_LENGTH, Recipient, SetupPacket};

/// An open USB device
///
/// Created by [`Device::open`]. Dropping the device releases every claimed
/// interface handle and then the device handle.
pub struct Device<B: UsbBackend> {
    backend: Arc<B>,
    configuration: u8,
    router: EndpointRouter,
    // Declared before `handle` so interface handles drop first on teardown.
    interfaces: Mutex<InterfaceTable<B::InterfaceHandle>>,
    handle: B::DeviceHandle,
}

impl<B: UsbBackend> Device<B> {
    /// Open the device at `path` and prepare it for transfers
    ///
    /// Acquires the exclusive overlapped-capable device handle, initializes
    /// interface 0, and builds the endpoint router from the active
    /// configuration's interface tree.
    pub fn open(backend: Arc<B>, path: &str) -> Result<Self> {
        let handle = backend.open_device(path).map_err(Error::DeviceOpen)?;
        let root = backend.initialize(&handle).map_err(Error::DeviceOpen)?;
        let (configuration, tree) = backend
            .active_configuration(&handle)
            .map_err(Error::DeviceOpen)?;
        let router = EndpointRouter::new(&tree);

        debug!(
            "Opened device {} (configuration {}, {} interfaces)",
            path,
            configuration,
            tree.len()
        );

        Ok(Device {
            backend,
            configuration,
            router,
            interfaces: Mutex::new(InterfaceTable::new(root)),
            handle,
        })
    }

    /// Release every claimed interface handle and then the device handle
    ///
    /// Dropping the device performs the same teardown; `close` only makes
    /// the release point explicit. Consuming the device makes a second close
    /// unrepresentable.
    pub fn close(self) {
        debug!("Closing device");
    }

    /// The active configuration value, fixed at open
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Set the device configuration
    ///
    /// The transport does not support switching configurations after open:
    /// setting the current value succeeds as a no-op, any other value fails
    /// with [`Error::Unsupported`].
    pub fn set_configuration(&self, value: u8) -> Result<()> {
        if value == self.configuration {
            return Ok(());
        }
        Err(Error::Unsupported("configuration change"))
    }

    /// Reset the device
    ///
    /// Not exposed by the underlying transport; always fails with
    /// [`Error::Unsupported`].
    pub fn reset_device(&self) -> Result<()> {
        Err(Error::Unsupported("device reset"))
    }

    /// The raw native device handle
    ///
    /// Backends that deliver completions through a completion port need the
    /// handle to register it with their worker pool.
    pub fn device_handle(&self) -> &B::DeviceHandle {
        &self.handle
    }

    /// Claim interface `id`, forcing population of its table slot
    ///
    /// Interface 0 is always claimed. Claiming an already-claimed interface
    /// is a no-op.
    pub fn claim_interface(&self, id: usize) -> Result<()> {
        self.interface_handle(id).map(|_| ())
    }

    /// Release interface `id`
    ///
    /// A no-op for interface 0 and for interfaces that were never claimed.
    /// Never fails.
    pub fn release_interface(&self, id: usize) {
        self.interfaces.lock().unwrap().release(id);
    }

    /// Execute a control transfer and return the transferred length
    ///
    /// The target interface handle follows the recipient bits of
    /// `request_type`: Interface requests address `index & 0xFF`, Endpoint
    /// requests route through the endpoint router, everything else goes to
    /// interface 0.
    #[allow(clippy::too_many_arguments)]
    pub fn control_transfer(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        let interface = self.prepare_control(request_type, index, buffer.len(), offset, length)?;
        let setup = SetupPacket {
            request_type,
            request,
            value,
            index,
            length: length as u16,
        };

        self.backend
            .control_transfer(&interface, setup, &mut buffer[offset..offset + length])
            .map_err(Error::Transfer)
    }

    /// Submit a control transfer asynchronously
    ///
    /// Pins `buffer` for the duration of the operation and returns
    /// immediately; await the result with [`PendingTransfer::wait`].
    /// Validation and resolution errors fail synchronously without pinning
    /// or submitting anything.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_control_transfer(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> Result<PendingTransfer> {
        let interface = self.prepare_control(request_type, index, buffer.len(), offset, length)?;
        let setup = SetupPacket {
            request_type,
            request,
            value,
            index,
            length: length as u16,
        };

        let (pending, token) = PendingTransfer::begin(buffer, offset, length);
        debug!("Submitting async control transfer ({} bytes)", length);
        self.backend.submit_control_transfer(&interface, setup, token);
        Ok(pending)
    }

    /// Transfer on a bulk/interrupt/isochronous pipe, returning the
    /// transferred length
    ///
    /// Direction follows bit 7 of the endpoint address: IN endpoints read
    /// into the buffer region, OUT endpoints write from it.
    pub fn pipe_transfer(
        &self,
        endpoint: u8,
        buffer: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        check_bounds(buffer.len(), offset, length)?;
        let interface = self.endpoint_interface(endpoint)?;
        let data = &mut buffer[offset..offset + length];

        match Direction::from_address(endpoint) {
            Direction::In => self.backend.read_pipe(&interface, endpoint, data),
            Direction::Out => self.backend.write_pipe(&interface, endpoint, data),
        }
        .map_err(Error::Transfer)
    }

    /// Submit a pipe transfer asynchronously
    ///
    /// The two-phase protocol mirrors [`Device::begin_control_transfer`].
    pub fn begin_pipe_transfer(
        &self,
        endpoint: u8,
        buffer: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> Result<PendingTransfer> {
        check_bounds(buffer.len(), offset, length)?;
        let interface = self.endpoint_interface(endpoint)?;

        let (pending, token) = PendingTransfer::begin(buffer, offset, length);
        debug!(
            "Submitting async pipe transfer on endpoint {:#04x} ({} bytes)",
            endpoint, length
        );
        match Direction::from_address(endpoint) {
            Direction::In => self.backend.submit_read_pipe(&interface, endpoint, token),
            Direction::Out => self.backend.submit_write_pipe(&interface, endpoint, token),
        }
        Ok(pending)
    }

    /// Read a descriptor through the device-level descriptor request
    ///
    /// Always issued against interface 0's handle, synchronously.
    pub fn get_descriptor(
        &self,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
        buffer: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        check_bounds(buffer.len(), offset, length)?;
        check_control_length(buffer.len(), offset, length)?;
        let root = self.interfaces.lock().unwrap().root();

        self.backend
            .get_descriptor(
                &root,
                descriptor_type,
                index,
                language_id,
                &mut buffer[offset..offset + length],
            )
            .map_err(Error::Transfer)
    }

    /// Reset the pipe bound to `endpoint`
    ///
    /// Fire and forget: resolution errors (unknown endpoint, failed
    /// association) still propagate, but a native reset failure is logged
    /// and swallowed.
    pub fn pipe_reset(&self, endpoint: u8) -> Result<()> {
        let interface = self.endpoint_interface(endpoint)?;
        if let Err(status) = self.backend.reset_pipe(&interface, endpoint) {
            warn!(
                "Pipe reset on endpoint {:#04x} failed (native status {})",
                endpoint, status
            );
        }
        Ok(())
    }

    /// Abort outstanding transfers on the pipe bound to `endpoint`
    ///
    /// Fire and forget, like [`Device::pipe_reset`].
    pub fn pipe_abort(&self, endpoint: u8) -> Result<()> {
        let interface = self.endpoint_interface(endpoint)?;
        if let Err(status) = self.backend.abort_pipe(&interface, endpoint) {
            warn!(
                "Pipe abort on endpoint {:#04x} failed (native status {})",
                endpoint, status
            );
        }
        Ok(())
    }

    /// Resolve the interface handle for `id`, claiming it on first use
    fn interface_handle(&self, id: usize) -> Result<Arc<B::InterfaceHandle>> {
        // Holding the table lock across the association request guarantees at
        // most one native request per interface id.
        self.interfaces
            .lock()
            .unwrap()
            .get_or_create(id, |root, position| {
                self.backend.associated_interface(root, position)
            })
    }

    /// Resolve the interface handle owning `endpoint`
    fn endpoint_interface(&self, endpoint: u8) -> Result<Arc<B::InterfaceHandle>> {
        let number = self.router.interface_for(endpoint)?;
        self.interface_handle(number as usize)
    }

    /// Validate a control request and resolve its target interface handle
    ///
    /// Everything here runs before any native resource is touched.
    fn prepare_control(
        &self,
        request_type: u8,
        index: u16,
        buffer_len: usize,
        offset: usize,
        length: usize,
    ) -> Result<Arc<B::InterfaceHandle>> {
        check_bounds(buffer_len, offset, length)?;
        check_control_length(buffer_len, offset, length)?;

        match Recipient::from_request_type(request_type) {
            Recipient::Interface => self.interface_handle((index & 0xFF) as usize),
            Recipient::Endpoint => self.endpoint_interface((index & 0xFF) as u8),
            Recipient::Device | Recipient::Other => Ok(self.interfaces.lock().unwrap().root()),
        }
    }
}

impl<B: UsbBackend> fmt::Debug for Device<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("configuration", &self.configuration)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl<B: UsbBackend> Drop for Device<B> {
    fn drop(&mut self) {
        debug!("Releasing interface handles and device handle");
    }
}

/// Validate `offset + length <= buffer_len`, overflow included
fn check_bounds(buffer_len: usize, offset: usize, length: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(Error::Bounds {
            offset,
            length,
            buffer_len,
        }),
    }
}

/// Validate the 16-bit wire length field limit for control transfers
fn check_control_length(buffer_len: usize, offset: usize, length: usize) -> Result<()> {
    if length > MAX_CONTROL_LENGTH {
        return Err(Error::Bounds {
            offset,
            length,
            buffer_len,
        });
    }
    Ok(())
}
