//! Native transport seam
//!
//! The engine drives a native USB transport (WinUSB-style) through the
//! [`UsbBackend`] trait: an exclusive overlapped-capable device handle, an
//! interface handle obtained by initialization, and further interface handles
//! obtained by sequential associated-interface requests relative to the
//! first. Device discovery, path resolution and descriptor parsing live
//! behind this seam; the engine only consumes the parsed interface/endpoint
//! tree of the active configuration.

use crate::completion::CompletionToken;
use crate::setup::SetupPacket;

/// Status code reported by the native transport on failure
///
/// Propagated unmodified inside the engine's error variants.
pub type NativeStatus = i32;

/// One interface of the active configuration, with its endpoint addresses as
/// declared on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// bEndpointAddress of every endpoint the interface declares, direction
    /// bit included
    pub endpoint_addresses: Vec<u8>,
}

/// Native USB transport
///
/// Handle types own their native resources and release them on drop, so
/// every exit path tears them down deterministically. Submitted asynchronous
/// operations must resolve their [`CompletionToken`] exactly once, either
/// inline when the native call completes synchronously or from the
/// transport's completion worker.
///
/// Implementations must be callable from multiple threads; the engine
/// serializes interface-table mutation but issues transfers concurrently.
pub trait UsbBackend: Send + Sync {
    /// Exclusive native device handle, opened for overlapped operation
    type DeviceHandle: Send + Sync;
    /// Claimed-interface handle
    type InterfaceHandle: Send + Sync;

    /// Open the device identified by `path`
    ///
    /// The path is opaque to the engine and passed through unmodified.
    fn open_device(&self, path: &str) -> Result<Self::DeviceHandle, NativeStatus>;

    /// Initialize the transport on an open device, yielding the handle for
    /// interface 0
    fn initialize(&self, device: &Self::DeviceHandle)
    -> Result<Self::InterfaceHandle, NativeStatus>;

    /// Request the associated interface at `position` relative to interface 0
    ///
    /// Position `n` yields the handle for interface `n + 1`.
    fn associated_interface(
        &self,
        root: &Self::InterfaceHandle,
        position: u8,
    ) -> Result<Self::InterfaceHandle, NativeStatus>;

    /// Read the active configuration value and its parsed interface/endpoint
    /// tree (the descriptor source)
    fn active_configuration(
        &self,
        device: &Self::DeviceHandle,
    ) -> Result<(u8, Vec<InterfaceDescriptor>), NativeStatus>;

    /// Execute a control transfer synchronously
    ///
    /// `data` is the setup stage's data buffer; direction follows bit 7 of
    /// the setup packet's request type. Returns the transferred length.
    fn control_transfer(
        &self,
        interface: &Self::InterfaceHandle,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus>;

    /// Submit an asynchronous control transfer
    fn submit_control_transfer(
        &self,
        interface: &Self::InterfaceHandle,
        setup: SetupPacket,
        token: CompletionToken,
    );

    /// Read from an IN pipe synchronously, returning the transferred length
    fn read_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus>;

    /// Write to an OUT pipe synchronously, returning the transferred length
    fn write_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        data: &[u8],
    ) -> Result<usize, NativeStatus>;

    /// Submit an asynchronous read on an IN pipe
    fn submit_read_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        token: CompletionToken,
    );

    /// Submit an asynchronous write on an OUT pipe
    fn submit_write_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        token: CompletionToken,
    );

    /// Read a descriptor through the device-level descriptor request
    fn get_descriptor(
        &self,
        interface: &Self::InterfaceHandle,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus>;

    /// Reset a pipe's data toggle and clear a stall condition
    fn reset_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
    ) -> Result<(), NativeStatus>;

    /// Abort all outstanding transfers on a pipe
    fn abort_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
    ) -> Result<(), NativeStatus>;
}
