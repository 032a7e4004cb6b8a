//! Backend-agnostic USB device transfer engine
//!
//! This crate implements the host-side transfer core for USB transports that
//! follow the WinUSB handle model: one exclusive device handle, an interface
//! handle for interface 0 obtained by initialization, and further interface
//! handles discovered lazily through sequential associated-interface
//! requests. On top of that model it provides:
//!
//! - endpoint-address routing to the interface that declares each endpoint,
//!   built once at open from the active configuration,
//! - validated control, pipe, and descriptor transfers, synchronous or
//!   two-phase asynchronous,
//! - a one-shot overlapped completion protocol that pins the transfer buffer
//!   for the exact lifetime of the operation.
//!
//! The native transport is consumed through the [`UsbBackend`] trait; device
//! discovery, path resolution and descriptor parsing stay outside the
//! engine.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use usb_engine::{Device, testing::MockBackend};
//!
//! let backend = Arc::new(MockBackend::new().with_interface(0, &[0x81, 0x01]));
//! let device = Device::open(backend, r"\\?\usb#mock").unwrap();
//!
//! let mut buffer = [0u8; 64];
//! let transferred = device.pipe_transfer(0x81, &mut buffer, 0, 64).unwrap();
//! assert_eq!(transferred, 64);
//! ```

pub mod backend;
mod completion;
mod device;
mod error;
mod interfaces;
mod router;
pub mod setup;
pub mod testing;

pub use backend::{InterfaceDescriptor, NativeStatus, UsbBackend};
pub use completion::{BufferRegion, CompletionToken, PendingTransfer};
pub use device::Device;
pub use error::{Error, Result};
pub use setup::{Direction, MAX_CONTROL_LENGTH, Recipient, SetupPacket};
