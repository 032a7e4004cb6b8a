//! Engine error types

use thiserror::Error;

use crate::backend::NativeStatus;

/// Errors raised by the transfer engine
///
/// Argument and resolution errors are detected before any native resource is
/// touched. Native failures carry the transport's status code unmodified; the
/// engine never retries on its own.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The device handle could not be opened or interface 0 could not be
    /// initialized
    #[error("failed to open device (native status {0})")]
    DeviceOpen(NativeStatus),

    /// Interface id outside the 8-bit range allowed by the protocol
    #[error("interface id {0} out of range (expected 0..=255)")]
    InvalidInterface(usize),

    /// The native associated-interface request for a non-zero interface failed
    #[error("failed to associate interface {id} (native status {status})")]
    InterfaceAssociation { id: usize, status: NativeStatus },

    /// The endpoint is not declared by any interface of the active
    /// configuration
    #[error("endpoint {0:#04x} is not declared by the active configuration")]
    UnknownEndpoint(u8),

    /// The requested buffer region violates `offset + length <= buffer.len()`
    /// or exceeds the 16-bit control transfer length limit
    #[error("invalid buffer region (offset {offset}, length {length}, buffer {buffer_len})")]
    Bounds {
        offset: usize,
        length: usize,
        buffer_len: usize,
    },

    /// A native transfer failed
    #[error("transfer failed (native status {0})")]
    Transfer(NativeStatus),

    /// The operation is not exposed by the underlying transport
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The result of an asynchronous transfer was already consumed
    #[error("transfer result already taken")]
    InvalidOperation,
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, Error>;
