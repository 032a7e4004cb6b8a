//! One-shot overlapped completion protocol
//!
//! An asynchronous transfer is split across two tokens that share the pinned
//! buffer and the operation state:
//!
//! - [`PendingTransfer`] stays with the caller. `wait` blocks until the
//!   operation leaves the pending state and yields the transferred length.
//! - [`CompletionToken`] goes to the backend with the submission. It gives
//!   the backend access to the submitted buffer region and must be resolved
//!   exactly once with [`CompletionToken::complete`] or
//!   [`CompletionToken::fail`], enforced by consuming the token.
//!
//! The buffer is moved into the shared state at submission and can only be
//! reclaimed after the operation has resolved, so a pending buffer can never
//! be reused or freed out from under the transport.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::backend::NativeStatus;
use crate::error::{Error, Result};

/// State of an overlapped operation
///
/// Transitions exactly once, from `Pending` to one of the resolved states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Pending,
    Completed(usize),
    Faulted(NativeStatus),
}

struct Shared {
    state: Mutex<OpState>,
    resolved: Condvar,
    /// The pinned buffer. Written by the backend while the operation is
    /// pending, reclaimed by the caller after resolution.
    buffer: Mutex<Vec<u8>>,
}

/// Caller-side token for an in-flight asynchronous transfer
///
/// Returned by the `begin_*` operations on [`Device`](crate::Device).
pub struct PendingTransfer {
    shared: Arc<Shared>,
    finished: bool,
    buffer_taken: bool,
}

impl PendingTransfer {
    /// Pin `buffer` for a new operation and split it into the caller and
    /// backend halves.
    pub(crate) fn begin(
        buffer: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> (PendingTransfer, CompletionToken) {
        let shared = Arc::new(Shared {
            state: Mutex::new(OpState::Pending),
            resolved: Condvar::new(),
            buffer: Mutex::new(buffer),
        });

        (
            PendingTransfer {
                shared: shared.clone(),
                finished: false,
                buffer_taken: false,
            },
            CompletionToken {
                shared,
                offset,
                length,
            },
        )
    }

    /// Block until the operation resolves and return the transferred length
    ///
    /// Returns [`Error::Transfer`] with the native status if the operation
    /// faulted. Calling `wait` a second time on the same transfer fails with
    /// [`Error::InvalidOperation`].
    pub fn wait(&mut self) -> Result<usize> {
        if self.finished {
            return Err(Error::InvalidOperation);
        }

        let mut state = self.shared.state.lock().unwrap();
        while *state == OpState::Pending {
            state = self.shared.resolved.wait(state).unwrap();
        }
        self.finished = true;

        match *state {
            OpState::Completed(transferred) => Ok(transferred),
            OpState::Faulted(status) => Err(Error::Transfer(status)),
            OpState::Pending => unreachable!("condvar returned while pending"),
        }
    }

    /// Whether the operation has already resolved
    ///
    /// Does not consume the result; `wait` still returns it.
    pub fn is_complete(&self) -> bool {
        *self.shared.state.lock().unwrap() != OpState::Pending
    }

    /// Reclaim the submitted buffer
    ///
    /// Returns `None` while the operation is still pending: the backend may
    /// still be writing into the buffer, so the lease cannot end early.
    /// The buffer can be reclaimed at most once; later calls return `None`.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        if self.buffer_taken {
            return None;
        }
        let state = self.shared.state.lock().unwrap();
        if *state == OpState::Pending {
            return None;
        }
        self.buffer_taken = true;
        Some(std::mem::take(&mut *self.shared.buffer.lock().unwrap()))
    }
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("state", &*self.shared.state.lock().unwrap())
            .finish_non_exhaustive()
    }
}

/// Backend-side completion token for one submitted operation
///
/// The backend resolves the token from whatever context delivers the native
/// completion: inline in `submit_*` for synchronous completions, or from a
/// worker thread otherwise. Resolution consumes the token, so a second
/// completion is unrepresentable.
pub struct CompletionToken {
    shared: Arc<Shared>,
    offset: usize,
    length: usize,
}

impl CompletionToken {
    /// Lock the submitted buffer region
    ///
    /// The region covers exactly the `(offset, length)` span the caller
    /// submitted.
    pub fn buffer(&self) -> BufferRegion<'_> {
        BufferRegion {
            guard: self.shared.buffer.lock().unwrap(),
            offset: self.offset,
            length: self.length,
        }
    }

    /// Requested length of the submitted region
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the submitted region is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Resolve the operation with the transferred byte count
    pub fn complete(self, transferred: usize) {
        debug!("Async transfer completed: {} bytes", transferred);
        self.resolve(OpState::Completed(transferred));
    }

    /// Resolve the operation with a native failure status
    pub fn fail(self, status: NativeStatus) {
        debug!("Async transfer faulted: native status {}", status);
        self.resolve(OpState::Faulted(status));
    }

    fn resolve(self, next: OpState) {
        let mut state = self.shared.state.lock().unwrap();
        debug_assert_eq!(*state, OpState::Pending, "operation resolved twice");
        *state = next;
        self.shared.resolved.notify_all();
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

/// Locked view of the buffer region submitted with an operation
pub struct BufferRegion<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    offset: usize,
    length: usize,
}

impl Deref for BufferRegion<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[self.offset..self.offset + self.length]
    }
}

impl DerefMut for BufferRegion<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[self.offset..self.offset + self.length]
    }
}
