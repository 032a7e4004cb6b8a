//! Claimed-interface registry
//!
//! Only interface 0 comes out of transport initialization; every other
//! interface is discovered by an associated-interface request at position
//! `id - 1` relative to interface 0. The table populates slots lazily on
//! first use and caches them for the life of the device. A populated slot is
//! never silently replaced.

use std::sync::Arc;

use tracing::debug;

use crate::backend::NativeStatus;
use crate::error::{Error, Result};

/// Highest interface id addressable by the protocol (8-bit field)
const MAX_INTERFACE_ID: usize = 255;

/// Lazily populated registry of claimed interface handles, indexed by
/// interface number
///
/// Handles are shared out as `Arc`s so a released slot does not invalidate a
/// transfer already holding the handle; the native resource is freed when the
/// last reference drops.
pub(crate) struct InterfaceTable<I> {
    root: Arc<I>,
    /// Slots for interfaces 1..=255. Index 0 is never used; the root handle
    /// lives outside the slots so it cannot be released.
    slots: Vec<Option<Arc<I>>>,
}

impl<I> InterfaceTable<I> {
    /// Seed the table with the interface-0 handle from initialization
    pub fn new(root: I) -> Self {
        InterfaceTable {
            root: Arc::new(root),
            slots: Vec::new(),
        }
    }

    /// The interface-0 handle
    pub fn root(&self) -> Arc<I> {
        self.root.clone()
    }

    /// Return the cached handle for `id`, claiming it on first use
    ///
    /// `associate` issues the native associated-interface request against the
    /// root handle; it is called at most once per interface id because the
    /// result is cached before being returned. The caller holds the table
    /// lock, which serializes concurrent first use.
    pub fn get_or_create<F>(&mut self, id: usize, associate: F) -> Result<Arc<I>>
    where
        F: FnOnce(&I, u8) -> std::result::Result<I, NativeStatus>,
    {
        if id == 0 {
            return Ok(self.root());
        }
        if id > MAX_INTERFACE_ID {
            return Err(Error::InvalidInterface(id));
        }
        if let Some(Some(handle)) = self.slots.get(id) {
            return Ok(handle.clone());
        }

        let position = (id - 1) as u8;
        let handle = associate(&self.root, position)
            .map_err(|status| Error::InterfaceAssociation { id, status })?;
        debug!("Claimed interface {} (association position {})", id, position);

        if self.slots.len() <= id {
            self.slots.resize_with(id + 1, || None);
        }
        let handle = Arc::new(handle);
        self.slots[id] = Some(handle.clone());
        Ok(handle)
    }

    /// Release the handle cached for `id`
    ///
    /// A no-op for interface 0 (its lifetime is tied to the device), for ids
    /// that were never claimed, and for ids out of range. Never fails.
    pub fn release(&mut self, id: usize) {
        if id == 0 {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id)
            && slot.take().is_some()
        {
            debug!("Released interface {}", id);
        }
    }
}
