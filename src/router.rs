//! Endpoint-to-interface routing
//!
//! Built once when the device is opened and immutable afterwards. IN and OUT
//! endpoints with the same number are independent, so the router keeps two
//! tables indexed by the 7-bit endpoint number.

use crate::backend::InterfaceDescriptor;
use crate::error::{Error, Result};
use crate::setup::{Direction, ENDPOINT_NUMBER_MASK};

/// Immutable mapping from endpoint address to the interface that declares it
#[derive(Debug)]
pub(crate) struct EndpointRouter {
    to_interface_in: Vec<Option<u8>>,
    to_interface_out: Vec<Option<u8>>,
}

impl EndpointRouter {
    /// Build the router from the active configuration's interface tree
    ///
    /// Each table grows to the highest endpoint number declared in its
    /// direction; undeclared slots stay empty.
    pub fn new(interfaces: &[InterfaceDescriptor]) -> Self {
        let mut router = EndpointRouter {
            to_interface_in: Vec::new(),
            to_interface_out: Vec::new(),
        };

        for interface in interfaces {
            for &address in &interface.endpoint_addresses {
                let number = (address & ENDPOINT_NUMBER_MASK) as usize;
                let table = match Direction::from_address(address) {
                    Direction::In => &mut router.to_interface_in,
                    Direction::Out => &mut router.to_interface_out,
                };
                if table.len() <= number {
                    table.resize(number + 1, None);
                }
                table[number] = Some(interface.number);
            }
        }

        router
    }

    /// Interface number owning the endpoint at `address`
    ///
    /// Fails with [`Error::UnknownEndpoint`] if no interface of the active
    /// configuration declares the endpoint.
    pub fn interface_for(&self, address: u8) -> Result<u8> {
        let number = (address & ENDPOINT_NUMBER_MASK) as usize;
        let table = match Direction::from_address(address) {
            Direction::In => &self.to_interface_in,
            Direction::Out => &self.to_interface_out,
        };
        table
            .get(number)
            .copied()
            .flatten()
            .ok_or(Error::UnknownEndpoint(address))
    }
}
