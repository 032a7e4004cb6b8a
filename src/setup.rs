//! USB control-transfer setup packet and addressing bits
//!
//! The setup packet is the 8-byte header of the control transfer setup stage.
//! All multi-byte fields are little-endian on the wire:
//!
//! ```text
//! [bmRequestType: u8][bRequest: u8][wValue: u16][wIndex: u16][wLength: u16]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Direction bit of an endpoint address or request type (bit 7)
pub const ENDPOINT_DIRECTION_MASK: u8 = 0x80;

/// Endpoint number bits of an endpoint address (bits 0..7)
pub const ENDPOINT_NUMBER_MASK: u8 = 0x7F;

/// Recipient bits of a control request type (bits 0..5)
pub const RECIPIENT_MASK: u8 = 0x1F;

/// Maximum data length of a control transfer or descriptor read
///
/// The setup packet carries the length in a 16-bit wire field.
pub const MAX_CONTROL_LENGTH: usize = 0x7FFF;

/// Transfer direction, as encoded in bit 7 of an endpoint address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

impl Direction {
    /// Extract the direction bit from an endpoint address or request type
    pub fn from_address(address: u8) -> Self {
        if address & ENDPOINT_DIRECTION_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Recipient of a control request, as encoded in the low bits of
/// `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

impl Recipient {
    /// Decode the recipient bits of a request type
    ///
    /// Reserved recipient values are treated as `Device`, matching the
    /// behavior of addressing such requests at the default interface handle.
    pub fn from_request_type(request_type: u8) -> Self {
        match request_type & RECIPIENT_MASK {
            0x01 => Recipient::Interface,
            0x02 => Recipient::Endpoint,
            0x03 => Recipient::Other,
            _ => Recipient::Device,
        }
    }
}

/// The 8-byte control transfer setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// Request type byte (bmRequestType)
    pub request_type: u8,
    /// Request byte (bRequest)
    pub request: u8,
    /// Value parameter (wValue)
    pub value: u16,
    /// Index parameter (wIndex)
    pub index: u16,
    /// Data stage length (wLength)
    pub length: u16,
}

impl SetupPacket {
    /// Size of the packet in bytes
    pub const SIZE: usize = 8;

    /// Write the packet in wire order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.request_type)?;
        writer.write_u8(self.request)?;
        writer.write_u16::<LittleEndian>(self.value)?;
        writer.write_u16::<LittleEndian>(self.index)?;
        writer.write_u16::<LittleEndian>(self.length)?;
        Ok(())
    }

    /// Read a packet from wire order
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            request_type: reader.read_u8()?,
            request: reader.read_u8()?,
            value: reader.read_u16::<LittleEndian>()?,
            index: reader.read_u16::<LittleEndian>()?,
            length: reader.read_u16::<LittleEndian>()?,
        })
    }

    /// Encode the packet as wire bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        // Writing 8 bytes into an 8-byte slice cannot fail.
        self.write_to(&mut &mut bytes[..])
            .expect("setup packet encoding is infallible");
        bytes
    }
}
