//! The length-prefixed, type-tagged TLV wire format used for the
//! routing-protocol advertisement this daemon publishes and consumes
//! (spec §6's `HNCP_T_ROUTING_PROTOCOL`). Every other flooded record is
//! handed to us already decoded by the flooding layer (see [`crate::node`]);
//! this module only needs to round-trip bytes for the one TLV kind we
//! ourselves originate and parse.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Rounds `n` up to the next multiple of 4.
fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// A generic TLV: 2-byte type, 2-byte length (payload bytes, header
/// excluded), payload padded to a 4-byte boundary on the wire.
///
/// `Tlv` never interprets its own payload, so a value round-tripped through
/// [`Tlv::parse`]/[`Tlv::write`] reproduces the original bytes exactly —
/// including any TLV kind this crate doesn't know how to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// The TLV's 16-bit type.
    pub kind: u16,
    /// The TLV's payload, unpadded.
    pub payload: Vec<u8>,
}

impl Tlv {
    /// Reads one TLV (header + payload + padding) from `r`.
    pub fn parse(r: &mut impl Read) -> io::Result<Tlv> {
        let kind = r.read_u16::<BigEndian>()?;
        let len = r.read_u16::<BigEndian>()? as usize;
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)?;
        let pad = pad4(len) - len;
        if pad > 0 {
            let mut scratch = [0u8; 3];
            r.read_exact(&mut scratch[..pad])?;
        }
        Ok(Tlv { kind, payload })
    }

    /// Writes the TLV's header, payload, and zero-padding to `w`.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.kind)?;
        w.write_u16::<BigEndian>(self.payload.len() as u16)?;
        w.write_all(&self.payload)?;
        let pad = pad4(self.payload.len()) - self.payload.len();
        if pad > 0 {
            w.write_all(&[0u8; 3][..pad])?;
        }
        Ok(())
    }

    /// Total wire length, header and padding included.
    pub fn wire_len(&self) -> usize {
        4 + pad4(self.payload.len())
    }
}

/// Iterates the well-formed TLVs in a container's payload.
///
/// Stops (without producing an error) at the first child whose declared
/// length doesn't fit the remaining bytes, per the "yields well-formed
/// children" iteration rule — a truncated trailing record is dropped
/// silently rather than failing the whole container.
pub struct TlvIter<'a> {
    buf: &'a [u8],
}

impl<'a> TlvIter<'a> {
    /// Creates an iterator over `buf`, a container's raw payload.
    pub fn new(buf: &'a [u8]) -> Self {
        TlvIter { buf }
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Tlv;

    fn next(&mut self) -> Option<Tlv> {
        if self.buf.len() < 4 {
            self.buf = &[];
            return None;
        }
        let kind = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
        let padded = pad4(len);
        if self.buf.len() < 4 + padded {
            self.buf = &[];
            return None;
        }
        let payload = self.buf[4..4 + len].to_vec();
        self.buf = &self.buf[4 + padded..];
        Some(Tlv { kind, payload })
    }
}

/// Wire type for the routing-protocol support TLV (`HNCP_T_ROUTING_PROTOCOL`).
pub const T_ROUTING_PROTOCOL: u16 = 45;

/// `{u8 protocol, u8 preference, 4 bytes pad}` — payload length 6, per
/// spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingProtocolRecord {
    /// The advertised routing protocol id.
    pub protocol: u8,
    /// The advertiser's preference for this protocol, `0..256`.
    pub preference: u8,
}

impl RoutingProtocolRecord {
    /// Decodes a routing-protocol record from a TLV payload.
    pub fn parse(payload: &[u8]) -> io::Result<RoutingProtocolRecord> {
        if payload.len() < 6 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "routing protocol record shorter than 6 bytes",
            ));
        }
        Ok(RoutingProtocolRecord {
            protocol: payload[0],
            preference: payload[1],
        })
    }

    /// Encodes this record as a full [`Tlv`] ready to publish.
    pub fn to_tlv(self) -> Tlv {
        let payload = vec![self.protocol, self.preference, 0, 0, 0, 0];
        Tlv {
            kind: T_ROUTING_PROTOCOL,
            payload,
        }
    }
}
