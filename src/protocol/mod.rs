//! M-series wire protocol
//!
//! Framed packet format:
//! - Magic signature (4 bytes, big-endian)
//! - Total size including header (4 bytes, big-endian)
//! - Packet type (2 bytes, big-endian)
//! - Version (2 bytes, big-endian)
//! - Seconds (4 bytes, big-endian)
//! - Nanoseconds (4 bytes, big-endian)
//! - Type-specific payload
//!
//! Legacy sensors emit header-less buffers of a fixed size; see
//! [`data_packet::DataPacket::from_failover`].

mod data_packet;

pub use data_packet::{DataPacket, FiringData};

use crate::error::{Error, Result};

/// Magic signature leading every framed packet
pub const SIGNATURE: u32 = 0x75BD_7E97;

/// Size of the framed packet header in bytes
pub const HEADER_SIZE: usize = 20;

/// Hard ceiling on a framed packet's advertised total size
pub const MAX_PACKET_SIZE: usize = 65536;

/// Packet type carrying M-series firing data, first revision
pub const PACKET_TYPE_00: u16 = 0x0000;

/// Packet type carrying M-series firing data, second revision
pub const PACKET_TYPE_01: u16 = 0x0001;

/// Laser beams per firing
pub const NUM_LASERS: usize = 8;

/// Echo returns recorded per beam (max, first, last)
pub const NUM_RETURNS: usize = 3;

/// Firings in one data packet
pub const FIRINGS_PER_PACKET: usize = 50;

/// Rotational encoder ticks per full turn
pub const NUM_ROT_ANGLES: u16 = 10400;

/// Bytes per firing record on the wire
pub const FIRING_SIZE: usize = 124;

/// Framed data-packet payload: firings plus a trailing status word
pub const M_SERIES_PAYLOAD_SIZE: usize = FIRINGS_PER_PACKET * FIRING_SIZE + 2;

/// Fixed size of a header-less legacy buffer: firings plus the
/// seconds/nanoseconds/version/status suffix
pub const FAILOVER_PACKET_SIZE: usize = FIRINGS_PER_PACKET * FIRING_SIZE + 12;

/// Status bit: sensor firmware does not match the client software
pub const STATUS_SENSOR_SW_FW_MISMATCH: u16 = 1 << 0;

/// Status bit: sensor firmware watchdog tripped
pub const STATUS_WATCHDOG_VIOLATION: u16 = 1 << 1;

/// Framed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub signature: u32,
    /// Total packet size in bytes, header included
    pub size: u32,
    pub packet_type: u16,
    pub version: u16,
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl PacketHeader {
    /// Parse a header from its fixed 20-byte wire form
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        PacketHeader {
            signature: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            packet_type: u16::from_be_bytes([buf[8], buf[9]]),
            version: u16::from_be_bytes([buf[10], buf[11]]),
            seconds: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            nanoseconds: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        }
    }

    /// Parse a header from the front of a framed packet buffer
    pub fn from_packet(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket(format!(
                "buffer of {} bytes is shorter than the {} byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&buf[..HEADER_SIZE]);
        Ok(Self::from_bytes(&header))
    }
}

/// Convert a packet's seconds/nanoseconds pair to microseconds.
///
/// Sensor API versions 1 through 3 put 10 ns increments in the nanoseconds
/// field; later versions use true nanoseconds.
pub fn packet_stamp_us(seconds: u32, nanoseconds: u32, version: u16) -> u64 {
    let seconds = seconds as u64 * 1_000_000;
    if version != 0 && version <= 3 {
        seconds + nanoseconds as u64 / 100
    } else {
        seconds + nanoseconds as u64 / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SIGNATURE.to_be_bytes());
        buf[4..8].copy_from_slice(&6222u32.to_be_bytes());
        buf[8..10].copy_from_slice(&PACKET_TYPE_01.to_be_bytes());
        buf[10..12].copy_from_slice(&5u16.to_be_bytes());
        buf[12..16].copy_from_slice(&1_700_000_000u32.to_be_bytes());
        buf[16..20].copy_from_slice(&987_654_321u32.to_be_bytes());

        let header = PacketHeader::from_bytes(&buf);
        assert_eq!(header.signature, SIGNATURE);
        assert_eq!(header.size, 6222);
        assert_eq!(header.packet_type, PACKET_TYPE_01);
        assert_eq!(header.version, 5);
        assert_eq!(header.seconds, 1_700_000_000);
        assert_eq!(header.nanoseconds, 987_654_321);
    }

    #[test]
    fn test_header_rejects_short_buffer() {
        assert!(PacketHeader::from_packet(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_stamp_versions() {
        // Legacy versions carry 10 ns units in the nanoseconds field
        assert_eq!(packet_stamp_us(2, 100_000, 1), 2_001_000);
        assert_eq!(packet_stamp_us(2, 100_000, 3), 2_001_000);
        // Version 0 and modern versions carry true nanoseconds
        assert_eq!(packet_stamp_us(2, 100_000, 0), 2_000_100);
        assert_eq!(packet_stamp_us(2, 100_000, 4), 2_000_100);
        assert_eq!(packet_stamp_us(2, 100_000, 5), 2_000_100);
    }
}
