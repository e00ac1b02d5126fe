//! Data-packet payload decoding
//!
//! Firing record layout (all integers big-endian):
//! - Encoder position (2 bytes)
//! - Padding (2 bytes)
//! - Distances, return-major (3 returns x 8 lasers x 4 bytes)
//! - Intensities, return-major (3 returns x 8 lasers x 1 byte)
//!
//! A framed payload is 50 firing records followed by a 2-byte status word;
//! seconds, nanoseconds and version live in the packet header. A failover
//! buffer is 50 firing records followed by seconds (4), nanoseconds (4),
//! version (2) and status (2) with no header.

use super::{
    FAILOVER_PACKET_SIZE, FIRING_SIZE, FIRINGS_PER_PACKET, HEADER_SIZE, M_SERIES_PAYLOAD_SIZE,
    NUM_LASERS, NUM_RETURNS, PacketHeader,
};
use crate::error::{Error, Result};

/// One decoded firing: an encoder position and three echo returns per beam
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringData {
    /// Rotational encoder reading in 1/10400 of a turn
    pub position: u16,
    /// Raw distances indexed `[return][laser]`, 0 meaning no return
    pub distances: [[u32; NUM_LASERS]; NUM_RETURNS],
    /// Raw intensities indexed `[return][laser]`
    pub intensities: [[u8; NUM_LASERS]; NUM_RETURNS],
}

impl FiringData {
    /// Decode one firing record from exactly [`FIRING_SIZE`] bytes
    fn from_bytes(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), FIRING_SIZE);

        let position = u16::from_be_bytes([buf[0], buf[1]]);

        let mut distances = [[0u32; NUM_LASERS]; NUM_RETURNS];
        let mut intensities = [[0u8; NUM_LASERS]; NUM_RETURNS];
        for r in 0..NUM_RETURNS {
            for j in 0..NUM_LASERS {
                let at = 4 + (r * NUM_LASERS + j) * 4;
                distances[r][j] = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
                intensities[r][j] = buf[4 + NUM_RETURNS * NUM_LASERS * 4 + r * NUM_LASERS + j];
            }
        }

        FiringData {
            position,
            distances,
            intensities,
        }
    }
}

/// A fully decoded data packet, independent of which framing carried it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub seconds: u32,
    pub nanoseconds: u32,
    pub version: u16,
    pub status: u16,
    pub firings: Vec<FiringData>,
}

impl DataPacket {
    /// Decode a framed packet (header plus payload)
    pub fn from_framed(buf: &[u8]) -> Result<Self> {
        let header = PacketHeader::from_packet(buf)?;
        let payload = &buf[HEADER_SIZE..];
        if payload.len() != M_SERIES_PAYLOAD_SIZE {
            return Err(Error::MalformedPacket(format!(
                "M-series payload is {} bytes, expected {}",
                payload.len(),
                M_SERIES_PAYLOAD_SIZE
            )));
        }

        let firings = decode_firings(payload);
        let status_at = FIRINGS_PER_PACKET * FIRING_SIZE;
        let status = u16::from_be_bytes([payload[status_at], payload[status_at + 1]]);

        Ok(DataPacket {
            seconds: header.seconds,
            nanoseconds: header.nanoseconds,
            version: header.version,
            status,
            firings,
        })
    }

    /// Decode a header-less legacy buffer of fixed size
    pub fn from_failover(buf: &[u8]) -> Result<Self> {
        if buf.len() != FAILOVER_PACKET_SIZE {
            return Err(Error::MalformedPacket(format!(
                "failover buffer is {} bytes, expected {}",
                buf.len(),
                FAILOVER_PACKET_SIZE
            )));
        }

        let firings = decode_firings(buf);
        let suffix = FIRINGS_PER_PACKET * FIRING_SIZE;

        Ok(DataPacket {
            seconds: u32::from_be_bytes([buf[suffix], buf[suffix + 1], buf[suffix + 2], buf[suffix + 3]]),
            nanoseconds: u32::from_be_bytes([
                buf[suffix + 4],
                buf[suffix + 5],
                buf[suffix + 6],
                buf[suffix + 7],
            ]),
            version: u16::from_be_bytes([buf[suffix + 8], buf[suffix + 9]]),
            status: u16::from_be_bytes([buf[suffix + 10], buf[suffix + 11]]),
            firings,
        })
    }

    /// Microsecond timestamp of this packet (see [`super::packet_stamp_us`])
    pub fn stamp_us(&self) -> u64 {
        super::packet_stamp_us(self.seconds, self.nanoseconds, self.version)
    }
}

fn decode_firings(buf: &[u8]) -> Vec<FiringData> {
    (0..FIRINGS_PER_PACKET)
        .map(|i| FiringData::from_bytes(&buf[i * FIRING_SIZE..(i + 1) * FIRING_SIZE]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestFiring, encode_failover_packet, encode_framed_packet};

    #[test]
    fn test_framed_round_trip() {
        let mut firings = vec![TestFiring::with_position(0); FIRINGS_PER_PACKET];
        firings[0] = TestFiring {
            position: 1234,
            distances: {
                let mut d = [[0u32; NUM_LASERS]; NUM_RETURNS];
                d[0][0] = 150;
                d[1][3] = 99;
                d[2][7] = 100_000;
                d
            },
            intensities: {
                let mut i = [[0u8; NUM_LASERS]; NUM_RETURNS];
                i[0][0] = 200;
                i[1][3] = 12;
                i
            },
        };
        firings[49] = TestFiring::with_position(9999);

        let buf = encode_framed_packet(0, 17, 500_000, 4, 0x0042, &firings);
        let packet = DataPacket::from_framed(&buf).unwrap();

        assert_eq!(packet.seconds, 17);
        assert_eq!(packet.nanoseconds, 500_000);
        assert_eq!(packet.version, 4);
        assert_eq!(packet.status, 0x0042);
        assert_eq!(packet.firings.len(), FIRINGS_PER_PACKET);
        assert_eq!(packet.firings[0].position, 1234);
        assert_eq!(packet.firings[0].distances[0][0], 150);
        assert_eq!(packet.firings[0].distances[1][3], 99);
        assert_eq!(packet.firings[0].distances[2][7], 100_000);
        assert_eq!(packet.firings[0].intensities[0][0], 200);
        assert_eq!(packet.firings[0].intensities[1][3], 12);
        assert_eq!(packet.firings[49].position, 9999);
    }

    #[test]
    fn test_failover_round_trip() {
        let firings = vec![TestFiring::with_position(4321); FIRINGS_PER_PACKET];
        let buf = encode_failover_packet(33, 250, 3, 1, &firings);
        let packet = DataPacket::from_failover(&buf).unwrap();

        assert_eq!(packet.seconds, 33);
        assert_eq!(packet.nanoseconds, 250);
        assert_eq!(packet.version, 3);
        assert_eq!(packet.status, 1);
        assert_eq!(packet.firings[25].position, 4321);
    }

    #[test]
    fn test_framed_rejects_wrong_payload_size() {
        let firings = vec![TestFiring::with_position(0); FIRINGS_PER_PACKET];
        let mut buf = encode_framed_packet(0, 0, 0, 0, 0, &firings);
        buf.pop();
        assert!(matches!(
            DataPacket::from_framed(&buf),
            Err(crate::error::Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_failover_rejects_wrong_size() {
        assert!(DataPacket::from_failover(&[0u8; 100]).is_err());
    }
}
