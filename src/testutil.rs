//! Synthetic packet builders shared by protocol, parser and client tests

use crate::protocol::{
    DataPacket, FIRING_SIZE, FIRINGS_PER_PACKET, FiringData, HEADER_SIZE, M_SERIES_PAYLOAD_SIZE,
    NUM_LASERS, NUM_RETURNS, SIGNATURE,
};

/// Firing contents for an encoded test packet
#[derive(Debug, Clone, Copy)]
pub struct TestFiring {
    pub position: u16,
    pub distances: [[u32; NUM_LASERS]; NUM_RETURNS],
    pub intensities: [[u8; NUM_LASERS]; NUM_RETURNS],
}

impl TestFiring {
    /// A firing with the given position and no returns
    pub fn with_position(position: u16) -> Self {
        TestFiring {
            position,
            distances: [[0; NUM_LASERS]; NUM_RETURNS],
            intensities: [[0; NUM_LASERS]; NUM_RETURNS],
        }
    }

    /// A firing whose first return reports `distance` on every beam
    pub fn uniform(position: u16, distance: u32, intensity: u8) -> Self {
        let mut firing = Self::with_position(position);
        firing.distances[0] = [distance; NUM_LASERS];
        firing.intensities[0] = [intensity; NUM_LASERS];
        firing
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&self.position.to_be_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        for r in 0..NUM_RETURNS {
            for j in 0..NUM_LASERS {
                buf.extend_from_slice(&self.distances[r][j].to_be_bytes());
            }
        }
        for r in 0..NUM_RETURNS {
            buf.extend_from_slice(&self.intensities[r]);
        }
        debug_assert_eq!(buf.len() - start, FIRING_SIZE);
    }
}

/// Encode a complete framed packet (header, firings, trailing status)
pub fn encode_framed_packet(
    packet_type: u16,
    seconds: u32,
    nanoseconds: u32,
    version: u16,
    status: u16,
    firings: &[TestFiring],
) -> Vec<u8> {
    assert_eq!(firings.len(), FIRINGS_PER_PACKET);

    let total = HEADER_SIZE + M_SERIES_PAYLOAD_SIZE;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&SIGNATURE.to_be_bytes());
    buf.extend_from_slice(&(total as u32).to_be_bytes());
    buf.extend_from_slice(&packet_type.to_be_bytes());
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(&seconds.to_be_bytes());
    buf.extend_from_slice(&nanoseconds.to_be_bytes());
    for firing in firings {
        firing.encode_into(&mut buf);
    }
    buf.extend_from_slice(&status.to_be_bytes());
    debug_assert_eq!(buf.len(), total);
    buf
}

/// Encode a header-less legacy buffer (firings, then the legacy suffix)
pub fn encode_failover_packet(
    seconds: u32,
    nanoseconds: u32,
    version: u16,
    status: u16,
    firings: &[TestFiring],
) -> Vec<u8> {
    assert_eq!(firings.len(), FIRINGS_PER_PACKET);

    let mut buf = Vec::with_capacity(FIRINGS_PER_PACKET * FIRING_SIZE + 12);
    for firing in firings {
        firing.encode_into(&mut buf);
    }
    buf.extend_from_slice(&seconds.to_be_bytes());
    buf.extend_from_slice(&nanoseconds.to_be_bytes());
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(&status.to_be_bytes());
    buf
}

/// Build a decoded packet directly: one firing per entry of `positions`,
/// padded with repeats of the last position up to the packet size, every
/// beam's first return reporting `distance`.
pub fn data_packet(
    seconds: u32,
    nanoseconds: u32,
    version: u16,
    status: u16,
    positions: &[u16],
    distance: u32,
) -> DataPacket {
    assert!(!positions.is_empty() && positions.len() <= FIRINGS_PER_PACKET);

    let last = *positions.last().unwrap();
    let firings = (0..FIRINGS_PER_PACKET)
        .map(|i| {
            let position = positions.get(i).copied().unwrap_or(last);
            let test = TestFiring::uniform(position, distance, 40);
            FiringData {
                position: test.position,
                distances: test.distances,
                intensities: test.intensities,
            }
        })
        .collect();

    DataPacket {
        seconds,
        nanoseconds,
        version,
        status,
        firings,
    }
}
