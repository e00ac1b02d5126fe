//! Packet parsing and cloud assembly
//!
//! A [`PacketDispatcher`] owns an ordered set of sub-parsers. Each raw
//! buffer published by the stream client is offered to the sub-parsers in
//! registration order; the first whose [`PacketParser::matches`] predicate
//! accepts the buffer consumes it. The failover parser matches anything and
//! must therefore be registered last.

mod failover;
mod m_series;

pub use failover::FailoverParser;
pub use m_series::{CloudAccumulator, MSeriesParser, ReturnSelection, SensorType};

use crate::error::Result;
use crate::protocol::{NUM_LASERS, NUM_ROT_ANGLES};
use crate::signal::{Signal, Subscription};
use crate::types::{PointCloud, PolarPoint};
use std::sync::Arc;

/// Hard ceiling for configurable cloud size limits
pub const MAX_CLOUD_SIZE: usize = 5_000_000;

/// One sub-parser of the version-tagged packet family
pub trait PacketParser: Send {
    /// Whether this parser understands the given raw buffer
    fn matches(&self, packet: &[u8]) -> bool;

    /// Consume one raw buffer, returning a completed cloud if the packet
    /// closed a rotation boundary
    fn parse(&mut self, packet: &[u8]) -> Result<Option<Arc<PointCloud<PolarPoint>>>>;
}

/// Routes raw packet buffers to the first matching sub-parser
pub struct PacketDispatcher {
    parsers: Vec<Box<dyn PacketParser>>,
    unknown_packets: u64,
    cloud_signal: Signal<Arc<PointCloud<PolarPoint>>>,
}

impl PacketDispatcher {
    /// Create a dispatcher with no sub-parsers registered
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
            unknown_packets: 0,
            cloud_signal: Signal::new(),
        }
    }

    /// Register a sub-parser. Order matters: buffers go to the first match,
    /// so a universal-match parser belongs at the end.
    pub fn register(&mut self, parser: Box<dyn PacketParser>) {
        self.parsers.push(parser);
    }

    /// Register a sink for completed polar clouds
    pub fn subscribe<F>(&self, sink: F) -> Subscription
    where
        F: Fn(&Arc<PointCloud<PolarPoint>>) + Send + Sync + 'static,
    {
        self.cloud_signal.connect(sink)
    }

    /// Offer one raw buffer to the sub-parsers.
    ///
    /// Returns the completed cloud, if the packet closed one. A buffer no
    /// parser matches is dropped and counted, not an error.
    pub fn dispatch(&mut self, packet: &[u8]) -> Result<Option<Arc<PointCloud<PolarPoint>>>> {
        for parser in &mut self.parsers {
            if !parser.matches(packet) {
                continue;
            }
            let cloud = parser.parse(packet)?;
            if let Some(ref cloud) = cloud {
                self.cloud_signal.emit(cloud);
            }
            return Ok(cloud);
        }

        self.unknown_packets += 1;
        log::debug!(
            "No parser matched a {} byte packet ({} unknown so far)",
            packet.len(),
            self.unknown_packets
        );
        Ok(None)
    }

    /// Number of buffers dropped because no parser matched
    pub fn unknown_packet_count(&self) -> u64 {
        self.unknown_packets
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the horizontal-angle lookup table.
///
/// Entry `p` maps encoder position `p` onto `[-pi, pi)`. Positions are
/// shifted by half a turn before normalizing so the wrap lands opposite the
/// encoder zero; one guard entry past the end aliases position 0.
pub(crate) fn horizontal_angle_table() -> Vec<f64> {
    let n = NUM_ROT_ANGLES as u32;
    (0..=n)
        .map(|i| {
            let shifted = (i + n / 2) % n;
            let normalized = shifted as f64 / n as f64;
            normalized * std::f64::consts::PI * 2.0 - std::f64::consts::PI
        })
        .collect()
}

/// Transpose a cloud from collect-major/laser-minor order into ring rows,
/// top ring first, and stamp the organized shape.
///
/// `scratch` is reused across clouds to avoid reallocating per rotation.
pub(crate) fn organize(cloud: &mut PointCloud<PolarPoint>, scratch: &mut Vec<PolarPoint>) {
    let width = cloud.len() / NUM_LASERS;

    scratch.clear();
    scratch.reserve(cloud.len());
    for ring in (0..NUM_LASERS).rev() {
        for column in 0..width {
            scratch.push(cloud.points[column * NUM_LASERS + ring]);
        }
    }
    std::mem::swap(&mut cloud.points, scratch);

    cloud.height = NUM_LASERS as u32;
    cloud.width = width as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FIRINGS_PER_PACKET, PACKET_TYPE_00};
    use crate::testutil::{TestFiring, encode_framed_packet};
    use parking_lot::Mutex;
    use std::f64::consts::PI;

    /// Framed packets advancing 4 ticks per firing from the half-turn
    /// position, every first return at 100 ticks
    fn framed_sweep(packet_type: u16, count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|n| {
                let firings: Vec<TestFiring> = (0..FIRINGS_PER_PACKET)
                    .map(|i| {
                        let k = (n * FIRINGS_PER_PACKET + i) as u32;
                        let position = ((5200 + 4 * k) % NUM_ROT_ANGLES as u32) as u16;
                        TestFiring::uniform(position, 100, 60)
                    })
                    .collect();
                encode_framed_packet(packet_type, 100 + n as u32, 0, 0, 0, &firings)
            })
            .collect()
    }

    fn full_dispatcher() -> PacketDispatcher {
        let mut parser_00 = MSeriesParser::new_00();
        parser_00
            .accumulator_mut()
            .set_return_selection(ReturnSelection::MAX)
            .unwrap();
        let mut dispatcher = PacketDispatcher::new();
        dispatcher.register(Box::new(parser_00));
        dispatcher.register(Box::new(MSeriesParser::new_01()));
        dispatcher.register(Box::new(FailoverParser::new()));
        dispatcher
    }

    #[test]
    fn test_dispatcher_routes_and_publishes() {
        let mut dispatcher = full_dispatcher();

        let received: Arc<Mutex<Vec<Arc<PointCloud<PolarPoint>>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let _subscription = dispatcher.subscribe(move |cloud| {
            sink.lock().push(Arc::clone(cloud));
        });

        let mut returned = 0;
        for packet in framed_sweep(PACKET_TYPE_00, 53) {
            if dispatcher.dispatch(&packet).unwrap().is_some() {
                returned += 1;
            }
        }

        assert_eq!(returned, 1);
        let clouds = received.lock();
        assert_eq!(clouds.len(), 1);
        assert_eq!(clouds[0].len(), 2600 * NUM_LASERS);
        assert_eq!(dispatcher.unknown_packet_count(), 0);
    }

    #[test]
    fn test_match_predicates() {
        let parser_00 = MSeriesParser::new_00();
        let parser_01 = MSeriesParser::new_01();
        let failover = FailoverParser::new();

        let framed = &framed_sweep(PACKET_TYPE_00, 1)[0];
        assert!(parser_00.matches(framed));
        assert!(!parser_01.matches(framed));
        // The failover predicate accepts anything, including framed packets
        assert!(failover.matches(framed));
        assert!(failover.matches(&[0u8; 16]));
        assert!(!parser_00.matches(&[0u8; 16]));
    }

    #[test]
    fn test_unknown_type_is_counted_without_failover() {
        let mut dispatcher = PacketDispatcher::new();
        dispatcher.register(Box::new(MSeriesParser::new_00()));
        dispatcher.register(Box::new(MSeriesParser::new_01()));

        let packet = &framed_sweep(0x0007, 1)[0];
        assert!(dispatcher.dispatch(packet).unwrap().is_none());
        assert_eq!(dispatcher.unknown_packet_count(), 1);
    }

    #[test]
    fn test_unknown_type_with_failover_is_malformed() {
        // A framed packet of unknown type falls through to the failover
        // parser, whose size check rejects it
        let mut dispatcher = full_dispatcher();
        let packet = &framed_sweep(0x0007, 1)[0];
        assert!(dispatcher.dispatch(packet).is_err());
        assert_eq!(dispatcher.unknown_packet_count(), 0);
    }

    #[test]
    fn test_horizontal_table_shape() {
        let table = horizontal_angle_table();
        assert_eq!(table.len(), NUM_ROT_ANGLES as usize + 1);
        // Position 0 sits at the center of the range, half a turn from the wrap
        assert!(table[0].abs() < 1e-12);
        assert!((table[NUM_ROT_ANGLES as usize / 2] + PI).abs() < 1e-12);
        // Guard entry aliases position 0
        assert_eq!(table[NUM_ROT_ANGLES as usize], table[0]);
    }

    #[test]
    fn test_horizontal_table_range_and_monotonicity() {
        let table = horizontal_angle_table();
        let wrap = NUM_ROT_ANGLES as usize / 2;
        for p in 0..NUM_ROT_ANGLES as usize {
            assert!(table[p] >= -PI && table[p] < PI, "entry {p} out of range");
            if p + 1 < NUM_ROT_ANGLES as usize && p + 1 != wrap {
                assert!(table[p + 1] > table[p], "not increasing at {p}");
            }
        }
    }

    #[test]
    fn test_organize_transposes_rings_top_down() {
        let mut cloud = PointCloud::new();
        // Two firings of eight beams, tagged so origin is recoverable
        for firing in 0..2u8 {
            for ring in 0..NUM_LASERS as u8 {
                cloud.push(PolarPoint {
                    h: firing as f64,
                    v: ring as f64,
                    d: 1.0,
                    intensity: firing * 10 + ring,
                    ring,
                });
            }
        }

        let mut scratch = Vec::new();
        organize(&mut cloud, &mut scratch);

        assert_eq!(cloud.height, NUM_LASERS as u32);
        assert_eq!(cloud.width, 2);
        assert_eq!(cloud.len(), NUM_LASERS * 2);
        // First row is the top ring across both firings
        assert_eq!(cloud.points[0].ring, 7);
        assert_eq!(cloud.points[0].h, 0.0);
        assert_eq!(cloud.points[1].ring, 7);
        assert_eq!(cloud.points[1].h, 1.0);
        // Last row is ring 0
        assert_eq!(cloud.points[14].ring, 0);
        assert_eq!(cloud.points[15].h, 1.0);
    }
}
