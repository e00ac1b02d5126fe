//! Header-less legacy M8 packet parser
//!
//! Old M8 firmware streams fixed-size buffers with no framing header; the
//! seconds/nanoseconds/version/status words trail the firing block instead.
//! This parser accepts any buffer (it must therefore be registered last)
//! and applies the legacy cloud rules: first return only, emit on azimuth
//! reversal, cloud stamp taken from the packet that closed it.

use super::m_series::{SensorType, azimuth_degrees};
use super::{PacketParser, horizontal_angle_table, organize};
use crate::error::{Error, Result};
use crate::protocol::{DataPacket, FIRINGS_PER_PACKET, NUM_LASERS, NUM_ROT_ANGLES};
use crate::types::{PointCloud, PolarPoint};
use std::sync::Arc;

/// Position delta above which an endpoint difference is read as an encoder
/// wrap rather than genuine motion
const WRAP_THRESHOLD: i32 = 4000;

/// Legacy distances are always hundredths of a meter
const DISTANCE_SCALING: f32 = 0.01;

/// Ranges below this are treated as "no return"
const MIN_RANGE: f32 = 1e-4;

/// Initial `last_azimuth`, outside the valid degree range so the first
/// firing always starts a fresh cloud
const LAST_AZIMUTH_SENTINEL: f64 = 65000.0;

/// Decide the spin direction from the packet's endpoint positions.
///
/// A difference larger than the wrap threshold means the encoder wrapped
/// between the endpoints, so the apparent direction is inverted.
pub(crate) fn endpoint_direction(first: u16, last: u16) -> i32 {
    let delta = first as i32 - last as i32;
    if delta > 0 {
        if delta > WRAP_THRESHOLD { 1 } else { -1 }
    } else if -delta > WRAP_THRESHOLD {
        -1
    } else {
        1
    }
}

/// Sub-parser for header-less legacy M8 buffers
pub struct FailoverParser {
    frame_id: String,
    packet_counter: u64,
    cloud_counter: u32,
    last_azimuth: f64,
    horizontal_angles: Vec<f64>,
    vertical_angles: [f64; NUM_LASERS],
    current_cloud: PointCloud<PolarPoint>,
    scratch: Vec<PolarPoint>,
}

impl FailoverParser {
    pub fn new() -> Self {
        Self {
            frame_id: String::new(),
            packet_counter: 0,
            cloud_counter: 0,
            last_azimuth: LAST_AZIMUTH_SENTINEL,
            horizontal_angles: horizontal_angle_table(),
            vertical_angles: SensorType::M8.vertical_angles(),
            current_cloud: PointCloud::new(),
            scratch: Vec::new(),
        }
    }

    /// Coordinate frame stamped into every emitted cloud
    pub fn set_frame_id(&mut self, frame_id: impl Into<String>) {
        self.frame_id = frame_id.into();
    }

    /// Number of packets consumed
    pub fn packets_consumed(&self) -> u64 {
        self.packet_counter
    }
}

impl Default for FailoverParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser for FailoverParser {
    fn matches(&self, _packet: &[u8]) -> bool {
        true
    }

    fn parse(&mut self, packet: &[u8]) -> Result<Option<Arc<PointCloud<PolarPoint>>>> {
        let decoded = DataPacket::from_failover(packet)?;

        if decoded.status != 0 {
            log::warn!("Legacy sensor status nonzero: {:#06x}", decoded.status);
            if decoded.status == 1 {
                return Err(Error::FirmwareVersionMismatch);
            }
            // Sensor is in an error state; skip the packet.
            return Ok(None);
        }

        let stamp = decoded.stamp_us();
        self.packet_counter += 1;

        let direction = endpoint_direction(
            decoded.firings[0].position,
            decoded.firings[FIRINGS_PER_PACKET - 1].position,
        );

        let mut finished = None;

        for firing in &decoded.firings {
            let azimuth = azimuth_degrees(firing.position);

            // Azimuth moved backwards relative to the spin: one full
            // rotation has been covered.
            if direction as f64 * azimuth < direction as f64 * self.last_azimuth {
                if !self.current_cloud.is_empty() {
                    let mut cloud = std::mem::replace(&mut self.current_cloud, PointCloud::new());
                    cloud.header.stamp = stamp;
                    cloud.header.seq = self.cloud_counter;
                    cloud.header.frame_id = self.frame_id.clone();
                    organize(&mut cloud, &mut self.scratch);

                    self.cloud_counter += 1;
                    finished = Some(Arc::new(cloud));
                }
                self.current_cloud.is_dense = true;
            }

            let horizontal = self.horizontal_angles[(firing.position % NUM_ROT_ANGLES) as usize];

            for j in 0..NUM_LASERS {
                let mut range = firing.distances[0][j] as f32 * DISTANCE_SCALING;
                if range < MIN_RANGE {
                    range = f32::NAN;
                    self.current_cloud.is_dense = false;
                }

                self.current_cloud.push(PolarPoint {
                    h: horizontal,
                    v: self.vertical_angles[j],
                    d: range,
                    intensity: firing.intensities[0][j],
                    ring: j as u8,
                });
            }

            self.last_azimuth = azimuth;
        }

        Ok(finished)
    }
}
