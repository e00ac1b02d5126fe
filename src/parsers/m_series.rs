//! M-series data packet parser
//!
//! Both framed packet revisions (types 0x0000 and 0x0001) carry the same
//! firing layout and share this implementation; they differ in the packet
//! type they claim and in the factory vertical-angle preset. The parser
//! feeds every firing into a [`CloudAccumulator`], which watches the
//! rotational geometry and hands back a finished cloud whenever the sweep
//! window closes.

use super::{MAX_CLOUD_SIZE, PacketParser, horizontal_angle_table, organize};
use crate::error::{Error, Result};
use crate::protocol::{
    DataPacket, FIRINGS_PER_PACKET, NUM_LASERS, NUM_RETURNS, NUM_ROT_ANGLES, PACKET_TYPE_00,
    PACKET_TYPE_01, PacketHeader, SIGNATURE, STATUS_SENSOR_SW_FW_MISMATCH,
    STATUS_WATCHDOG_VIOLATION,
};
use crate::types::{PointCloud, PolarPoint};
use std::sync::Arc;

/// Which echo(es) of each beam become points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnSelection {
    /// Keep every distinct nonzero return (clouds cannot be organized)
    All,
    /// Keep exactly one return index per beam
    Single(usize),
}

impl ReturnSelection {
    /// The strongest echo
    pub const MAX: Self = Self::Single(0);
    /// The first echo
    pub const FIRST: Self = Self::Single(1);
    /// The last echo
    pub const LAST: Self = Self::Single(2);
}

/// Factory vertical-angle presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    M8,
    MQ8,
}

/// M8 beam elevations in radians, ring 0 first
const M8_VERTICAL_ANGLES: [f64; NUM_LASERS] = [
    -0.318505, -0.2692, -0.218009, -0.165195, -0.111003, -0.0557982, 0.0, 0.0557982,
];

/// MQ8 beam elevations in radians, ring 0 first (2.5 degree spacing)
const MQ8_VERTICAL_ANGLES: [f64; NUM_LASERS] = [
    -0.2617994, -0.2181662, -0.1745329, -0.1308997, -0.0872665, -0.0436332, 0.0, 0.0436332,
];

impl SensorType {
    /// Beam elevations for this sensor, ring 0 first
    pub fn vertical_angles(self) -> [f64; NUM_LASERS] {
        match self {
            SensorType::M8 => M8_VERTICAL_ANGLES,
            SensorType::MQ8 => MQ8_VERTICAL_ANGLES,
        }
    }
}

/// Initial `last_azimuth` value, outside the valid degree range so the very
/// first firing always starts a fresh cloud
const LAST_AZIMUTH_SENTINEL: f64 = 65000.0;

const DEFAULT_MINIMUM_CLOUD_SIZE: usize = 1000;
const DEFAULT_MAXIMUM_CLOUD_SIZE: usize = 1_000_000;

/// Encoder position to signed degrees in `[-180, 180)`, shifted by half a
/// turn so the discontinuity lands opposite the encoder zero
pub(crate) fn azimuth_degrees(position: u16) -> f64 {
    let shifted = (position as u32 + NUM_ROT_ANGLES as u32 / 2) % NUM_ROT_ANGLES as u32;
    shifted as f64 / NUM_ROT_ANGLES as f64 * 360.0 - 180.0
}

/// Rotation-boundary state machine
///
/// Consumes decoded data packets firing by firing and emits a cloud when
/// the configured sweep has been covered. Holds the in-progress cloud, the
/// spin-direction estimate and the timestamp of the previous packet for
/// boundary interpolation.
pub struct CloudAccumulator {
    frame_id: String,
    return_selection: ReturnSelection,
    minimum_cloud_size: usize,
    maximum_cloud_size: usize,
    degrees_per_cloud: f64,
    horizontal_angles: Vec<f64>,
    vertical_angles: Vec<f64>,

    direction: i32,
    last_azimuth: f64,
    start_azimuth: f64,
    previous_status: u16,
    previous_packet_stamp: u64,
    packet_counter: u64,
    cloud_counter: u32,

    current_cloud: PointCloud<PolarPoint>,
    scratch: Vec<PolarPoint>,
}

impl CloudAccumulator {
    /// Create an accumulator with no vertical angles configured.
    ///
    /// [`CloudAccumulator::accumulate`] fails until angles are provided via
    /// [`set_vertical_angles`](Self::set_vertical_angles) or
    /// [`set_sensor_type`](Self::set_sensor_type).
    pub fn new() -> Self {
        Self {
            frame_id: String::new(),
            return_selection: ReturnSelection::All,
            minimum_cloud_size: DEFAULT_MINIMUM_CLOUD_SIZE,
            maximum_cloud_size: DEFAULT_MAXIMUM_CLOUD_SIZE,
            degrees_per_cloud: 360.0,
            horizontal_angles: horizontal_angle_table(),
            vertical_angles: Vec::new(),
            direction: 1,
            last_azimuth: LAST_AZIMUTH_SENTINEL,
            start_azimuth: 0.0,
            previous_status: 0,
            previous_packet_stamp: 0,
            packet_counter: 0,
            cloud_counter: 0,
            current_cloud: PointCloud::with_capacity(DEFAULT_MAXIMUM_CLOUD_SIZE),
            scratch: Vec::new(),
        }
    }

    /// Coordinate frame stamped into every emitted cloud
    pub fn set_frame_id(&mut self, frame_id: impl Into<String>) {
        self.frame_id = frame_id.into();
    }

    /// Select which returns become points.
    ///
    /// `Single(k)` requires `k < NUM_LASERS` to match the sensor SDK's
    /// documented surface; only indices below [`NUM_RETURNS`] address a
    /// physical echo, larger ones produce empty clouds.
    pub fn set_return_selection(&mut self, selection: ReturnSelection) -> Result<()> {
        if let ReturnSelection::Single(k) = selection {
            if k >= NUM_LASERS {
                return Err(Error::InvalidReturnSelection(k));
            }
        }
        self.return_selection = selection;
        Ok(())
    }

    /// Set the emission size window. Non-positive arguments leave the
    /// corresponding limit unchanged; the minimum is clamped to at least 1
    /// and the maximum to at least the minimum.
    pub fn set_cloud_size_limits(&mut self, min: i32, max: i32) -> Result<()> {
        if min as i64 > MAX_CLOUD_SIZE as i64 || max as i64 > MAX_CLOUD_SIZE as i64 {
            return Err(Error::Config(format!(
                "cloud size limits cannot be larger than {MAX_CLOUD_SIZE}"
            )));
        }
        if min > 0 {
            self.minimum_cloud_size = min.max(1) as usize;
        }
        if max > 0 {
            self.maximum_cloud_size = (max as usize).max(self.minimum_cloud_size);
        }
        Ok(())
    }

    /// Width of the azimuth sweep per emitted cloud, in `(0, 360]` degrees
    pub fn set_degrees_per_cloud(&mut self, degrees: f64) -> Result<()> {
        if !(degrees > 0.0 && degrees <= 360.0) {
            return Err(Error::InvalidDegreesPerCloud(degrees));
        }
        self.degrees_per_cloud = degrees;
        Ok(())
    }

    /// Provide an explicit beam elevation table, ring 0 first
    pub fn set_vertical_angles(&mut self, angles: &[f64]) -> Result<()> {
        if angles.len() != NUM_LASERS {
            return Err(Error::InvalidVerticalAngles(format!(
                "expected {} angles, got {}",
                NUM_LASERS,
                angles.len()
            )));
        }
        self.vertical_angles = angles.to_vec();
        Ok(())
    }

    /// Load a factory vertical-angle preset
    pub fn set_sensor_type(&mut self, sensor: SensorType) {
        self.vertical_angles = sensor.vertical_angles().to_vec();
    }

    /// Number of packets consumed
    pub fn packets_consumed(&self) -> u64 {
        self.packet_counter
    }

    /// Number of clouds emitted
    pub fn clouds_emitted(&self) -> u32 {
        self.cloud_counter
    }

    /// Feed one decoded packet through the state machine.
    ///
    /// Returns the completed cloud when a rotation boundary closes one that
    /// meets the minimum size. Firmware status flags abort the call before
    /// any firing is consumed.
    pub fn accumulate(&mut self, packet: &DataPacket) -> Result<Option<Arc<PointCloud<PolarPoint>>>> {
        if self.vertical_angles.is_empty() {
            return Err(Error::InvalidVerticalAngles(
                "no vertical angle table configured; call set_vertical_angles first".into(),
            ));
        }

        if packet.status != 0 {
            if packet.status & STATUS_SENSOR_SW_FW_MISMATCH != 0 {
                return Err(Error::FirmwareVersionMismatch);
            }
            if packet.status & STATUS_WATCHDOG_VIOLATION != 0 {
                return Err(Error::FirmwareWatchdogViolation);
            }
            // Unknown status bits are not necessarily fatal; keep parsing.
        }
        if packet.status != self.previous_status {
            log::warn!("Sensor status changed: {:#06x}", packet.status);
            self.previous_status = packet.status;
        }

        let current_packet_stamp = packet.stamp_us();
        if self.previous_packet_stamp == 0 {
            self.previous_packet_stamp = current_packet_stamp;
        }
        self.packet_counter += 1;

        // Check three positions to find the spin direction; if they disagree
        // the packet straddles the encoder wrap and the previous estimate
        // stands.
        let first = packet.firings[0].position as i32;
        let middle = packet.firings[FIRINGS_PER_PACKET / 2].position as i32;
        let last = packet.firings[FIRINGS_PER_PACKET - 1].position as i32;
        if first < middle && middle < last {
            self.direction = 1;
        } else if first > middle && middle > last {
            self.direction = -1;
        }

        let distance_scaling: f32 = if packet.version >= 5 { 1e-5 } else { 0.01 };

        let mut finished = None;
        let mut cloudfull = self.current_cloud.len() >= self.maximum_cloud_size;

        for (i, firing) in packet.firings.iter().enumerate() {
            let azimuth = azimuth_degrees(firing.position);

            let mut delta = 0.0;
            if self.cloud_counter == 0 && self.start_azimuth == 0.0 {
                // Sentinel for "no sweep started yet"; collides with a
                // legitimate first azimuth of exactly zero, which only
                // shifts the very first boundary.
                self.start_azimuth = azimuth;
            } else {
                delta = self.direction as f64 * (azimuth - self.start_azimuth);
                while delta < 0.0 {
                    delta += 360.0;
                }
            }

            let wrap_edge = self.degrees_per_cloud == 360.0
                && self.direction as f64 * azimuth < self.direction as f64 * self.last_azimuth;

            if delta >= self.degrees_per_cloud || wrap_edge {
                self.start_azimuth = azimuth;

                if self.current_cloud.len() > self.minimum_cloud_size {
                    if cloudfull {
                        log::warn!(
                            "Maximum cloud size limit of {} exceeded",
                            self.maximum_cloud_size
                        );
                    }

                    // The boundary fell i firings into this packet; place the
                    // cloud stamp proportionally between the packet stamps.
                    let elapsed = current_packet_stamp.saturating_sub(self.previous_packet_stamp)
                        as f64
                        * i as f64
                        / FIRINGS_PER_PACKET as f64;
                    let stamp = (self.previous_packet_stamp as f64 + elapsed).round() as u64;

                    let mut cloud = std::mem::replace(
                        &mut self.current_cloud,
                        PointCloud::with_capacity(self.maximum_cloud_size),
                    );
                    cloud.header.stamp = stamp;
                    cloud.header.seq = self.cloud_counter;
                    cloud.header.frame_id = self.frame_id.clone();

                    if self.return_selection == ReturnSelection::All {
                        // Duplicate echoes were filtered per beam; the cloud
                        // has no fixed row structure to organize.
                        cloud.set_unorganized();
                    } else {
                        organize(&mut cloud, &mut self.scratch);
                    }

                    self.cloud_counter += 1;
                    finished = Some(Arc::new(cloud));
                } else {
                    if !self.current_cloud.is_empty() {
                        log::warn!(
                            "Minimum cloud size limit of {} not reached ({})",
                            self.minimum_cloud_size,
                            self.current_cloud.len()
                        );
                    }
                    self.current_cloud =
                        PointCloud::with_capacity(self.maximum_cloud_size);
                }
                cloudfull = false;
            }

            // The full check happens once per packet: a cloud crossing the
            // limit mid-packet keeps the rest of that packet's firings and
            // loses whole packets from then on.
            if !cloudfull {
                self.append_firing(firing, distance_scaling);
            }

            self.last_azimuth = azimuth;
        }

        self.previous_packet_stamp = current_packet_stamp;

        Ok(finished)
    }

    fn append_firing(&mut self, firing: &crate::protocol::FiringData, scale: f32) {
        let horizontal =
            self.horizontal_angles[(firing.position % NUM_ROT_ANGLES) as usize];

        for j in 0..NUM_LASERS {
            let vertical = self.vertical_angles[j];
            match self.return_selection {
                ReturnSelection::All => {
                    // Keep distinct nonzero echoes only. The max return may
                    // equal the first and/or last; duplicates are dropped.
                    // Intensity always comes from the max return, which is
                    // how the sensor reports it.
                    let intensity = firing.intensities[0][j];
                    let max_distance = firing.distances[0][j];
                    if max_distance != 0 {
                        self.push_point(horizontal, vertical, max_distance as f32 * scale, intensity, j);
                    }
                    for r in 1..NUM_RETURNS {
                        let d = firing.distances[r][j];
                        if d != 0 && d != max_distance {
                            self.push_point(horizontal, vertical, d as f32 * scale, intensity, j);
                        }
                    }
                }
                ReturnSelection::Single(k) => {
                    let Some(distances) = firing.distances.get(k) else {
                        continue;
                    };
                    let intensity = firing.intensities[k][j];
                    if distances[j] == 0 {
                        self.current_cloud.is_dense = false;
                        self.push_point(horizontal, vertical, f32::NAN, intensity, j);
                    } else {
                        self.push_point(horizontal, vertical, distances[j] as f32 * scale, intensity, j);
                    }
                }
            }
        }
    }

    #[inline]
    fn push_point(&mut self, h: f64, v: f64, d: f32, intensity: u8, ring: usize) {
        self.current_cloud.push(PolarPoint {
            h,
            v,
            d,
            intensity,
            ring: ring as u8,
        });
    }
}

impl Default for CloudAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sub-parser for one framed M-series packet type
pub struct MSeriesParser {
    packet_type: u16,
    accumulator: CloudAccumulator,
}

impl MSeriesParser {
    /// Parser for packet type 0x0000, preset with M8 beam angles
    pub fn new_00() -> Self {
        let mut accumulator = CloudAccumulator::new();
        accumulator.set_sensor_type(SensorType::M8);
        Self {
            packet_type: PACKET_TYPE_00,
            accumulator,
        }
    }

    /// Parser for packet type 0x0001, preset with MQ8 beam angles
    pub fn new_01() -> Self {
        let mut accumulator = CloudAccumulator::new();
        accumulator.set_sensor_type(SensorType::MQ8);
        Self {
            packet_type: PACKET_TYPE_01,
            accumulator,
        }
    }

    /// The cloud accumulator, for configuration
    pub fn accumulator_mut(&mut self) -> &mut CloudAccumulator {
        &mut self.accumulator
    }

    /// The cloud accumulator's counters
    pub fn accumulator(&self) -> &CloudAccumulator {
        &self.accumulator
    }
}

impl PacketParser for MSeriesParser {
    fn matches(&self, packet: &[u8]) -> bool {
        match PacketHeader::from_packet(packet) {
            Ok(header) => {
                header.signature == SIGNATURE && header.packet_type == self.packet_type
            }
            Err(_) => false,
        }
    }

    fn parse(&mut self, packet: &[u8]) -> Result<Option<Arc<PointCloud<PolarPoint>>>> {
        let decoded = DataPacket::from_framed(packet)?;
        self.accumulator.accumulate(&decoded)
    }
}
