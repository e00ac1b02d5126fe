//! Drishti - streaming client for M-series spinning LiDAR sensors
//!
//! Consumes the sensor's TCP packet stream and turns it into point clouds:
//!
//! bytes -> raw packet -> firings -> polar cloud -> Cartesian cloud
//!
//! The [`client::StreamClient`] owns the connection and publishes raw packet
//! buffers; a [`parsers::PacketDispatcher`] routes each buffer to the
//! sub-parser for its packet type; the parser's cloud accumulator watches
//! the rotational geometry and emits a finished cloud per sweep; the
//! [`convert::PolarToCartConverter`] republishes each cloud in Cartesian
//! space. Stages hand artifacts to registered sinks synchronously on the
//! client's thread, so downstream ordering matches wire order.

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod parsers;
pub mod protocol;
pub mod signal;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use client::StreamClient;
pub use config::Config;
pub use convert::PolarToCartConverter;
pub use error::{Error, Result};
pub use parsers::{FailoverParser, MSeriesParser, PacketDispatcher, ReturnSelection, SensorType};
pub use types::{CartesianPoint, CloudHeader, PointCloud, PolarPoint};
