//! Polar to Cartesian cloud conversion
//!
//! The final pipeline stage. Pure per-cloud transformation; holds no state
//! between clouds, so ordering and headers pass through untouched.

use crate::signal::{Signal, Subscription};
use crate::types::{CartesianPoint, PointCloud, PolarPoint};
use std::sync::Arc;

/// Converts finished polar clouds and republishes them in Cartesian space
pub struct PolarToCartConverter {
    signal: Signal<Arc<PointCloud<CartesianPoint>>>,
}

impl PolarToCartConverter {
    pub fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Register a sink for converted clouds
    pub fn subscribe<F>(&self, sink: F) -> Subscription
    where
        F: Fn(&Arc<PointCloud<CartesianPoint>>) + Send + Sync + 'static,
    {
        self.signal.connect(sink)
    }

    /// Convert one cloud. Header, organization and density carry over; NaN
    /// ranges become NaN coordinates.
    pub fn convert(cloud: &PointCloud<PolarPoint>) -> PointCloud<CartesianPoint> {
        PointCloud {
            header: cloud.header.clone(),
            points: cloud.points.iter().map(PolarPoint::to_cartesian).collect(),
            height: cloud.height,
            width: cloud.width,
            is_dense: cloud.is_dense,
        }
    }

    /// Sink entry point: convert and publish downstream
    pub fn accept(&self, cloud: &Arc<PointCloud<PolarPoint>>) {
        let converted = Arc::new(Self::convert(cloud));
        self.signal.emit(&converted);
    }
}

impl Default for PolarToCartConverter {
    fn default() -> Self {
        Self::new()
    }
}
