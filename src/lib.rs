//! # Tracklet - Multi-Object Tracking Engine
//!
//! A sharded multi-object tracking engine built around SORT-style
//! association: constant-velocity Kalman prediction, positional metrics
//! (IoU or Mahalanobis) and an optional visual re-identification layer
//! with majority feature voting.
//!
//! ## Features
//!
//! - Axis-aligned and oriented bounding boxes with polygon-clipping IoU
//! - Kalman filters for oriented boxes, 2D points and point vectors
//! - Greedy and optimal (Hungarian) association
//! - Per-scene track stores with an epoch-based lifecycle
//! - Batched prediction sharded across scenes with deterministic output
//!
//! ## Example
//!
//! ```rust,ignore
//! use tracklet::{Tracker, TrackerConfig, Observation, BoundingBox, PositionalMetricType};
//!
//! let config = TrackerConfig::new(PositionalMetricType::IoU(0.3));
//! let mut tracker = Tracker::new(config).unwrap();
//!
//! let obs = vec![Observation::new(BoundingBox::new(10.0, 5.0, 7.0, 7.0).into())];
//! let tracks = tracker.predict(&obs);
//! ```

pub mod assignment;
pub mod batch;
pub mod bbox;
pub mod clipping;
pub mod constraints;
pub mod features;
pub mod kalman;
pub mod metric;
pub mod nms;
pub mod store;
pub mod track;
pub mod tracker;
pub mod voting;

// Re-exports for convenience
pub use batch::{BatchRequest, BatchResult, SceneTracks};
pub use bbox::{BoundingBox, OrientedBox};
pub use constraints::SpatioTemporalConstraints;
pub use features::VisualMetricType;
pub use metric::PositionalMetricType;
pub use nms::{nms, parallel_nms};
pub use track::{Track, VotingType, WastedTrack};
pub use tracker::{Observation, Tracker, TrackerConfig, VisualOptions};

// Error types
pub use crate::error::{Error, Result};

/// Tolerance used by approximate geometry comparisons.
pub const EPS: f32 = 0.00001;

mod error {
    use thiserror::Error;

    /// Errors that can occur in the tracklet library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid observation: {0}")]
        InvalidObservation(String),

        #[error("Degenerate computation: {0}")]
        Degenerate(String),

        #[error("Conversion error: {0}")]
        ConversionError(String),
    }

    /// Result type for tracklet operations
    pub type Result<T> = std::result::Result<T, Error>;
}
