//! Constant-velocity Kalman filters specialized for the observable types
//! the engine tracks: oriented boxes, 2D points and point vectors.

pub mod bbox;
pub mod point;

use nalgebra::{SMatrix, SVector};

pub use bbox::{BoxKalmanFilter, DIM_BOX, DIM_BOX_X2};
pub use point::{Point2D, PointKalmanFilter, PointVecKalmanFilter, DIM_POINT, DIM_POINT_X2};

/// 0.95 quantile of the chi-square distribution for 1..=9 degrees of
/// freedom, used to gate Mahalanobis distances.
pub const CHI2INV95: [f32; 9] = [
    3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];

/// Cost assigned to gated-out (implausible) associations.
pub const CHI2_UPPER_BOUND: f32 = 10000.0;

/// Prediction time step.
pub const DT: u64 = 1;

/// Filter state: mean vector and covariance matrix of dimension `X`.
#[derive(Copy, Clone, Debug)]
pub struct KalmanState<const X: usize> {
    pub mean: SVector<f32, X>,
    pub covariance: SMatrix<f32, X, X>,
}
