//! Kalman filters for 2D points and vectors of 2D points.

use crate::kalman::{KalmanState, CHI2INV95, CHI2_UPPER_BOUND, DT};
use crate::{Error, Result};
use nalgebra::{SMatrix, SVector};
use std::ops::SubAssign;

pub const DIM_POINT: usize = 2;
pub const DIM_POINT_X2: usize = DIM_POINT * 2;

/// A plain 2D point.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<KalmanState<DIM_POINT_X2>> for Point2D {
    fn from(s: KalmanState<DIM_POINT_X2>) -> Self {
        Point2D::new(s.mean[0], s.mean[1])
    }
}

/// Kalman filter for a single 2D point.
#[derive(Debug)]
pub struct PointKalmanFilter {
    motion_matrix: SMatrix<f32, DIM_POINT_X2, DIM_POINT_X2>,
    update_matrix: SMatrix<f32, DIM_POINT, DIM_POINT_X2>,
    std_position_weight: f32,
    std_velocity_weight: f32,
}

/// Default initializer
impl Default for PointKalmanFilter {
    fn default() -> Self {
        PointKalmanFilter::new(1.0 / 20.0, 1.0 / 160.0)
    }
}

impl PointKalmanFilter {
    pub fn new(position_weight: f32, velocity_weight: f32) -> Self {
        let mut motion_matrix: SMatrix<f32, DIM_POINT_X2, DIM_POINT_X2> = SMatrix::identity();

        for i in 0..DIM_POINT {
            motion_matrix[(i, DIM_POINT + i)] = DT as f32;
        }

        PointKalmanFilter {
            motion_matrix,
            update_matrix: SMatrix::identity(),
            std_position_weight: position_weight,
            std_velocity_weight: velocity_weight,
        }
    }

    #[inline]
    fn std_position(&self, k: f32) -> [f32; DIM_POINT] {
        let pos_weight = k * self.std_position_weight;
        [pos_weight, pos_weight]
    }

    #[inline]
    fn std_velocity(&self, k: f32) -> [f32; DIM_POINT] {
        let vel_weight = k * self.std_velocity_weight;
        [vel_weight, vel_weight]
    }

    pub fn initiate(&self, p: &Point2D) -> KalmanState<DIM_POINT_X2> {
        let mean: SVector<f32, DIM_POINT_X2> = SVector::from_iterator([p.x, p.y, 0.0, 0.0]);

        let mut std: SVector<f32, DIM_POINT_X2> = SVector::from_iterator(
            self.std_position(2.0)
                .into_iter()
                .chain(self.std_velocity(10.0)),
        );

        std = std.component_mul(&std);

        let covariance: SMatrix<f32, DIM_POINT_X2, DIM_POINT_X2> = SMatrix::from_diagonal(&std);
        KalmanState { mean, covariance }
    }

    pub fn predict(&self, state: &KalmanState<DIM_POINT_X2>) -> KalmanState<DIM_POINT_X2> {
        let (mean, covariance) = (state.mean, state.covariance);

        let mut std: SVector<f32, DIM_POINT_X2> = SVector::from_iterator(
            self.std_position(1.0)
                .into_iter()
                .chain(self.std_velocity(1.0)),
        );

        std = std.component_mul(&std);

        let motion_cov: SMatrix<f32, DIM_POINT_X2, DIM_POINT_X2> = SMatrix::from_diagonal(&std);

        let mean = self.motion_matrix * mean;
        let covariance =
            self.motion_matrix * covariance * self.motion_matrix.transpose() + motion_cov;
        KalmanState { mean, covariance }
    }

    fn project(
        &self,
        mean: SVector<f32, DIM_POINT_X2>,
        covariance: SMatrix<f32, DIM_POINT_X2, DIM_POINT_X2>,
    ) -> KalmanState<DIM_POINT> {
        let mut std: SVector<f32, DIM_POINT> = SVector::from_iterator(self.std_position(1.0));

        std = std.component_mul(&std);

        let innovation_cov: SMatrix<f32, DIM_POINT, DIM_POINT> = SMatrix::from_diagonal(&std);

        let mean = self.update_matrix * mean;
        let covariance =
            self.update_matrix * covariance * self.update_matrix.transpose() + innovation_cov;
        KalmanState { mean, covariance }
    }

    pub fn update(
        &self,
        state: &KalmanState<DIM_POINT_X2>,
        p: &Point2D,
    ) -> Result<KalmanState<DIM_POINT_X2>> {
        let (mean, covariance) = (state.mean, state.covariance);
        let projected_state = self.project(mean, covariance);
        let (projected_mean, projected_cov) = (projected_state.mean, projected_state.covariance);
        let b = (covariance * self.update_matrix.transpose()).transpose();
        let kalman_gain = projected_cov
            .solve_lower_triangular(&b)
            .ok_or_else(|| Error::Degenerate("singular projected covariance in update".to_owned()))?;

        let innovation = SVector::from_iterator([p.x, p.y]) - projected_mean;
        let innovation: SMatrix<f32, 1, DIM_POINT> = innovation.transpose();

        let mean = mean + (innovation * kalman_gain).transpose();
        let covariance = covariance - kalman_gain.transpose() * projected_cov * kalman_gain;
        Ok(KalmanState { mean, covariance })
    }

    /// Squared Mahalanobis distance between the projected state and the
    /// measurement.
    pub fn distance(&self, state: &KalmanState<DIM_POINT_X2>, p: &Point2D) -> Result<f32> {
        let (mean, covariance) = (state.mean, state.covariance);
        let projected_state = self.project(mean, covariance);
        let (mean, covariance) = (projected_state.mean, projected_state.covariance);

        let measurements = {
            let mut r: SVector<f32, DIM_POINT> = SVector::from_iterator([p.x, p.y]);
            r.sub_assign(&mean);
            r
        };

        let choletsky = covariance
            .cholesky()
            .ok_or_else(|| {
                Error::Degenerate("projected covariance is not positive definite".to_owned())
            })?
            .l();
        let res = choletsky
            .solve_lower_triangular(&measurements)
            .ok_or_else(|| Error::Degenerate("singular cholesky factor".to_owned()))?;
        Ok(res.component_mul(&res).sum())
    }

    pub fn calculate_cost(distance: f32, inverted: bool) -> f32 {
        if !inverted {
            if distance > CHI2INV95[1] {
                CHI2_UPPER_BOUND
            } else {
                distance
            }
        } else if distance > CHI2INV95[4] {
            0.0
        } else {
            CHI2_UPPER_BOUND - distance
        }
    }
}

/// Elementwise application of [`PointKalmanFilter`] over point slices.
#[derive(Debug)]
pub struct PointVecKalmanFilter {
    f: PointKalmanFilter,
}

/// Default initializer
impl Default for PointVecKalmanFilter {
    fn default() -> Self {
        Self {
            f: PointKalmanFilter::new(1.0 / 20.0, 1.0 / 160.0),
        }
    }
}

impl PointVecKalmanFilter {
    pub fn new(position_weight: f32, velocity_weight: f32) -> Self {
        Self {
            f: PointKalmanFilter::new(position_weight, velocity_weight),
        }
    }

    pub fn initiate(&self, points: &[Point2D]) -> Vec<KalmanState<DIM_POINT_X2>> {
        points.iter().map(|p| self.f.initiate(p)).collect()
    }

    pub fn predict(&self, state: &[KalmanState<DIM_POINT_X2>]) -> Vec<KalmanState<DIM_POINT_X2>> {
        state.iter().map(|s| self.f.predict(s)).collect()
    }

    pub fn update(
        &self,
        state: &[KalmanState<DIM_POINT_X2>],
        points: &[Point2D],
    ) -> Result<Vec<KalmanState<DIM_POINT_X2>>> {
        assert_eq!(
            state.len(),
            points.len(),
            "Lengths of state and points must match"
        );
        state
            .iter()
            .zip(points.iter())
            .map(|(s, p)| self.f.update(s, p))
            .collect()
    }

    pub fn distance(
        &self,
        state: &[KalmanState<DIM_POINT_X2>],
        points: &[Point2D],
    ) -> Result<Vec<f32>> {
        assert_eq!(
            state.len(),
            points.len(),
            "Lengths of state and points must match"
        );
        state
            .iter()
            .zip(points.iter())
            .map(|(s, p)| self.f.distance(s, p))
            .collect()
    }

    pub fn calculate_cost(distances: &[f32], inverted: bool) -> Vec<f32> {
        distances
            .iter()
            .map(|d| PointKalmanFilter::calculate_cost(*d, inverted))
            .collect()
    }
}
