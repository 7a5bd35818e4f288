//! Kalman filter over oriented boxes: (xc, yc, angle, aspect, height)
//! observables plus their velocities.

use crate::bbox::{BoundingBox, OrientedBox};
use crate::kalman::{KalmanState, CHI2INV95, CHI2_UPPER_BOUND, DT};
use crate::{Error, Result};
use nalgebra::{SMatrix, SVector};
use std::ops::SubAssign;

pub const DIM_BOX: usize = 5;
pub const DIM_BOX_X2: usize = DIM_BOX * 2;

/// Kalman filter for oriented boxes.
#[derive(Debug)]
pub struct BoxKalmanFilter {
    motion_matrix: SMatrix<f32, DIM_BOX_X2, DIM_BOX_X2>,
    update_matrix: SMatrix<f32, DIM_BOX, DIM_BOX_X2>,
    std_position_weight: f32,
    std_velocity_weight: f32,
}

/// Default initializer
impl Default for BoxKalmanFilter {
    fn default() -> Self {
        BoxKalmanFilter::new(1.0 / 20.0, 1.0 / 160.0)
    }
}

impl BoxKalmanFilter {
    /// Constructor with custom noise weights (shouldn't be used without
    /// the need)
    pub fn new(position_weight: f32, velocity_weight: f32) -> Self {
        let mut motion_matrix: SMatrix<f32, DIM_BOX_X2, DIM_BOX_X2> = SMatrix::identity();

        for i in 0..DIM_BOX {
            motion_matrix[(i, DIM_BOX + i)] = DT as f32;
        }

        BoxKalmanFilter {
            motion_matrix,
            update_matrix: SMatrix::identity(),
            std_position_weight: position_weight,
            std_velocity_weight: velocity_weight,
        }
    }

    // the aspect slot carries constant noise, everything else scales
    // with the box height
    fn std_position(&self, k: f32, cnst: f32, p: f32) -> [f32; DIM_BOX] {
        let pos_weight = k * self.std_position_weight * p;
        [pos_weight, pos_weight, pos_weight, cnst, pos_weight]
    }

    fn std_velocity(&self, k: f32, cnst: f32, p: f32) -> [f32; DIM_BOX] {
        let vel_weight = k * self.std_velocity_weight * p;
        [vel_weight, vel_weight, vel_weight, cnst, vel_weight]
    }

    /// Initialize the filter with the first observation
    pub fn initiate(&self, bbox: &OrientedBox) -> KalmanState<DIM_BOX_X2> {
        let mean: SVector<f32, DIM_BOX_X2> = SVector::from_iterator([
            bbox.xc,
            bbox.yc,
            bbox.angle.unwrap_or(0.0),
            bbox.aspect,
            bbox.height,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
        ]);

        let mut std: SVector<f32, DIM_BOX_X2> = SVector::from_iterator(
            self.std_position(2.0, 1e-2, bbox.height)
                .into_iter()
                .chain(self.std_velocity(10.0, 1e-5, bbox.height)),
        );

        std = std.component_mul(&std);

        let covariance: SMatrix<f32, DIM_BOX_X2, DIM_BOX_X2> = SMatrix::from_diagonal(&std);
        KalmanState { mean, covariance }
    }

    /// Predicts the state from the last state
    pub fn predict(&self, state: &KalmanState<DIM_BOX_X2>) -> KalmanState<DIM_BOX_X2> {
        let (mean, covariance) = (state.mean, state.covariance);
        let std_pos = self.std_position(1.0, 1e-2, mean[4]);
        let std_vel = self.std_velocity(1.0, 1e-5, mean[4]);

        let mut std: SVector<f32, DIM_BOX_X2> =
            SVector::from_iterator(std_pos.into_iter().chain(std_vel));

        std = std.component_mul(&std);

        let motion_cov: SMatrix<f32, DIM_BOX_X2, DIM_BOX_X2> = SMatrix::from_diagonal(&std);

        let mean = self.motion_matrix * mean;
        let covariance =
            self.motion_matrix * covariance * self.motion_matrix.transpose() + motion_cov;
        KalmanState { mean, covariance }
    }

    fn project(
        &self,
        mean: SVector<f32, DIM_BOX_X2>,
        covariance: SMatrix<f32, DIM_BOX_X2, DIM_BOX_X2>,
        noise_scale: f32,
    ) -> KalmanState<DIM_BOX> {
        let mut std: SVector<f32, DIM_BOX> =
            SVector::from_iterator(self.std_position(1.0, 1e-1, mean[4]));
        std *= noise_scale;

        std = std.component_mul(&std);

        let innovation_cov: SMatrix<f32, DIM_BOX, DIM_BOX> = SMatrix::from_diagonal(&std);

        let mean = self.update_matrix * mean;
        let covariance =
            self.update_matrix * covariance * self.update_matrix.transpose() + innovation_cov;
        KalmanState { mean, covariance }
    }

    fn update_with_noise_scale(
        &self,
        state: &KalmanState<DIM_BOX_X2>,
        measurement: &OrientedBox,
        noise_scale: f32,
    ) -> Result<KalmanState<DIM_BOX_X2>> {
        let (mean, covariance) = (state.mean, state.covariance);
        let projected_state = self.project(mean, covariance, noise_scale);
        let (projected_mean, projected_cov) = (projected_state.mean, projected_state.covariance);
        let b = (covariance * self.update_matrix.transpose()).transpose();
        let kalman_gain = projected_cov
            .solve_lower_triangular(&b)
            .ok_or_else(|| Error::Degenerate("singular projected covariance in update".to_owned()))?;

        let innovation = SVector::from_iterator([
            measurement.xc,
            measurement.yc,
            measurement.angle.unwrap_or(0.0),
            measurement.aspect,
            measurement.height,
        ]) - projected_mean;

        let innovation: SMatrix<f32, 1, DIM_BOX> = innovation.transpose();

        let mean = mean + (innovation * kalman_gain).transpose();
        let covariance = covariance - kalman_gain.transpose() * projected_cov * kalman_gain;
        Ok(KalmanState { mean, covariance })
    }

    /// Updates the state with the current observation
    pub fn update(
        &self,
        state: &KalmanState<DIM_BOX_X2>,
        measurement: &OrientedBox,
    ) -> Result<KalmanState<DIM_BOX_X2>> {
        self.update_with_noise_scale(state, measurement, 1.0)
    }

    /// Updates the state with the measurement noise inflated by the
    /// inverse observation confidence, so low-confidence observations
    /// pull the state less. Confidence is clamped to `[0.1, 1.0]`.
    pub fn update_with_confidence(
        &self,
        state: &KalmanState<DIM_BOX_X2>,
        measurement: &OrientedBox,
        confidence: f32,
    ) -> Result<KalmanState<DIM_BOX_X2>> {
        let confidence = confidence.clamp(0.1, 1.0);
        self.update_with_noise_scale(state, measurement, 1.0 / confidence)
    }

    /// Squared Mahalanobis distance between the projected state and the
    /// measurement.
    pub fn distance(
        &self,
        state: &KalmanState<DIM_BOX_X2>,
        measurement: &OrientedBox,
    ) -> Result<f32> {
        let (mean, covariance) = (state.mean, state.covariance);
        let projected_state = self.project(mean, covariance, 1.0);
        let (mean, covariance) = (projected_state.mean, projected_state.covariance);

        let measurements = {
            let mut r: SVector<f32, DIM_BOX> = SVector::from_iterator([
                measurement.xc,
                measurement.yc,
                measurement.angle.unwrap_or(0.0),
                measurement.aspect,
                measurement.height,
            ]);
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

    /// Maps a squared Mahalanobis distance to an association cost.
    ///
    /// Direct form gates implausible matches to [`CHI2_UPPER_BOUND`];
    /// inverted form turns the distance into a similarity for
    /// maximization-style voting.
    pub fn calculate_cost(distance: f32, inverted: bool) -> f32 {
        if !inverted {
            if distance > CHI2INV95[4] {
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

impl From<KalmanState<DIM_BOX_X2>> for OrientedBox {
    fn from(s: KalmanState<DIM_BOX_X2>) -> Self {
        let angle = if s.mean[2] == 0.0 { None } else { Some(s.mean[2]) };
        OrientedBox::new(s.mean[0], s.mean[1], angle, s.mean[3], s.mean[4])
    }
}

impl TryFrom<KalmanState<DIM_BOX_X2>> for BoundingBox {
    type Error = Error;

    fn try_from(s: KalmanState<DIM_BOX_X2>) -> Result<Self> {
        BoundingBox::try_from(&OrientedBox::from(s))
    }
}
