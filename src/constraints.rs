//! Spatio-temporal gating: how far a candidate may sit from a track for
//! a given epoch difference and still be considered related.
//!
//! The distance is measured in `N x (R_cand + R_track)` units, where
//! `R_cand` and `R_track` are the circumscribed-circle radii of the
//! candidate box and the track's last box (see
//! [`OrientedBox::dist_in_2r`](crate::bbox::OrientedBox::dist_in_2r)).

/// Sorted `(epoch_delta, max_allowed_distance)` tiers.
#[derive(Default, Debug, Clone)]
pub struct SpatioTemporalConstraints {
    constraints: Vec<(usize, f32)>,
}

impl SpatioTemporalConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`add_constraints`](Self::add_constraints).
    pub fn constraints(mut self, constraints: &[(usize, f32)]) -> Self {
        self.add_constraints(constraints.to_vec());
        self
    }

    /// Adds tiers. Tiers are kept sorted by epoch delta; when the same
    /// delta is added twice the earlier definition wins.
    pub fn add_constraints(&mut self, constraints: Vec<(usize, f32)>) {
        for (delta, max_distance) in constraints {
            assert!(
                max_distance > 0.0,
                "The distance is expected to be a positive float"
            );
            self.constraints.push((delta, max_distance));
        }
        self.constraints.sort_by(|(e1, _), (e2, _)| e1.cmp(e2));
        self.constraints.dedup_by(|(e1, _), (e2, _)| *e1 == *e2);
    }

    /// `true` when the distance is allowed for the epoch delta: the
    /// first tier with `tier_delta >= epoch_delta` bounds the distance;
    /// with no such tier the distance is unconstrained.
    pub fn validate(&self, epoch_delta: usize, dist: f32) -> bool {
        assert!(
            dist >= 0.0,
            "The distance is expected to be a positive float"
        );
        let constraint = self.constraints.iter().find(|(d, _)| *d >= epoch_delta);

        match constraint {
            None => true,
            Some((_, max_dist)) => dist <= *max_dist,
        }
    }
}
