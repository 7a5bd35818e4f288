//! Distance computation between candidate observations and stored
//! tracks: the positional metrics (IoU, Mahalanobis) and the visual
//! feature metric with its participation gates.

use crate::bbox::OrientedBox;
use crate::constraints::SpatioTemporalConstraints;
use crate::features::{Feature, VisualMetricType};
use crate::kalman::BoxKalmanFilter;
use crate::track::TrackState;
use crate::{Error, Result};
use log::debug;

/// Default IoU threshold for positional association.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// Minimal confidence used when an observation carries a lower one.
pub const DEFAULT_MINIMAL_CONFIDENCE: f32 = 0.05;

/// Similarity assigned to the "start a new track" option in Mahalanobis
/// voting.
pub const MAHALANOBIS_NEW_TRACK_THRESHOLD: f32 = 1.0;

/// The positional metric kind.
#[derive(Clone, Copy, Debug)]
pub enum PositionalMetricType {
    /// Mahalanobis distance against the Kalman-projected state.
    Mahalanobis,
    /// Intersection over union with the acceptance threshold.
    IoU(f32),
}

impl PositionalMetricType {
    pub fn validate(&self) -> Result<()> {
        match self {
            PositionalMetricType::IoU(t) if !(*t > 0.0 && *t < 1.0) => Err(Error::InvalidConfig(
                format!("IoU threshold must lay within (0.0:1.0), got {}", t),
            )),
            _ => Ok(()),
        }
    }
}

/// One distance record between a candidate observation and a track.
///
/// When the track stores several visual features, one record per stored
/// feature is produced with the positional part repeated.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceRecord {
    pub candidate: usize,
    pub track_id: u64,
    pub positional: Option<f32>,
    pub feature: Option<f32>,
}

/// Gates controlling when visual features are collected into tracks and
/// when they participate in matching.
#[derive(Clone, Debug)]
pub struct VisualGates {
    pub metric: VisualMetricType,
    /// Minimal number of collected features before a track may win
    /// visually.
    pub minimal_track_length: usize,
    /// Minimal feature quality to collect the feature into the track.
    pub minimal_quality_collect: f32,
    /// Minimal feature quality to use the feature for matching.
    pub minimal_quality_use: f32,
    /// Minimal candidate box area to use the feature for matching.
    pub minimal_area: f32,
    /// Upper bound on the stored features per track.
    pub max_observations: usize,
}

impl Default for VisualGates {
    fn default() -> Self {
        Self {
            metric: VisualMetricType::default(),
            minimal_track_length: 3,
            minimal_quality_collect: 0.0,
            minimal_quality_use: 0.0,
            minimal_area: 0.0,
            max_observations: 5,
        }
    }
}

impl VisualGates {
    /// Whether the candidate's feature may be collected into a track.
    pub fn may_collect(&self, quality: f32) -> bool {
        quality >= self.minimal_quality_collect
    }

    /// Whether the candidate's feature may participate in matching.
    pub fn may_use(&self, quality: f32, bbox: &OrientedBox) -> bool {
        quality >= self.minimal_quality_use && bbox.area() >= self.minimal_area
    }
}

/// A candidate observation prepared for distance computation.
#[derive(Clone, Debug)]
pub struct CandidateState {
    pub index: usize,
    pub bbox: OrientedBox,
    pub feature: Option<(Feature, f32)>,
}

/// Everything needed to score candidates against tracks.
pub(crate) struct MetricEvaluator<'a> {
    pub filter: &'a BoxKalmanFilter,
    pub positional: PositionalMetricType,
    pub min_confidence: f32,
    pub constraints: &'a SpatioTemporalConstraints,
    pub max_idle_epochs: usize,
    pub visual: Option<&'a VisualGates>,
}

impl MetricEvaluator<'_> {
    /// Whether the track may be associated at all in the current epoch.
    fn compatible(&self, track: &TrackState, candidate: &CandidateState, epoch: usize) -> bool {
        let epoch_delta = epoch.saturating_sub(track.last_updated_epoch);
        if epoch_delta > self.max_idle_epochs {
            return false;
        }
        let dist = OrientedBox::dist_in_2r(track.predicted_bbox(), &candidate.bbox);
        self.constraints.validate(epoch_delta, dist)
    }

    fn positional_metric(&self, track: &TrackState, candidate: &CandidateState) -> Option<f32> {
        let track_bbox = track.predicted_bbox();
        if OrientedBox::too_far(track_bbox, &candidate.bbox) {
            return None;
        }

        let confidence = candidate.bbox.confidence.max(self.min_confidence);

        match self.positional {
            PositionalMetricType::Mahalanobis => {
                let dist = match self.filter.distance(&track.state, &candidate.bbox) {
                    Ok(d) => d,
                    Err(e) => {
                        // a degenerate covariance disables this pair only
                        debug!(
                            "Degenerate distance for track {} and candidate {}: {}",
                            track.id, candidate.index, e
                        );
                        return None;
                    }
                };
                Some(BoxKalmanFilter::calculate_cost(dist, true) / confidence)
            }
            PositionalMetricType::IoU(threshold) => {
                OrientedBox::iou(track_bbox, &candidate.bbox)
                    .map(|iou| iou * confidence)
                    .filter(|m| *m >= threshold)
            }
        }
    }

    /// All distance records between one track and one candidate.
    pub fn evaluate(
        &self,
        track: &TrackState,
        candidate: &CandidateState,
        epoch: usize,
    ) -> Vec<DistanceRecord> {
        if !self.compatible(track, candidate, epoch) {
            return Vec::new();
        }

        let positional = self.positional_metric(track, candidate);

        let visual_usable = match (self.visual, &candidate.feature) {
            (Some(gates), Some((_, quality))) => {
                gates.may_use(*quality, &candidate.bbox)
                    && track.features_collected >= gates.minimal_track_length
            }
            _ => false,
        };

        if !visual_usable {
            return match positional {
                Some(_) => vec![DistanceRecord {
                    candidate: candidate.index,
                    track_id: track.id,
                    positional,
                    feature: None,
                }],
                None => Vec::new(),
            };
        }

        let gates = self.visual.expect("checked above");
        let (feature, _) = candidate.feature.as_ref().expect("checked above");

        // one record per stored feature, the positional part repeated
        let mut records: Vec<DistanceRecord> = track
            .features
            .iter()
            .map(|stored| {
                let metric = gates.metric.distance(&stored.feature, feature);
                let dist = gates
                    .metric
                    .is_ok(metric)
                    .then(|| gates.metric.distance_to_weight(metric));
                DistanceRecord {
                    candidate: candidate.index,
                    track_id: track.id,
                    positional,
                    feature: dist,
                }
            })
            .collect();
        records.retain(|r| r.positional.is_some() || r.feature.is_some());
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use crate::kalman::CHI2_UPPER_BOUND;
    use crate::track::TrackState;

    fn evaluator<'a>(
        filter: &'a BoxKalmanFilter,
        positional: PositionalMetricType,
        constraints: &'a SpatioTemporalConstraints,
        visual: Option<&'a VisualGates>,
    ) -> MetricEvaluator<'a> {
        MetricEvaluator {
            filter,
            positional,
            min_confidence: DEFAULT_MINIMAL_CONFIDENCE,
            constraints,
            max_idle_epochs: 5,
            visual,
        }
    }

    fn track(filter: &BoxKalmanFilter, bbox: OrientedBox, epoch: usize) -> TrackState {
        TrackState::new(77, 0, epoch, filter, &bbox, 10, None)
    }

    fn candidate(index: usize, bbox: OrientedBox) -> CandidateState {
        CandidateState {
            index,
            bbox,
            feature: None,
        }
    }

    #[test]
    fn test_iou_metric_filters_by_threshold() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let e = evaluator(
            &filter,
            PositionalMetricType::IoU(DEFAULT_IOU_THRESHOLD),
            &constraints,
            None,
        );

        let t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);

        let near = candidate(0, BoundingBox::new(1.0, 1.0, 10.0, 10.0).into());
        let records = e.evaluate(&t, &near, 2);
        assert_eq!(records.len(), 1);
        assert!(records[0].positional.unwrap() > DEFAULT_IOU_THRESHOLD);

        let weak = candidate(1, BoundingBox::new(8.0, 8.0, 10.0, 10.0).into());
        assert!(
            e.evaluate(&t, &weak, 2).is_empty(),
            "IoU below threshold yields no record"
        );
    }

    #[test]
    fn test_mahalanobis_metric_scales_with_confidence() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let e = evaluator(&filter, PositionalMetricType::Mahalanobis, &constraints, None);

        let t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);
        let c = candidate(
            0,
            OrientedBox::ltwh_with_confidence(0.2, 0.2, 10.0, 10.0, 0.5),
        );
        let records = e.evaluate(&t, &c, 2);
        assert_eq!(records.len(), 1);
        let value = records[0].positional.unwrap();
        assert!(
            value > CHI2_UPPER_BOUND,
            "inverted cost divided by confidence 0.5 must exceed the bound, got {}",
            value
        );
    }

    #[test]
    fn test_too_far_yields_nothing() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let e = evaluator(&filter, PositionalMetricType::Mahalanobis, &constraints, None);

        let t = track(&filter, BoundingBox::new(0.0, 0.0, 5.0, 5.0).into(), 1);
        let c = candidate(0, BoundingBox::new(500.0, 500.0, 5.0, 5.0).into());
        assert!(e.evaluate(&t, &c, 2).is_empty());
    }

    #[test]
    fn test_idle_track_beyond_max_idle_is_incompatible() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let e = evaluator(
            &filter,
            PositionalMetricType::IoU(DEFAULT_IOU_THRESHOLD),
            &constraints,
            None,
        );

        let t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);
        let c = candidate(0, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into());
        assert_eq!(e.evaluate(&t, &c, 6).len(), 1, "delta 5 still compatible");
        assert!(e.evaluate(&t, &c, 7).is_empty(), "delta 6 exceeds max idle");
    }

    #[test]
    fn test_constraints_gate_distant_candidates() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default().constraints(&[(1, 0.1)]);
        let e = evaluator(
            &filter,
            PositionalMetricType::IoU(DEFAULT_IOU_THRESHOLD),
            &constraints,
            None,
        );

        let t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);
        // overlapping enough for IoU but farther than 0.1 x 2R
        let c = candidate(0, BoundingBox::new(3.0, 3.0, 10.0, 10.0).into());
        assert!(e.evaluate(&t, &c, 2).is_empty());
    }

    #[test]
    fn test_visual_track_too_short_gives_positional_only() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let gates = VisualGates {
            metric: VisualMetricType::euclidean(10.0).unwrap(),
            minimal_track_length: 2,
            ..VisualGates::default()
        };
        let e = evaluator(
            &filter,
            PositionalMetricType::IoU(DEFAULT_IOU_THRESHOLD),
            &constraints,
            Some(&gates),
        );

        let mut t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);
        t.add_feature(vec![1.0, 0.0], 1.0, 5);

        let c = CandidateState {
            index: 0,
            bbox: BoundingBox::new(1.0, 1.0, 10.0, 10.0).into(),
            feature: Some((vec![1.0, 0.0], 1.0)),
        };

        let records = e.evaluate(&t, &c, 2);
        assert_eq!(records.len(), 1);
        assert!(records[0].feature.is_none(), "short track must not vote visually");

        t.add_feature(vec![1.0, 0.1], 1.0, 5);
        let records = e.evaluate(&t, &c, 2);
        assert_eq!(records.len(), 2, "one record per stored feature");
        assert!(records.iter().all(|r| r.feature.is_some()));
    }

    #[test]
    fn test_visual_quality_gate_blocks_use() {
        let filter = BoxKalmanFilter::default();
        let constraints = SpatioTemporalConstraints::default();
        let gates = VisualGates {
            metric: VisualMetricType::euclidean(10.0).unwrap(),
            minimal_track_length: 1,
            minimal_quality_use: 0.5,
            ..VisualGates::default()
        };
        let e = evaluator(
            &filter,
            PositionalMetricType::IoU(DEFAULT_IOU_THRESHOLD),
            &constraints,
            Some(&gates),
        );

        let mut t = track(&filter, BoundingBox::new(0.0, 0.0, 10.0, 10.0).into(), 1);
        t.add_feature(vec![1.0, 0.0], 1.0, 5);

        let c = CandidateState {
            index: 0,
            bbox: BoundingBox::new(1.0, 1.0, 10.0, 10.0).into(),
            feature: Some((vec![1.0, 0.0], 0.2)),
        };
        let records = e.evaluate(&t, &c, 2);
        assert_eq!(records.len(), 1);
        assert!(records[0].feature.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(PositionalMetricType::IoU(0.3).validate().is_ok());
        assert!(PositionalMetricType::IoU(0.0).validate().is_err());
        assert!(PositionalMetricType::IoU(1.0).validate().is_err());
        assert!(PositionalMetricType::Mahalanobis.validate().is_ok());
    }
}
