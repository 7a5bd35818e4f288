//! Track records kept by the store and the snapshot types returned to
//! callers.

use crate::bbox::OrientedBox;
use crate::features::Feature;
use crate::kalman::{BoxKalmanFilter, KalmanState, DIM_BOX_X2};
use crate::Result;
use std::collections::VecDeque;

/// How the track was last associated with an observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VotingType {
    /// Won by feature majority voting.
    Visual,
    /// Won by the positional metric.
    #[default]
    Positional,
}

/// A stored visual feature with the quality it was observed at.
#[derive(Clone, Debug)]
pub struct TrackFeature {
    pub feature: Feature,
    pub quality: f32,
}

/// Internal track record.
#[derive(Clone, Debug)]
pub(crate) struct TrackState {
    pub id: u64,
    pub scene_id: u64,
    pub state: KalmanState<DIM_BOX_X2>,
    pub predicted_boxes: VecDeque<OrientedBox>,
    pub observed_boxes: VecDeque<OrientedBox>,
    pub features: Vec<TrackFeature>,
    pub features_collected: usize,
    pub last_updated_epoch: usize,
    pub track_length: usize,
    pub custom_id: Option<i64>,
    pub voting: VotingType,
}

impl TrackState {
    /// Starts a track from its first observation: initiate the filter,
    /// then run one prediction so the stored box is the next-epoch
    /// expectation (with zero initial velocity it coincides with the
    /// observation).
    pub fn new(
        id: u64,
        scene_id: u64,
        epoch: usize,
        filter: &BoxKalmanFilter,
        bbox: &OrientedBox,
        history_length: usize,
        custom_id: Option<i64>,
    ) -> Self {
        let state = filter.initiate(bbox);
        let state = filter.predict(&state);
        let mut predicted: OrientedBox = state.into();
        predicted.confidence = bbox.confidence;
        predicted.gen_vertices();

        let mut track = Self {
            id,
            scene_id,
            state,
            predicted_boxes: VecDeque::with_capacity(history_length),
            observed_boxes: VecDeque::with_capacity(history_length),
            features: Vec::new(),
            features_collected: 0,
            last_updated_epoch: epoch,
            track_length: 1,
            custom_id,
            voting: VotingType::Positional,
        };
        track.push_history(bbox.clone(), predicted, history_length);
        track
    }

    /// Folds a new observation into the track: correct with the
    /// measurement, predict the next state and append to the history.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        filter: &BoxKalmanFilter,
        bbox: &OrientedBox,
        epoch: usize,
        history_length: usize,
        confidence_scaling: bool,
        voting: VotingType,
        custom_id: Option<i64>,
    ) -> Result<()> {
        let state = if confidence_scaling {
            filter.update_with_confidence(&self.state, bbox, bbox.confidence)?
        } else {
            filter.update(&self.state, bbox)?
        };
        self.state = filter.predict(&state);

        let mut predicted: OrientedBox = self.state.into();
        predicted.confidence = bbox.confidence;
        predicted.gen_vertices();

        self.push_history(bbox.clone(), predicted, history_length);
        self.last_updated_epoch = epoch;
        self.track_length += 1;
        self.voting = voting;
        self.custom_id = custom_id;
        Ok(())
    }

    fn push_history(
        &mut self,
        observed: OrientedBox,
        predicted: OrientedBox,
        history_length: usize,
    ) {
        self.observed_boxes.push_back(observed);
        self.predicted_boxes.push_back(predicted);
        if self.observed_boxes.len() > history_length {
            self.observed_boxes.pop_front();
            self.predicted_boxes.pop_front();
        }
    }

    /// The box distances are measured against.
    pub fn predicted_bbox(&self) -> &OrientedBox {
        self.predicted_boxes
            .back()
            .expect("a track always holds at least one box")
    }

    /// Stores a collected feature, keeping the best-quality features
    /// first and bounding the stored count.
    pub fn add_feature(&mut self, feature: Feature, quality: f32, max_observations: usize) {
        self.features.push(TrackFeature { feature, quality });
        self.features
            .sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap());
        self.features.truncate(max_observations);
        self.features_collected += 1;
    }

    pub fn snapshot(&self, epoch: usize) -> Track {
        Track {
            id: self.id,
            scene_id: self.scene_id,
            epoch,
            observed_bbox: self
                .observed_boxes
                .back()
                .expect("a track always holds at least one box")
                .clone(),
            predicted_bbox: self.predicted_bbox().clone(),
            length: self.track_length,
            voting: self.voting,
            custom_id: self.custom_id,
        }
    }

    pub fn into_wasted(self) -> WastedTrack {
        WastedTrack {
            id: self.id,
            scene_id: self.scene_id,
            epoch: self.last_updated_epoch,
            length: self.track_length,
            observed_boxes: self.observed_boxes.into(),
            predicted_boxes: self.predicted_boxes.into(),
            custom_id: self.custom_id,
        }
    }
}

/// A live track snapshot returned by prediction calls.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: u64,
    pub scene_id: u64,
    pub epoch: usize,
    pub observed_bbox: OrientedBox,
    pub predicted_bbox: OrientedBox,
    pub length: usize,
    pub voting: VotingType,
    pub custom_id: Option<i64>,
}

/// A terminated track drained from the waste bin, with its retained box
/// histories.
#[derive(Clone, Debug)]
pub struct WastedTrack {
    pub id: u64,
    pub scene_id: u64,
    /// The last epoch the track was updated in.
    pub epoch: usize,
    pub length: usize,
    pub observed_boxes: Vec<OrientedBox>,
    pub predicted_boxes: Vec<OrientedBox>,
    pub custom_id: Option<i64>,
}
