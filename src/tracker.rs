//! The tracking engine: configuration, per-epoch prediction, the track
//! lifecycle operations and the sharded batch entry point.

use crate::batch::BatchRequest;
use crate::bbox::OrientedBox;
use crate::constraints::SpatioTemporalConstraints;
use crate::features::{Feature, VisualMetricType};
use crate::kalman::BoxKalmanFilter;
use crate::metric::{
    CandidateState, MetricEvaluator, PositionalMetricType, VisualGates,
    DEFAULT_MINIMAL_CONFIDENCE, MAHALANOBIS_NEW_TRACK_THRESHOLD,
};
use crate::store::{TrackStore, DEFAULT_AUTO_WASTE_PERIODICITY};
use crate::track::{Track, TrackState, VotingType, WastedTrack};
use crate::voting::{greedy_winners, optimal_winners, visual_winners, PositionalVoter, Winner};
use crate::{Error, Result};
use log::warn;
use rayon::prelude::*;
use std::collections::HashMap;

/// One observation handed to a prediction call.
#[derive(Clone, Debug)]
pub struct Observation {
    pub bbox: OrientedBox,
    pub feature: Option<Feature>,
    /// Quality of the feature; the box confidence is used when unset.
    pub feature_quality: Option<f32>,
    pub custom_id: Option<i64>,
}

impl Observation {
    pub fn new(bbox: OrientedBox) -> Self {
        Self {
            bbox,
            feature: None,
            feature_quality: None,
            custom_id: None,
        }
    }

    pub fn with_feature(mut self, feature: Feature, quality: Option<f32>) -> Self {
        self.feature = Some(feature);
        self.feature_quality = quality;
        self
    }

    pub fn with_custom_id(mut self, custom_id: i64) -> Self {
        self.custom_id = Some(custom_id);
        self
    }
}

/// Configuration of the visual re-identification layer.
#[derive(Clone, Debug)]
pub struct VisualOptions {
    /// Metric and acceptance threshold for feature comparisons.
    pub metric: VisualMetricType,
    /// Minimal number of feature votes a (candidate, track) pair needs
    /// to win visually.
    pub min_votes: usize,
    /// Upper bound on the features stored per track.
    pub max_observations: usize,
    /// Minimal number of collected features before a track may win
    /// visually.
    pub minimal_track_length: usize,
    /// Minimal feature quality to use a feature for matching.
    pub minimal_quality_use: f32,
    /// Minimal feature quality to collect a feature into a track.
    pub minimal_quality_collect: f32,
    /// Minimal candidate box area to use its feature for matching.
    pub minimal_area: f32,
}

impl Default for VisualOptions {
    fn default() -> Self {
        Self {
            metric: VisualMetricType::default(),
            min_votes: 1,
            max_observations: 5,
            minimal_track_length: 3,
            minimal_quality_use: 0.0,
            minimal_quality_collect: 0.0,
            minimal_area: 0.0,
        }
    }
}

/// Tracker configuration. Validated by [`Tracker::new`].
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub positional_metric: PositionalMetricType,
    /// How many epochs a track may stay unmatched before it is wasted.
    pub max_idle_epochs: usize,
    /// Retained observed/predicted boxes per track.
    pub history_length: usize,
    /// Floor applied to observation confidences in the metrics.
    pub min_confidence: f32,
    pub kalman_position_weight: f32,
    pub kalman_velocity_weight: f32,
    pub constraints: SpatioTemporalConstraints,
    pub visual: Option<VisualOptions>,
    /// Intra-scene parallelism of the distance phase.
    pub distance_shards: usize,
    /// Scene-level parallelism of batched prediction.
    pub voting_shards: usize,
    /// Prediction calls between automatic waste sweeps.
    pub auto_waste_periodicity: usize,
    /// Scale the Kalman measurement noise by the inverse observation
    /// confidence.
    pub confidence_scaled_noise: bool,
}

impl TrackerConfig {
    pub fn new(positional_metric: PositionalMetricType) -> Self {
        Self {
            positional_metric,
            max_idle_epochs: 2,
            history_length: 10,
            min_confidence: DEFAULT_MINIMAL_CONFIDENCE,
            kalman_position_weight: 1.0 / 20.0,
            kalman_velocity_weight: 1.0 / 160.0,
            constraints: SpatioTemporalConstraints::default(),
            visual: None,
            distance_shards: 1,
            voting_shards: 1,
            auto_waste_periodicity: DEFAULT_AUTO_WASTE_PERIODICITY,
            confidence_scaled_noise: false,
        }
    }

    pub fn with_max_idle_epochs(mut self, n: usize) -> Self {
        self.max_idle_epochs = n;
        self
    }

    pub fn with_history_length(mut self, n: usize) -> Self {
        self.history_length = n;
        self
    }

    pub fn with_min_confidence(mut self, c: f32) -> Self {
        self.min_confidence = c;
        self
    }

    pub fn with_kalman_weights(mut self, position: f32, velocity: f32) -> Self {
        self.kalman_position_weight = position;
        self.kalman_velocity_weight = velocity;
        self
    }

    pub fn with_constraints(mut self, constraints: SpatioTemporalConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_visual(mut self, visual: VisualOptions) -> Self {
        self.visual = Some(visual);
        self
    }

    pub fn with_shards(mut self, distance: usize, voting: usize) -> Self {
        self.distance_shards = distance;
        self.voting_shards = voting;
        self
    }

    pub fn with_auto_waste_periodicity(mut self, n: usize) -> Self {
        self.auto_waste_periodicity = n;
        self
    }

    pub fn with_confidence_scaled_noise(mut self, enabled: bool) -> Self {
        self.confidence_scaled_noise = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        self.positional_metric.validate()?;
        if self.history_length == 0 {
            return Err(Error::InvalidConfig(
                "history length must be at least 1".to_owned(),
            ));
        }
        if self.distance_shards == 0 || self.voting_shards == 0 {
            return Err(Error::InvalidConfig(
                "shard counts must be at least 1".to_owned(),
            ));
        }
        if self.auto_waste_periodicity == 0 {
            return Err(Error::InvalidConfig(
                "auto waste periodicity must be at least 1".to_owned(),
            ));
        }
        if !(self.min_confidence > 0.0 && self.min_confidence <= 1.0) {
            return Err(Error::InvalidConfig(
                "min confidence must lay within (0.0:1.0]".to_owned(),
            ));
        }
        if self.kalman_position_weight <= 0.0 || self.kalman_velocity_weight <= 0.0 {
            return Err(Error::InvalidConfig(
                "kalman noise weights must be positive".to_owned(),
            ));
        }
        if let Some(v) = &self.visual {
            if v.min_votes == 0 {
                return Err(Error::InvalidConfig(
                    "visual min votes must be at least 1".to_owned(),
                ));
            }
            if v.max_observations == 0 {
                return Err(Error::InvalidConfig(
                    "visual max observations must be at least 1".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

/// The tracking engine.
pub struct Tracker {
    config: TrackerConfig,
    filter: BoxKalmanFilter,
    visual_gates: Option<VisualGates>,
    store: TrackStore,
    next_track_id: u64,
    auto_waste_counter: usize,
    pool: rayon::ThreadPool,
}

impl Tracker {
    /// Creates a tracker, rejecting invalid configuration.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let visual_gates = config.visual.as_ref().map(|v| VisualGates {
            metric: v.metric,
            minimal_track_length: v.minimal_track_length,
            minimal_quality_collect: v.minimal_quality_collect,
            minimal_quality_use: v.minimal_quality_use,
            minimal_area: v.minimal_area,
            max_observations: v.max_observations,
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.distance_shards * config.voting_shards)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build shard pool: {}", e)))?;

        Ok(Self {
            filter: BoxKalmanFilter::new(
                config.kalman_position_weight,
                config.kalman_velocity_weight,
            ),
            visual_gates,
            store: TrackStore::new(config.max_idle_epochs),
            next_track_id: 0,
            auto_waste_counter: 0,
            pool,
            config,
        })
    }

    /// Processes observations in the default scene (0).
    pub fn predict(&mut self, observations: &[Observation]) -> Vec<Track> {
        self.predict_with_scene(0, observations)
    }

    /// Processes observations for one scene: advances the scene clock,
    /// associates observations with live tracks and returns one snapshot
    /// per accepted observation.
    pub fn predict_with_scene(&mut self, scene_id: u64, observations: &[Observation]) -> Vec<Track> {
        self.auto_waste_tick(1);
        let epoch = self.store.next_epoch(scene_id);
        let (candidates, custom_ids) = self.prepare(observations);
        let winners = self
            .pool
            .install(|| self.compute_scene(scene_id, epoch, &candidates));
        self.commit_scene(scene_id, epoch, candidates, &custom_ids, winners)
    }

    /// Processes a multi-scene batch. Scenes run through the distance
    /// and voting phases in the shard pool; track ids are assigned and
    /// results delivered in ascending scene-id order, so the output is
    /// identical for any shard configuration.
    pub fn predict_batch(&mut self, request: BatchRequest) {
        let mut scenes: Vec<(u64, Vec<Observation>)> = request.batch.into_iter().collect();
        scenes.sort_by_key(|(scene_id, _)| *scene_id);

        self.auto_waste_tick(scenes.len());

        // tick every scene clock first so the parallel phase sees the
        // epochs the commit phase will use
        let prepared: Vec<(u64, usize, Vec<CandidateState>, Vec<Option<i64>>)> = scenes
            .into_iter()
            .map(|(scene_id, observations)| {
                let epoch = self.store.next_epoch(scene_id);
                let (candidates, custom_ids) = self.prepare(&observations);
                (scene_id, epoch, candidates, custom_ids)
            })
            .collect();

        let computed: Vec<HashMap<usize, (Winner, VotingType)>> = self.pool.install(|| {
            prepared
                .par_iter()
                .map(|(scene_id, epoch, candidates, _)| {
                    self.compute_scene(*scene_id, *epoch, candidates)
                })
                .collect()
        });

        for ((scene_id, epoch, candidates, custom_ids), winners) in
            prepared.into_iter().zip(computed)
        {
            let tracks = self.commit_scene(scene_id, epoch, candidates, &custom_ids, winners);
            if request.sender.send((scene_id, tracks)).is_err() {
                warn!("batch result receiver dropped, discarding scene {}", scene_id);
            }
        }
    }

    /// Advances the default scene by `n` empty epochs.
    pub fn skip_epochs(&mut self, n: usize) {
        self.skip_epochs_for_scene(0, n)
    }

    /// Advances one scene by `n` empty epochs.
    pub fn skip_epochs_for_scene(&mut self, scene_id: u64, n: usize) {
        self.store.skip_epochs(scene_id, n);
        self.store.sweep();
    }

    /// Tracks of the default scene not updated in the current epoch.
    pub fn idle_tracks(&self) -> Vec<Track> {
        self.idle_tracks_with_scene(0)
    }

    /// Tracks of the scene not updated in the current epoch.
    pub fn idle_tracks_with_scene(&self, scene_id: u64) -> Vec<Track> {
        let epoch = self.store.current_epoch(scene_id);
        self.store
            .idle_tracks(scene_id)
            .into_iter()
            .map(|t| t.snapshot(epoch))
            .collect()
    }

    /// Sweeps and drains the waste bin; every terminated track is
    /// returned exactly once.
    pub fn wasted(&mut self) -> Vec<WastedTrack> {
        self.store.sweep();
        self.store.drain_wasted()
    }

    /// Sweeps and discards the waste bin.
    pub fn clear_wasted(&mut self) {
        self.store.sweep();
        self.store.clear_wasted();
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch_with_scene(0)
    }

    pub fn current_epoch_with_scene(&self, scene_id: u64) -> usize {
        self.store.current_epoch(scene_id)
    }

    /// The configured (distance, voting) shard counts.
    pub fn shards(&self) -> (usize, usize) {
        (self.config.distance_shards, self.config.voting_shards)
    }

    fn auto_waste_tick(&mut self, calls: usize) {
        self.auto_waste_counter += calls;
        if self.auto_waste_counter >= self.config.auto_waste_periodicity {
            self.store.sweep();
            self.auto_waste_counter = 0;
        }
    }

    /// Validates observations, rejecting malformed ones with a warning.
    /// Rejecting an observation never fails the rest of the call.
    fn prepare(&self, observations: &[Observation]) -> (Vec<CandidateState>, Vec<Option<i64>>) {
        let mut candidates = Vec::with_capacity(observations.len());
        let mut custom_ids = Vec::with_capacity(observations.len());

        for (i, o) in observations.iter().enumerate() {
            if let Err(e) = validate_observation(o) {
                warn!("skipping observation {}: {}", i, e);
                continue;
            }
            let mut bbox = o.bbox.clone();
            bbox.gen_vertices();
            let quality = o.feature_quality.unwrap_or(bbox.confidence);
            candidates.push(CandidateState {
                index: candidates.len(),
                bbox,
                feature: o.feature.clone().map(|f| (f, quality)),
            });
            custom_ids.push(o.custom_id);
        }
        (candidates, custom_ids)
    }

    /// The parallel phase: distance records and winner selection for
    /// one scene. Reads the store, never mutates it.
    fn compute_scene(
        &self,
        scene_id: u64,
        epoch: usize,
        candidates: &[CandidateState],
    ) -> HashMap<usize, (Winner, VotingType)> {
        if candidates.is_empty() {
            return HashMap::new();
        }

        let tracks = self.store.scene_tracks(scene_id);
        let evaluator = MetricEvaluator {
            filter: &self.filter,
            positional: self.config.positional_metric,
            min_confidence: self.config.min_confidence,
            constraints: &self.config.constraints,
            max_idle_epochs: self.config.max_idle_epochs,
            visual: self.visual_gates.as_ref(),
        };

        let chunk = candidates.len().div_ceil(self.config.distance_shards);
        let records: Vec<_> = candidates
            .par_chunks(chunk)
            .flat_map_iter(|chunk_candidates| {
                let mut out = Vec::new();
                for c in chunk_candidates {
                    for t in &tracks {
                        out.extend(evaluator.evaluate(t, c, epoch));
                    }
                }
                out
            })
            .collect();

        match (&self.config.visual, self.config.positional_metric) {
            (Some(v), positional) => {
                let voter = match positional {
                    PositionalMetricType::IoU(_) => PositionalVoter::Greedy,
                    PositionalMetricType::Mahalanobis => PositionalVoter::Optimal {
                        new_track_threshold: MAHALANOBIS_NEW_TRACK_THRESHOLD,
                    },
                };
                visual_winners(
                    &records,
                    v.metric.max_accepted_weight(),
                    v.min_votes,
                    voter,
                    candidates.len(),
                )
            }
            (None, PositionalMetricType::Mahalanobis) => {
                optimal_winners(&records, MAHALANOBIS_NEW_TRACK_THRESHOLD, candidates.len())
                    .into_iter()
                    .map(|(c, w)| (c, (w, VotingType::Positional)))
                    .collect()
            }
            (None, PositionalMetricType::IoU(_)) => greedy_winners(&records)
                .into_iter()
                .map(|(c, w)| (c, (w, VotingType::Positional)))
                .collect(),
        }
    }

    /// The sequential phase: merges winners, creates new tracks,
    /// collects features and emits snapshots. The only place track ids
    /// are assigned.
    fn commit_scene(
        &mut self,
        scene_id: u64,
        epoch: usize,
        candidates: Vec<CandidateState>,
        custom_ids: &[Option<i64>],
        winners: HashMap<usize, (Winner, VotingType)>,
    ) -> Vec<Track> {
        let mut out = Vec::with_capacity(candidates.len());

        for (i, candidate) in candidates.into_iter().enumerate() {
            let (winner, voting) = match winners.get(&i).copied() {
                Some((Winner::Track(id), voting)) => (Some(id), voting),
                Some((Winner::NewTrack, voting)) => (None, voting),
                None => (None, VotingType::Positional),
            };

            let track_id = match winner {
                Some(id) => {
                    let track = self
                        .store
                        .get_mut(id)
                        .expect("voting only returns live tracks");
                    if let Err(e) = track.register(
                        &self.filter,
                        &candidate.bbox,
                        epoch,
                        self.config.history_length,
                        self.config.confidence_scaled_noise,
                        voting,
                        custom_ids[i],
                    ) {
                        warn!("track {} rejected an update: {}", id, e);
                    }
                    id
                }
                None => {
                    self.next_track_id += 1;
                    let id = self.next_track_id;
                    let mut track = TrackState::new(
                        id,
                        scene_id,
                        epoch,
                        &self.filter,
                        &candidate.bbox,
                        self.config.history_length,
                        custom_ids[i],
                    );
                    track.voting = voting;
                    self.store.add(track);
                    id
                }
            };

            if let (Some(gates), Some((feature, quality))) =
                (&self.visual_gates, candidate.feature)
            {
                if gates.may_collect(quality) {
                    let max_observations = gates.max_observations;
                    if let Some(track) = self.store.get_mut(track_id) {
                        track.add_feature(feature, quality, max_observations);
                    }
                }
            }

            let snapshot = self
                .store
                .get_mut(track_id)
                .expect("the track was just touched")
                .snapshot(epoch);
            out.push(snapshot);
        }
        out
    }
}

fn validate_observation(o: &Observation) -> Result<()> {
    let b = &o.bbox;
    let finite = b.xc.is_finite()
        && b.yc.is_finite()
        && b.aspect.is_finite()
        && b.height.is_finite()
        && b.confidence.is_finite()
        && b.angle.map_or(true, f32::is_finite);
    if !finite {
        return Err(Error::InvalidObservation(
            "box fields must be finite".to_owned(),
        ));
    }
    if b.height <= 0.0 || b.aspect <= 0.0 {
        return Err(Error::InvalidObservation(format!(
            "box must have positive height and aspect, got height={} aspect={}",
            b.height, b.aspect
        )));
    }
    if !(b.confidence > 0.0 && b.confidence <= 1.0) {
        return Err(Error::InvalidObservation(format!(
            "confidence must lay within (0.0:1.0], got {}",
            b.confidence
        )));
    }
    if let Some(f) = &o.feature {
        if f.is_empty() {
            return Err(Error::InvalidObservation(
                "feature vector must not be empty".to_owned(),
            ));
        }
        if f.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidObservation(
                "feature vector must be finite".to_owned(),
            ));
        }
    }
    if let Some(q) = o.feature_quality {
        if !q.is_finite() || !(0.0..=1.0).contains(&q) {
            return Err(Error::InvalidObservation(format!(
                "feature quality must lay within [0.0:1.0], got {}",
                q
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;

    fn iou_tracker(max_idle_epochs: usize) -> Tracker {
        Tracker::new(
            TrackerConfig::new(PositionalMetricType::IoU(0.3))
                .with_max_idle_epochs(max_idle_epochs),
        )
        .unwrap()
    }

    fn obs(left: f32, top: f32, width: f32, height: f32) -> Observation {
        Observation::new(BoundingBox::new(left, top, width, height).into())
    }

    #[test]
    fn test_config_validation() {
        assert!(Tracker::new(TrackerConfig::new(PositionalMetricType::IoU(0.0))).is_err());
        assert!(Tracker::new(
            TrackerConfig::new(PositionalMetricType::IoU(0.3)).with_shards(0, 1)
        )
        .is_err());
        assert!(Tracker::new(
            TrackerConfig::new(PositionalMetricType::IoU(0.3)).with_history_length(0)
        )
        .is_err());
        assert!(Tracker::new(
            TrackerConfig::new(PositionalMetricType::Mahalanobis).with_min_confidence(0.0)
        )
        .is_err());
        assert!(Tracker::new(TrackerConfig::new(PositionalMetricType::Mahalanobis)).is_ok());
    }

    #[test]
    fn test_single_object_keeps_id_over_epochs() {
        let mut tracker = iou_tracker(5);
        let mut seen_id = None;

        for epoch in 0..6 {
            let shift = epoch as f32 * 0.3;
            let tracks = tracker.predict(&[obs(10.0 + shift, 5.0 + shift, 7.0, 7.0)]);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].epoch, epoch + 1);
            match seen_id {
                None => seen_id = Some(tracks[0].id),
                Some(id) => assert_eq!(tracks[0].id, id, "id must be stable across epochs"),
            }
            assert_eq!(tracks[0].length, epoch + 1);
        }
        assert_eq!(tracker.current_epoch(), 6);
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let mut tracker = iou_tracker(5);
        let tracks = tracker.predict(&[obs(0.0, 0.0, 5.0, 5.0), obs(100.0, 100.0, 5.0, 5.0)]);
        assert_eq!(tracks.len(), 2);
        assert_ne!(tracks[0].id, tracks[1].id);

        let tracks2 = tracker.predict(&[obs(0.2, 0.2, 5.0, 5.0), obs(100.2, 100.2, 5.0, 5.0)]);
        assert_eq!(tracks2[0].id, tracks[0].id);
        assert_eq!(tracks2[1].id, tracks[1].id);
    }

    #[test]
    fn test_skip_epochs_wastes_track_once() {
        let mut tracker = iou_tracker(5);
        let tracks = tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0)]);
        let id = tracks[0].id;

        tracker.skip_epochs(10);
        assert_eq!(tracker.current_epoch(), 11);

        let wasted = tracker.wasted();
        assert_eq!(wasted.len(), 1);
        assert_eq!(wasted[0].id, id);
        assert!(tracker.wasted().is_empty(), "wasted drains exactly once");
    }

    #[test]
    fn test_scene_isolation() {
        let mut tracker = iou_tracker(5);
        let t1 = tracker.predict_with_scene(1, &[obs(10.0, 5.0, 7.0, 7.0)]);
        let t2 = tracker.predict_with_scene(2, &[obs(10.0, 5.0, 7.0, 7.0)]);

        assert_ne!(t1[0].id, t2[0].id, "same box in two scenes is two tracks");
        assert_eq!(tracker.current_epoch_with_scene(1), 1);
        assert_eq!(tracker.current_epoch_with_scene(2), 1);

        tracker.skip_epochs_for_scene(1, 7);
        assert_eq!(tracker.current_epoch_with_scene(1), 8);
        assert_eq!(tracker.current_epoch_with_scene(2), 1);

        let wasted = tracker.wasted();
        assert_eq!(wasted.len(), 1);
        assert_eq!(wasted[0].scene_id, 1);
    }

    #[test]
    fn test_idle_tracks_reporting() {
        let mut tracker = iou_tracker(5);
        tracker.predict(&[obs(0.0, 0.0, 5.0, 5.0), obs(100.0, 100.0, 5.0, 5.0)]);
        // only the first object shows up again
        let tracks = tracker.predict(&[obs(0.2, 0.2, 5.0, 5.0)]);
        assert_eq!(tracks.len(), 1);

        let idle = tracker.idle_tracks();
        assert_eq!(idle.len(), 1);
        assert!((idle[0].observed_bbox.xc - 102.5).abs() < crate::EPS);
    }

    #[test]
    fn test_clear_wasted_discards_tracks() {
        let mut tracker = iou_tracker(2);
        tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0)]);
        tracker.skip_epochs(3);
        tracker.clear_wasted();
        assert!(tracker.wasted().is_empty());
    }

    #[test]
    fn test_malformed_observation_is_skipped_not_fatal() {
        let mut tracker = iou_tracker(5);
        let bad = Observation::new(OrientedBox::new(0.0, 0.0, None, -1.0, 5.0));
        let good = obs(10.0, 5.0, 7.0, 7.0);
        let tracks = tracker.predict(&[bad, good]);
        assert_eq!(tracks.len(), 1, "only the valid observation yields a track");
    }

    #[test]
    fn test_out_of_range_feature_quality_is_rejected() {
        let mut tracker = iou_tracker(5);
        let bad = obs(10.0, 5.0, 7.0, 7.0).with_feature(vec![1.0, 0.0], Some(5.0));
        let good = obs(50.0, 50.0, 7.0, 7.0).with_feature(vec![1.0, 0.0], Some(0.9));
        let tracks = tracker.predict(&[bad, good]);
        assert_eq!(tracks.len(), 1, "quality outside [0, 1] must be skipped");
        assert!((tracks[0].observed_bbox.xc - 53.5).abs() < crate::EPS);
    }

    #[test]
    fn test_mahalanobis_tracking_keeps_id() {
        let mut tracker = Tracker::new(
            TrackerConfig::new(PositionalMetricType::Mahalanobis).with_max_idle_epochs(5),
        )
        .unwrap();

        let first = tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0)]);
        let id = first[0].id;
        for i in 1..5 {
            let shift = i as f32 * 0.2;
            let tracks = tracker.predict(&[obs(10.0 + shift, 5.0 + shift, 7.0, 7.0)]);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].id, id);
        }
    }

    #[test]
    fn test_mahalanobis_distant_observation_starts_new_track() {
        let mut tracker = Tracker::new(
            TrackerConfig::new(PositionalMetricType::Mahalanobis).with_max_idle_epochs(5),
        )
        .unwrap();

        let first = tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0)]);
        let tracks = tracker.predict(&[obs(1000.0, 1000.0, 7.0, 7.0)]);
        assert_ne!(tracks[0].id, first[0].id);
    }

    #[test]
    fn test_visual_tracking_votes_on_features() {
        let visual = VisualOptions {
            metric: VisualMetricType::euclidean(1.0).unwrap(),
            min_votes: 1,
            minimal_track_length: 1,
            ..VisualOptions::default()
        };
        let mut tracker = Tracker::new(
            TrackerConfig::new(PositionalMetricType::IoU(0.3))
                .with_max_idle_epochs(5)
                .with_visual(visual),
        )
        .unwrap();

        let feature = vec![1.0_f32, 0.0, 0.0];
        let first = tracker.predict(&[
            Observation::new(BoundingBox::new(10.0, 5.0, 7.0, 7.0).into())
                .with_feature(feature.clone(), Some(1.0)),
        ]);
        let id = first[0].id;

        let tracks = tracker.predict(&[
            Observation::new(BoundingBox::new(10.5, 5.5, 7.0, 7.0).into())
                .with_feature(feature, Some(1.0)),
        ]);
        assert_eq!(tracks[0].id, id);
        assert_eq!(tracks[0].voting, VotingType::Visual);
    }

    #[test]
    fn test_custom_id_round_trip() {
        let mut tracker = iou_tracker(5);
        let tracks = tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0).with_custom_id(42)]);
        assert_eq!(tracks[0].custom_id, Some(42));
    }

    #[test]
    fn test_sharded_prediction_matches_sequential() {
        let run = |distance_shards: usize| {
            let mut tracker = Tracker::new(
                TrackerConfig::new(PositionalMetricType::IoU(0.3))
                    .with_max_idle_epochs(5)
                    .with_shards(distance_shards, 1),
            )
            .unwrap();
            let mut ids = Vec::new();
            for step in 0..4 {
                let shift = step as f32 * 0.3;
                let observations: Vec<Observation> = (0..6)
                    .map(|i| obs(20.0 * i as f32 + shift, 5.0 + shift, 7.0, 7.0))
                    .collect();
                let tracks = tracker.predict(&observations);
                ids.push(tracks.iter().map(|t| t.id).collect::<Vec<_>>());
            }
            ids
        };

        assert_eq!(run(1), run(4), "shard count must not change the outcome");
    }

    #[test]
    fn test_auto_waste_sweeps_without_explicit_call() {
        let mut tracker = Tracker::new(
            TrackerConfig::new(PositionalMetricType::IoU(0.3))
                .with_max_idle_epochs(1)
                .with_auto_waste_periodicity(3),
        )
        .unwrap();

        tracker.predict(&[obs(10.0, 5.0, 7.0, 7.0)]);
        // the object disappears; epochs keep ticking via empty calls
        tracker.predict(&[]);
        tracker.predict(&[]);
        tracker.predict(&[]);
        let wasted = tracker.wasted();
        assert_eq!(wasted.len(), 1);
    }

    #[test]
    fn test_batch_prediction_covers_scenes_in_order() {
        let mut tracker = iou_tracker(5);

        let (mut request, result) = BatchRequest::new();
        request.add(3, obs(10.0, 5.0, 7.0, 7.0));
        request.add(1, obs(0.0, 0.0, 5.0, 5.0));
        request.add(1, obs(100.0, 100.0, 5.0, 5.0));
        assert_eq!(result.batch_size(), 2);

        tracker.predict_batch(request);

        let (scene_a, tracks_a) = result.get().unwrap();
        assert_eq!(scene_a, 1);
        assert_eq!(tracks_a.len(), 2);

        let (scene_b, tracks_b) = result.get().unwrap();
        assert_eq!(scene_b, 3);
        assert_eq!(tracks_b.len(), 1);

        assert!(result.get().is_none(), "every scene delivered exactly once");
        assert_eq!(tracker.current_epoch_with_scene(1), 1);
        assert_eq!(tracker.current_epoch_with_scene(3), 1);
    }

    #[test]
    fn test_batch_matches_sequential_per_scene_prediction() {
        let observations = |shift: f32| {
            vec![
                obs(10.0 + shift, 5.0 + shift, 7.0, 7.0),
                obs(50.0 + shift, 40.0 + shift, 6.0, 6.0),
            ]
        };

        let mut batched = iou_tracker(5);
        let mut sequential = iou_tracker(5);
        let mut batched_ids: Vec<Vec<u64>> = Vec::new();
        let mut sequential_ids: Vec<Vec<u64>> = Vec::new();

        for step in 0..3 {
            let shift = step as f32 * 0.3;

            let (mut request, result) = BatchRequest::new();
            for o in observations(shift) {
                request.add(1, o);
            }
            for o in observations(shift) {
                request.add(2, o);
            }
            batched.predict_batch(request);
            // the request side is consumed, so the channel drains to None
            let mut step_ids = Vec::new();
            while let Some((_, tracks)) = result.get() {
                step_ids.extend(tracks.iter().map(|t| t.id));
            }
            batched_ids.push(step_ids);

            let mut step_ids = Vec::new();
            for scene in [1, 2] {
                let tracks = sequential.predict_with_scene(scene, &observations(shift));
                step_ids.extend(tracks.iter().map(|t| t.id));
            }
            sequential_ids.push(step_ids);
        }

        assert_eq!(batched_ids, sequential_ids);
    }
}
