//! Track storage: the scene-epoch clock, the live-track arena and the
//! waste bin terminated tracks are drained from.

use crate::track::{TrackState, WastedTrack};
use std::collections::HashMap;

/// Number of prediction calls between automatic waste sweeps.
pub const DEFAULT_AUTO_WASTE_PERIODICITY: usize = 100;

/// Live tracks across all scenes plus the per-scene epoch counters.
#[derive(Debug, Default)]
pub(crate) struct TrackStore {
    epochs: HashMap<u64, usize>,
    tracks: HashMap<u64, TrackState>,
    wasted: Vec<TrackState>,
    max_idle_epochs: usize,
}

impl TrackStore {
    pub fn new(max_idle_epochs: usize) -> Self {
        Self {
            max_idle_epochs,
            ..Self::default()
        }
    }

    /// Current epoch of the scene; a scene that never ran is at 0.
    pub fn current_epoch(&self, scene_id: u64) -> usize {
        self.epochs.get(&scene_id).copied().unwrap_or(0)
    }

    /// Advances the scene clock by one and returns the new epoch.
    pub fn next_epoch(&mut self, scene_id: u64) -> usize {
        let epoch = self.epochs.entry(scene_id).or_insert(0);
        *epoch += 1;
        *epoch
    }

    /// Advances the scene clock by `n` epochs without observations. For
    /// lifecycle purposes this is exactly `n` empty prediction calls.
    pub fn skip_epochs(&mut self, scene_id: u64, n: usize) {
        let epoch = self.epochs.entry(scene_id).or_insert(0);
        *epoch += n;
    }

    pub fn add(&mut self, track: TrackState) {
        self.tracks.insert(track.id, track);
    }

    pub fn get_mut(&mut self, track_id: u64) -> Option<&mut TrackState> {
        self.tracks.get_mut(&track_id)
    }

    /// Live tracks of one scene, ordered by id so downstream passes are
    /// deterministic.
    pub fn scene_tracks(&self, scene_id: u64) -> Vec<&TrackState> {
        let mut tracks: Vec<&TrackState> = self
            .tracks
            .values()
            .filter(|t| t.scene_id == scene_id)
            .collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    /// Tracks of the scene that were not updated in the current epoch.
    pub fn idle_tracks(&self, scene_id: u64) -> Vec<&TrackState> {
        let epoch = self.current_epoch(scene_id);
        let mut tracks: Vec<&TrackState> = self
            .tracks
            .values()
            .filter(|t| t.scene_id == scene_id && t.last_updated_epoch != epoch)
            .collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }

    /// Moves every track that outlived its idle allowance into the
    /// waste bin.
    pub fn sweep(&mut self) {
        let epochs = &self.epochs;
        let max_idle = self.max_idle_epochs;
        let mut wasted_ids: Vec<u64> = self
            .tracks
            .values()
            .filter(|t| {
                let current = epochs.get(&t.scene_id).copied().unwrap_or(0);
                t.last_updated_epoch + max_idle < current
            })
            .map(|t| t.id)
            .collect();
        wasted_ids.sort_unstable();

        for id in wasted_ids {
            if let Some(track) = self.tracks.remove(&id) {
                self.wasted.push(track);
            }
        }
    }

    /// Drains the waste bin; every terminated track is returned exactly
    /// once.
    pub fn drain_wasted(&mut self) -> Vec<WastedTrack> {
        self.wasted
            .drain(..)
            .map(TrackState::into_wasted)
            .collect()
    }

    /// Discards the waste bin without returning the tracks.
    pub fn clear_wasted(&mut self) {
        self.wasted.clear();
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.tracks.len()
    }
}
