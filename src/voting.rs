//! Winner selection over distance records: greedy claiming for IoU,
//! optimal assignment for Mahalanobis, feature majority voting for the
//! visual layer with positional fallback.

use crate::assignment::linear_sum_assignment;
use crate::metric::DistanceRecord;
use crate::track::VotingType;
use itertools::Itertools;
use log::debug;
use std::collections::{HashMap, HashSet};

/// The association decision for one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    /// Merge the candidate into this track.
    Track(u64),
    /// Start a new track from the candidate.
    NewTrack,
}

/// Greedy matching: claim the highest-similarity pairs first.
///
/// Records without a positional value are ignored; ties break on the
/// candidate index, then the track id, so the result does not depend on
/// the input permutation. Candidates absent from the result start new
/// tracks.
pub fn greedy_winners(records: &[DistanceRecord]) -> HashMap<usize, Winner> {
    let pairs = records
        .iter()
        .filter_map(|r| r.positional.map(|p| (r.candidate, r.track_id, p)))
        .unique_by(|(candidate, track_id, _)| (*candidate, *track_id))
        .sorted_by(|(c1, t1, p1), (c2, t2, p2)| {
            p2.partial_cmp(p1)
                .unwrap()
                .then_with(|| c1.cmp(c2))
                .then_with(|| t1.cmp(t2))
        });

    let mut winners = HashMap::new();
    let mut claimed_tracks = HashSet::new();

    for (candidate, track_id, _) in pairs {
        if winners.contains_key(&candidate) || claimed_tracks.contains(&track_id) {
            continue;
        }
        winners.insert(candidate, Winner::Track(track_id));
        claimed_tracks.insert(track_id);
    }
    winners
}

/// Optimal assignment voting for the Mahalanobis metric.
///
/// The similarity matrix has one row per candidate and one column per
/// candidate plus one per track; a candidate's own column carries
/// `new_track_threshold`, so "start a new track" competes with every
/// real track in the same optimization.
pub fn optimal_winners(
    records: &[DistanceRecord],
    new_track_threshold: f32,
    candidate_count: usize,
) -> HashMap<usize, Winner> {
    let track_ids: Vec<u64> = records
        .iter()
        .map(|r| r.track_id)
        .unique()
        .sorted()
        .collect();

    if track_ids.is_empty() || candidate_count == 0 {
        return HashMap::new();
    }

    let track_col: HashMap<u64, usize> = track_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, candidate_count + i))
        .collect();

    let cols = candidate_count + track_ids.len();
    let mut similarity = vec![vec![0.0_f64; cols]; candidate_count];

    for r in records {
        if let Some(p) = r.positional {
            similarity[r.candidate][track_col[&r.track_id]] = p as f64;
        }
    }
    for (i, row) in similarity.iter_mut().enumerate() {
        row[i] = new_track_threshold as f64;
    }

    // maximize total similarity with a minimizing solver
    let cost: Vec<Vec<f64>> = similarity
        .iter()
        .map(|row| row.iter().map(|v| -v).collect())
        .collect();

    let result = linear_sum_assignment(&cost, f64::INFINITY);

    result
        .assignments
        .into_iter()
        .map(|a| {
            let winner = if a.col < candidate_count {
                Winner::NewTrack
            } else {
                Winner::Track(track_ids[a.col - candidate_count])
            };
            (a.row, winner)
        })
        .collect()
}

/// Feature majority voting.
///
/// Keeps records whose feature distance clears `max_distance`, groups
/// votes by (candidate, track), drops groups with fewer than
/// `min_votes` votes and weights the rest by the summed distance slack.
/// Winners are claimed greedily by weight; a candidate whose winner was
/// already claimed becomes a new track. Returns the per-candidate
/// outcome and the set of claimed tracks.
pub fn feature_winners(
    records: &[DistanceRecord],
    max_distance: f32,
    min_votes: usize,
) -> (HashMap<usize, Winner>, HashSet<u64>) {
    let mut max_seen = -1.0_f32;
    let mut groups: Vec<((usize, u64), Vec<f32>)> = records
        .iter()
        .filter_map(|r| {
            let d = r.feature?;
            if max_seen < d {
                max_seen = d;
            }
            (d <= max_distance).then_some(((r.candidate, r.track_id), d))
        })
        .into_group_map()
        .into_iter()
        .filter(|(_, dists)| dists.len() >= min_votes)
        .collect();

    let mut weighted: Vec<(usize, u64, f64)> = groups
        .drain(..)
        .map(|((candidate, track_id), dists)| {
            let weight: f64 = dists.into_iter().map(|d| (max_seen - d) as f64).sum();
            (candidate, track_id, weight)
        })
        .collect();

    weighted.sort_by(|(c1, t1, w1), (c2, t2, w2)| {
        w2.partial_cmp(w1)
            .unwrap()
            .then_with(|| c1.cmp(c2))
            .then_with(|| t1.cmp(t2))
    });

    debug!("Feature voting groups: {:?}", &weighted);

    let mut claimed: HashSet<u64> = HashSet::new();
    let mut winners: HashMap<usize, Winner> = HashMap::new();

    for (candidate, track_id, _) in weighted {
        if winners.contains_key(&candidate) {
            // only the heaviest group decides for a candidate
            continue;
        }
        if claimed.contains(&track_id) {
            winners.insert(candidate, Winner::NewTrack);
        } else {
            claimed.insert(track_id);
            winners.insert(candidate, Winner::Track(track_id));
        }
    }

    (winners, claimed)
}

/// How unresolved candidates fall back to positional voting.
#[derive(Clone, Copy, Debug)]
pub enum PositionalVoter {
    /// Greedy claiming (IoU-style similarities).
    Greedy,
    /// Optimal assignment with the new-track threshold (Mahalanobis).
    Optimal { new_track_threshold: f32 },
}

/// Visual voting: feature majority voting first, then positional voting
/// over the candidates and tracks the visual round left unresolved.
pub fn visual_winners(
    records: &[DistanceRecord],
    max_feature_distance: f32,
    min_votes: usize,
    voter: PositionalVoter,
    candidate_count: usize,
) -> HashMap<usize, (Winner, VotingType)> {
    let (visual, claimed_tracks) = feature_winners(records, max_feature_distance, min_votes);

    let mut winners: HashMap<usize, (Winner, VotingType)> = visual
        .into_iter()
        .map(|(candidate, w)| (candidate, (w, VotingType::Visual)))
        .collect();

    let remaining: Vec<DistanceRecord> = records
        .iter()
        .filter(|r| {
            !winners.contains_key(&r.candidate)
                && !claimed_tracks.contains(&r.track_id)
                && r.positional.is_some()
        })
        .cloned()
        .collect();

    let positional = match voter {
        PositionalVoter::Greedy => greedy_winners(&remaining),
        PositionalVoter::Optimal { new_track_threshold } => {
            optimal_winners(&remaining, new_track_threshold, candidate_count)
        }
    };

    for (candidate, w) in positional {
        winners.entry(candidate).or_insert((w, VotingType::Positional));
    }
    winners
}
