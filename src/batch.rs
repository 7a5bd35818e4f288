//! Multi-scene batch prediction plumbing: the request carries the
//! per-scene observations, the result side receives one entry per scene
//! over a channel.

use crate::tracker::Observation;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One delivered scene: the scene id with its track snapshots.
pub type SceneTracks = (u64, Vec<crate::track::Track>);

/// A batch of observations across scenes handed to
/// [`Tracker::predict_batch`](crate::tracker::Tracker::predict_batch).
#[derive(Debug)]
pub struct BatchRequest {
    pub(crate) batch: HashMap<u64, Vec<Observation>>,
    pub(crate) sender: Sender<SceneTracks>,
    batch_size: Arc<Mutex<usize>>,
}

impl BatchRequest {
    /// Creates an empty request with its paired result handle.
    pub fn new() -> (Self, BatchResult) {
        let (sender, receiver) = unbounded();
        let batch_size = Arc::new(Mutex::new(0));
        (
            Self {
                batch: HashMap::new(),
                sender,
                batch_size: batch_size.clone(),
            },
            BatchResult {
                receiver,
                batch_size,
            },
        )
    }

    /// Adds an observation to a scene, creating the scene on first use.
    pub fn add(&mut self, scene_id: u64, observation: Observation) {
        let scene = self.batch.entry(scene_id).or_default();
        scene.push(observation);
        *self.batch_size.lock() = self.batch.len();
    }
}

/// The receiving side of a batch request. Exactly one [`SceneTracks`]
/// entry arrives per scene added to the request, delivered in ascending
/// scene-id order.
#[derive(Debug)]
pub struct BatchResult {
    receiver: Receiver<SceneTracks>,
    batch_size: Arc<Mutex<usize>>,
}

impl BatchResult {
    /// Blocks for the next scene result; `None` once every scene was
    /// delivered and the request side is gone.
    pub fn get(&self) -> Option<SceneTracks> {
        self.receiver.recv().ok()
    }

    /// Whether a scene result can be taken without blocking.
    pub fn ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Number of scenes in the request, and so the number of results to
    /// expect.
    pub fn batch_size(&self) -> usize {
        *self.batch_size.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;

    fn obs(left: f32, top: f32) -> Observation {
        Observation::new(BoundingBox::new(left, top, 5.0, 5.0).into())
    }

    #[test]
    fn test_batch_size_counts_scenes_not_observations() {
        let (mut request, result) = BatchRequest::new();
        assert_eq!(result.batch_size(), 0);

        request.add(1, obs(0.0, 0.0));
        request.add(1, obs(10.0, 10.0));
        request.add(2, obs(0.0, 0.0));

        assert_eq!(result.batch_size(), 2);
        assert_eq!(request.batch[&1].len(), 2);
    }

    #[test]
    fn test_result_drains_after_request_drop() {
        let (mut request, result) = BatchRequest::new();
        request.add(7, obs(0.0, 0.0));

        request.sender.send((7, vec![])).unwrap();
        drop(request);

        assert!(result.ready());
        assert_eq!(result.get().unwrap().0, 7);
        assert!(result.get().is_none(), "channel closed after the request");
    }
}
