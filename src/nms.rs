//! Non-maximum suppression over oriented boxes.

use crate::bbox::OrientedBox;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
struct Candidate<'a> {
    bbox: &'a OrientedBox,
    rank: f32,
    index: usize,
}

impl<'a> Candidate<'a> {
    fn new(bbox: &'a OrientedBox, rank: &Option<f32>, index: usize) -> Self {
        Self {
            bbox,
            rank: rank.unwrap_or(bbox.height),
            index,
        }
    }
}

fn rank_candidates<'a>(
    detections: &'a [(OrientedBox, Option<f32>)],
    score_threshold: Option<f32>,
) -> Vec<Candidate<'a>> {
    let score_threshold = score_threshold.unwrap_or(f32::MIN);
    detections
        .iter()
        .filter(|(e, score)| {
            score.unwrap_or(f32::MAX) > score_threshold && e.height > 0.0 && e.aspect > 0.0
        })
        .enumerate()
        .map(|(index, (b, score))| Candidate::new(b, score, index))
        .sorted_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap())
        .collect::<Vec<_>>()
}

/// NMS algorithm implementation
///
/// # Parameters
/// * `detections` - boxes with optional scores; when the score is `None`
///   the box height is used as the rank;
/// * `nms_threshold` - overlap ratio above which the lower-ranked box is
///   suppressed;
/// * `score_threshold` - boxes with a score at or below this value are
///   dropped before suppression; `None` disables the filter.
pub fn nms(
    detections: &[(OrientedBox, Option<f32>)],
    nms_threshold: f32,
    score_threshold: Option<f32>,
) -> Vec<&OrientedBox> {
    let nms_boxes = rank_candidates(detections, score_threshold);

    let mut excluded = HashSet::new();

    for (index, cb) in nms_boxes.iter().enumerate() {
        if excluded.contains(&cb.index) {
            continue;
        }

        for ob in &nms_boxes[index + 1..] {
            if excluded.contains(&ob.index) {
                continue;
            }

            let metric = OrientedBox::intersection(cb.bbox, ob.bbox) as f32 / ob.bbox.area();
            if metric > nms_threshold {
                excluded.insert(ob.index);
            }
        }
    }

    nms_boxes
        .into_iter()
        .filter(|e| !excluded.contains(&e.index))
        .map(|e| e.bbox)
        .collect()
}

/// Parallel NMS. The pairwise overlap matrix is computed with rayon; the
/// suppression sweep itself is sequential, so the output is identical to
/// [`nms`] for the same input.
pub fn parallel_nms(
    detections: &[(OrientedBox, Option<f32>)],
    nms_threshold: f32,
    score_threshold: Option<f32>,
) -> Vec<&OrientedBox> {
    let nms_boxes = rank_candidates(detections, score_threshold);

    let weight_matrix = nms_boxes
        .par_iter()
        .enumerate()
        .flat_map(|(index, cb)| {
            nms_boxes[index + 1..]
                .iter()
                .enumerate()
                .map(|(inner_index, ob)| {
                    (
                        (index, inner_index),
                        OrientedBox::intersection(cb.bbox, ob.bbox) as f32 / ob.bbox.area(),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect::<HashMap<_, _>>();

    let mut excluded = HashSet::new();

    for (index, cb) in nms_boxes.iter().enumerate() {
        if excluded.contains(&cb.index) {
            continue;
        }

        for (inner_index, ob) in nms_boxes[index + 1..].iter().enumerate() {
            if excluded.contains(&ob.index) {
                continue;
            }

            let metric = weight_matrix[&(index, inner_index)];
            if metric > nms_threshold {
                excluded.insert(ob.index);
            }
        }
    }

    nms_boxes
        .into_iter()
        .filter(|e| !excluded.contains(&e.index))
        .map(|e| e.bbox)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;

    #[test]
    fn test_nms_suppresses_duplicates() {
        let bboxes = [
            (OrientedBox::new(0.0, 0.0, None, 1.0, 5.0), None),
            (OrientedBox::new(0.0, 0.0, None, 1.05, 5.1), None),
            (OrientedBox::new(0.0, 0.0, None, 1.0, 4.9), None),
            (OrientedBox::new(30.0, 40.0, None, 1.0, 4.5), None),
        ];
        let res = nms(&bboxes, 0.8, None);
        // near-identical concentric boxes collapse to the tallest one,
        // the distant box survives
        assert_eq!(res.len(), 2);
        assert!((res[0].height - 5.1).abs() < crate::EPS);
        assert!((res[1].height - 4.5).abs() < crate::EPS);
    }

    #[test]
    fn test_nms_keeps_higher_scored_duplicate() {
        // two boxes with IoU around 0.9
        let a = BoundingBox::new(0.0, 0.0, 10.0, 20.0).as_oriented();
        let b = BoundingBox::new(0.3, 0.3, 10.0, 20.0).as_oriented();
        let iou = OrientedBox::iou(&a, &b).unwrap();
        assert!(iou > 0.85, "test premise: duplicates, got IoU {}", iou);

        let detections = [(a, Some(0.6)), (b.clone(), Some(0.9))];
        let res = nms(&detections, 0.7, None);
        assert_eq!(res.len(), 1);
        assert_eq!(*res[0], b, "the higher-scored duplicate must survive");
    }

    #[test]
    fn test_nms_score_threshold_filters_input() {
        let detections = [
            (OrientedBox::new(0.0, 0.0, None, 1.0, 5.0), Some(0.1)),
            (OrientedBox::new(50.0, 0.0, None, 1.0, 5.0), Some(0.9)),
        ];
        let res = nms(&detections, 0.7, Some(0.5));
        assert_eq!(res.len(), 1);
        assert!((res[0].xc - 50.0).abs() < crate::EPS);
    }

    #[test]
    fn test_nms_drops_degenerate_boxes() {
        let detections = [
            (OrientedBox::new(0.0, 0.0, None, 0.0, 5.0), None),
            (OrientedBox::new(0.0, 0.0, None, 1.0, 0.0), None),
            (OrientedBox::new(0.0, 0.0, None, 1.0, 5.0), None),
        ];
        let res = nms(&detections, 0.7, None);
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn test_parallel_nms_matches_serial() {
        let mut detections = Vec::new();
        for i in 0..40 {
            let x = (i % 7) as f32 * 3.0;
            let y = (i % 5) as f32 * 4.0;
            let h = 4.0 + (i % 3) as f32;
            let score = if i % 2 == 0 { Some(0.3 + (i as f32) / 100.0) } else { None };
            detections.push((OrientedBox::new(x, y, None, 1.0, h), score));
        }

        let serial = nms(&detections, 0.6, Some(0.2));
        let parallel = parallel_nms(&detections, 0.6, Some(0.2));
        assert_eq!(serial, parallel, "parallel NMS must be bit-identical");
    }
}
