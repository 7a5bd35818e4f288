//! Bounding boxes: the axis-aligned `(left, top, width, height)` form and
//! the oriented form used everywhere inside the engine.

use crate::clipping::{polygon_area, sutherland_hodgman_clip, Polygon};
use crate::{Error, EPS};
use nalgebra::Point2;
use std::f32::consts::PI;

/// Bounding box in the format (left, top, width, height)
#[derive(Clone, Default, Debug, Copy)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
            confidence: 1.0,
        }
    }

    pub fn new_with_confidence(
        left: f32,
        top: f32,
        width: f32,
        height: f32,
        confidence: f32,
    ) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&confidence),
            "Confidence must lay between 0.0 and 1.0"
        );
        Self {
            left,
            top,
            width,
            height,
            confidence,
        }
    }

    /// Converts into the oriented representation (angle unset).
    pub fn as_oriented(&self) -> OrientedBox {
        OrientedBox::from(self)
    }

    /// Axis-aligned intersection area.
    pub fn intersection(l: &BoundingBox, r: &BoundingBox) -> f64 {
        debug_assert!(l.width > 0.0 && l.height > 0.0);
        debug_assert!(r.width > 0.0 && r.height > 0.0);

        let (ax0, ay0, ax1, ay1) = (l.left, l.top, l.left + l.width, l.top + l.height);
        let (bx0, by0, bx1, by1) = (r.left, r.top, r.left + r.width, r.top + r.height);

        let (x1, y1) = (ax0.max(bx0), ay0.max(by0));
        let (x2, y2) = (ax1.min(bx1), ay1.min(by1));

        let int_width = x2 - x1;
        let int_height = y2 - y1;

        if int_width > 0.0 && int_height > 0.0 {
            (int_width * int_height) as f64
        } else {
            0.0_f64
        }
    }

    /// Intersection over union for axis-aligned boxes. Zero-area inputs
    /// have an empty union and yield 0.
    pub fn iou(l: &BoundingBox, r: &BoundingBox) -> f32 {
        let areas = (l.height * l.width + r.height * r.width) as f64;
        if areas <= 0.0 {
            return 0.0;
        }
        let intersection = BoundingBox::intersection(l, r);
        (intersection / (areas - intersection)) as f32
    }
}

impl PartialEq<Self> for BoundingBox {
    fn eq(&self, other: &Self) -> bool {
        (self.left - other.left).abs() < EPS
            && (self.top - other.top).abs() < EPS
            && (self.width - other.width).abs() < EPS
            && (self.height - other.height).abs() < EPS
            && (self.confidence - other.confidence).abs() < EPS
    }
}

/// Bounding box in the format (xc, yc, angle, aspect, height).
///
/// The angle is optional; when it is unset the box is axis-aligned and
/// convertible back to a [`BoundingBox`] without loss. The polygon
/// vertices are cached on demand; `Clone` drops the cache.
#[derive(Default, Debug)]
pub struct OrientedBox {
    pub xc: f32,
    pub yc: f32,
    pub angle: Option<f32>,
    pub aspect: f32,
    pub height: f32,
    pub confidence: f32,
    vertex_cache: Option<Polygon>,
}

impl Clone for OrientedBox {
    fn clone(&self) -> Self {
        OrientedBox::new_with_confidence(
            self.xc,
            self.yc,
            self.angle,
            self.aspect,
            self.height,
            self.confidence,
        )
    }
}

impl OrientedBox {
    pub fn new(xc: f32, yc: f32, angle: Option<f32>, aspect: f32, height: f32) -> Self {
        Self {
            xc,
            yc,
            angle,
            aspect,
            height,
            confidence: 1.0,
            vertex_cache: None,
        }
    }

    pub fn new_with_confidence(
        xc: f32,
        yc: f32,
        angle: Option<f32>,
        aspect: f32,
        height: f32,
        confidence: f32,
    ) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&confidence),
            "Confidence must lay between 0.0 and 1.0"
        );
        Self {
            xc,
            yc,
            angle,
            aspect,
            height,
            confidence,
            vertex_cache: None,
        }
    }

    pub fn ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::from(BoundingBox::new(left, top, width, height))
    }

    pub fn ltwh_with_confidence(
        left: f32,
        top: f32,
        width: f32,
        height: f32,
        confidence: f32,
    ) -> Self {
        Self::from(BoundingBox::new_with_confidence(
            left, top, width, height, confidence,
        ))
    }

    /// Radius of the circumscribed circle.
    pub fn get_radius(&self) -> f32 {
        let hw = self.aspect * self.height / 2.0_f32;
        let hh = self.height / 2.0_f32;
        (hw * hw + hh * hh).sqrt()
    }

    pub fn area(&self) -> f32 {
        self.height * self.height * self.aspect
    }

    #[inline]
    pub fn get_vertices(&self) -> Polygon {
        let angle = self.angle.unwrap_or(0.0) as f64;
        let height = self.height as f64;
        let aspect = self.aspect as f64;

        let c = angle.cos();
        let s = angle.sin();

        let half_width = height * aspect / 2.0;
        let half_height = height / 2.0;

        let r1x = -half_width * c - half_height * s;
        let r1y = -half_width * s + half_height * c;

        let r2x = half_width * c - half_height * s;
        let r2y = half_width * s + half_height * c;

        let x = self.xc as f64;
        let y = self.yc as f64;

        vec![
            Point2::new(x + r1x, y + r1y),
            Point2::new(x + r2x, y + r2y),
            Point2::new(x - r1x, y - r1y),
            Point2::new(x - r2x, y - r2y),
        ]
    }

    #[inline]
    pub fn get_cached_vertices(&self) -> &Option<Polygon> {
        &self.vertex_cache
    }

    /// Populates the vertex cache for a rotated box.
    #[inline]
    pub fn gen_vertices(&mut self) -> &Self {
        if self.angle.is_some() {
            self.vertex_cache = Some(self.get_vertices());
        }
        self
    }

    /// Sets the angle
    pub fn rotate(self, angle: f32) -> Self {
        Self {
            xc: self.xc,
            yc: self.yc,
            angle: Some(angle),
            aspect: self.aspect,
            height: self.height,
            confidence: self.confidence,
            vertex_cache: None,
        }
    }

    /// Sets the angle
    pub fn rotate_mut(&mut self, angle: f32) {
        self.angle = Some(angle);
        self.vertex_cache = None;
    }

    pub fn set_confidence(&mut self, confidence: f32) {
        debug_assert!(
            (0.0..=1.0).contains(&confidence),
            "Confidence must lay between 0.0 and 1.0"
        );
        self.confidence = confidence;
    }

    /// `true` when the circumscribed circles do not intersect, so the
    /// boxes cannot overlap and polygon math can be skipped.
    pub fn too_far(l: &OrientedBox, r: &OrientedBox) -> bool {
        debug_assert!(l.aspect > 0.0 && l.height > 0.0);
        debug_assert!(r.aspect > 0.0 && r.height > 0.0);

        let max_distance = l.get_radius() + r.get_radius();
        let x = l.xc - r.xc;
        let y = l.yc - r.yc;
        x * x + y * y > max_distance * max_distance
    }

    /// Center distance measured in units of the summed radii. Values
    /// above 1.0 mean the boxes cannot overlap.
    pub fn dist_in_2r(l: &OrientedBox, r: &OrientedBox) -> f32 {
        debug_assert!(l.aspect > 0.0 && l.height > 0.0);
        debug_assert!(r.aspect > 0.0 && r.height > 0.0);

        let radial_distance = l.get_radius() + r.get_radius();
        let x = l.xc - r.xc;
        let y = l.yc - r.yc;
        (x * x + y * y).sqrt() / (radial_distance * radial_distance + EPS).sqrt()
    }

    /// Intersection area via polygon clipping, with the radius-based
    /// early exit.
    pub fn intersection(l: &OrientedBox, r: &OrientedBox) -> f64 {
        if OrientedBox::too_far(l, r) {
            0.0
        } else {
            let mut l = l.clone();
            let mut r = r.clone();

            if l.get_cached_vertices().is_none() {
                let angle = l.angle.unwrap_or(0.0);
                l.rotate_mut(angle);
                l.gen_vertices();
            }

            if r.get_cached_vertices().is_none() {
                let angle = r.angle.unwrap_or(0.0);
                r.rotate_mut(angle);
                r.gen_vertices();
            }

            let p1 = l.get_cached_vertices().as_ref().unwrap();
            let p2 = r.get_cached_vertices().as_ref().unwrap();

            polygon_area(&sutherland_hodgman_clip(p1, p2))
        }
    }

    /// Intersection over union. `None` when the clipped intersection is
    /// empty, which callers treat as "no overlap at all".
    pub fn iou(l: &OrientedBox, r: &OrientedBox) -> Option<f32> {
        if l.angle.is_none() && r.angle.is_none() {
            // axis-aligned fast path, exact and cheaper than clipping
            let lb = BoundingBox::try_from(l).ok()?;
            let rb = BoundingBox::try_from(r).ok()?;
            let intersection = BoundingBox::intersection(&lb, &rb);
            if intersection == 0.0 {
                return None;
            }
            let union = (lb.height * lb.width + rb.height * rb.width) as f64 - intersection;
            return Some((intersection / union) as f32);
        }

        let intersection = OrientedBox::intersection(l, r);
        if intersection == 0.0 {
            None
        } else {
            let union = (l.area() + r.area()) as f64 - intersection;
            Some((intersection / union) as f32)
        }
    }
}

impl From<BoundingBox> for OrientedBox {
    fn from(f: BoundingBox) -> Self {
        Self::from(&f)
    }
}

impl From<&BoundingBox> for OrientedBox {
    fn from(f: &BoundingBox) -> Self {
        OrientedBox {
            xc: f.left + f.width / 2.0,
            yc: f.top + f.height / 2.0,
            angle: None,
            aspect: f.width / f.height,
            height: f.height,
            confidence: f.confidence,
            vertex_cache: None,
        }
    }
}

impl TryFrom<OrientedBox> for BoundingBox {
    type Error = Error;

    fn try_from(value: OrientedBox) -> Result<Self, Self::Error> {
        BoundingBox::try_from(&value)
    }
}

impl TryFrom<&OrientedBox> for BoundingBox {
    type Error = Error;

    fn try_from(f: &OrientedBox) -> Result<Self, Self::Error> {
        if f.angle.is_some() {
            Err(Error::ConversionError(
                "rotated box cannot be represented as (left, top, width, height)".to_owned(),
            ))
        } else {
            let width = f.height * f.aspect;
            Ok(BoundingBox {
                left: f.xc - width / 2.0,
                top: f.yc - f.height / 2.0,
                width,
                height: f.height,
                confidence: f.confidence,
            })
        }
    }
}

impl PartialEq<Self> for OrientedBox {
    fn eq(&self, other: &Self) -> bool {
        (self.xc - other.xc).abs() < EPS
            && (self.yc - other.yc).abs() < EPS
            && (self.angle.unwrap_or(0.0) - other.angle.unwrap_or(0.0)).abs() < EPS
            && (self.aspect - other.aspect).abs() < EPS
            && (self.height - other.height).abs() < EPS
    }
}

/// Folds an arbitrary angle into `[0, 2PI)`.
pub fn normalize_angle(a: f32) -> f32 {
    let pix2 = 2.0 * PI;
    let n = (a / pix2).floor();
    let a = a - n * pix2;
    if a < 0.0 {
        a + pix2
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_roundtrip() {
        let bb = BoundingBox::new(10.0, 5.0, 7.0, 14.0);
        let ob = bb.as_oriented();
        assert!((ob.xc - 13.5).abs() < EPS);
        assert!((ob.yc - 12.0).abs() < EPS);
        assert!((ob.aspect - 0.5).abs() < EPS);
        assert!((ob.height - 14.0).abs() < EPS);
        assert!(ob.angle.is_none());

        let back = BoundingBox::try_from(&ob).expect("axis-aligned box must convert back");
        assert_eq!(back, bb);
    }

    #[test]
    fn test_rotated_conversion_fails() {
        let ob = OrientedBox::ltwh(0.0, 0.0, 5.0, 5.0).rotate(0.5);
        assert!(
            BoundingBox::try_from(&ob).is_err(),
            "rotated box must not convert to ltwh"
        );
    }

    #[test]
    fn test_axis_aligned_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        let iou = BoundingBox::iou(&a, &b);
        assert!((iou - 25.0 / 175.0).abs() < EPS);
    }

    #[test]
    fn test_oriented_iou_matches_axis_aligned() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        let expected = BoundingBox::iou(&a, &b);

        // the generic clipping path must agree with the fast path
        let oa = a.as_oriented().rotate(0.0);
        let ob = b.as_oriented().rotate(0.0);
        let got = OrientedBox::iou(&oa, &ob).expect("overlapping boxes have IoU");
        assert!(
            (got - expected).abs() < 1e-4,
            "clipping IoU {} diverged from axis-aligned IoU {}",
            got,
            expected
        );
    }

    #[test]
    fn test_axis_aligned_iou_zero_union_is_zero() {
        let a = BoundingBox::new(5.0, 5.0, 0.0, 0.0);
        let b = BoundingBox::new(5.0, 5.0, 0.0, 0.0);
        let iou = BoundingBox::iou(&a, &b);
        assert_eq!(iou, 0.0, "an empty union must not produce NaN");
    }

    #[test]
    fn test_iou_disjoint_is_none() {
        let a = OrientedBox::ltwh(0.0, 0.0, 2.0, 2.0);
        let b = OrientedBox::ltwh(100.0, 100.0, 2.0, 2.0);
        assert!(OrientedBox::iou(&a, &b).is_none());
    }

    #[test]
    fn test_rotated_iou() {
        let a = OrientedBox::new(0.0, 0.0, Some(2.0), 0.5, 2.0);
        let b = OrientedBox::new(0.0, 0.0, Some(2.0 + PI / 2.0), 0.5, 2.0);
        let iou = OrientedBox::iou(&a, &b).expect("concentric boxes overlap");
        // two unit-area boxes crossed at 90 degrees: union = 3 * intersection
        assert!(iou > 0.0 && iou < 1.0);

        let c = OrientedBox::new(10.0, 0.0, Some(2.0 + PI / 2.0), 0.5, 2.0);
        assert!(OrientedBox::iou(&a, &c).is_none());
    }

    #[test]
    fn test_too_far_and_dist_in_2r() {
        let a = OrientedBox::ltwh(0.0, 0.0, 2.0, 2.0);
        let b = OrientedBox::ltwh(1.0, 1.0, 2.0, 2.0);
        let c = OrientedBox::ltwh(50.0, 50.0, 2.0, 2.0);
        assert!(!OrientedBox::too_far(&a, &b));
        assert!(OrientedBox::too_far(&a, &c));
        assert!(OrientedBox::dist_in_2r(&a, &b) < 1.0);
        assert!(OrientedBox::dist_in_2r(&a, &c) > 1.0);
    }

    #[test]
    fn test_radius_and_area() {
        let b = OrientedBox::new(0.0, 0.0, None, 2.0, 3.0);
        // w = 6, h = 3
        assert!((b.area() - 18.0).abs() < EPS);
        assert!((b.get_radius() - (9.0_f32 + 2.25).sqrt()).abs() < EPS);
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(0.3) - 0.3).abs() < EPS);
        assert!((normalize_angle(-0.3) - 5.983184).abs() < EPS);
        assert!((normalize_angle(6.583184) - 0.3).abs() < EPS);
    }

    #[test]
    fn test_clone_drops_vertex_cache() {
        let mut b = OrientedBox::new(0.0, 0.0, Some(1.0), 1.0, 5.0);
        b.gen_vertices();
        assert!(b.get_cached_vertices().is_some());
        let c = b.clone();
        assert!(c.get_cached_vertices().is_none());
    }
}
