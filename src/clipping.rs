//! Convex polygon clipping used by the oriented-box intersection metric.
//!
//! The boxes this crate works with are convex quadrilaterals, so the
//! classic Sutherland-Hodgman algorithm is sufficient and exact.

use nalgebra::Point2;

/// A polygon is an ordered vertex ring without a repeated closing point.
pub type Polygon = Vec<Point2<f64>>;

fn is_inside(q: &Point2<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> bool {
    let r = (p2.x - p1.x) * (q.y - p1.y) - (p2.y - p1.y) * (q.x - p1.x);
    r <= 0.0
}

fn compute_intersection(
    cp1: &Point2<f64>,
    cp2: &Point2<f64>,
    s: &Point2<f64>,
    e: &Point2<f64>,
) -> Point2<f64> {
    let dc = (cp1.x - cp2.x, cp1.y - cp2.y);
    let dp = (s.x - e.x, s.y - e.y);
    let n1 = cp1.x * cp2.y - cp1.y * cp2.x;
    let n2 = s.x * e.y - s.y * e.x;
    let n3 = 1.0 / (dc.0 * dp.1 - dc.1 * dp.0);
    Point2::new((n1 * dp.0 - n2 * dc.0) * n3, (n1 * dp.1 - n2 * dc.1) * n3)
}

/// Clips `subject` by the convex `clipping` polygon.
///
/// Both polygons must be wound clockwise. The result may be empty when
/// the polygons do not overlap.
pub fn sutherland_hodgman_clip(subject: &Polygon, clipping: &Polygon) -> Polygon {
    let mut final_polygon = subject.clone();

    for i in 0..clipping.len() {
        let next_polygon = final_polygon;
        final_polygon = Vec::default();

        let i_prev = if i == 0 { clipping.len() - 1 } else { i - 1 };
        let c_edge_start = clipping[i_prev];
        let c_edge_end = clipping[i];

        for j in 0..next_polygon.len() {
            let j_prev = if j == 0 { next_polygon.len() - 1 } else { j - 1 };
            let s_edge_start = next_polygon[j_prev];
            let s_edge_end = next_polygon[j];

            if is_inside(&s_edge_end, &c_edge_start, &c_edge_end) {
                if !is_inside(&s_edge_start, &c_edge_start, &c_edge_end) {
                    final_polygon.push(compute_intersection(
                        &s_edge_start,
                        &s_edge_end,
                        &c_edge_start,
                        &c_edge_end,
                    ));
                }
                final_polygon.push(s_edge_end);
            } else if is_inside(&s_edge_start, &c_edge_start, &c_edge_end) {
                final_polygon.push(compute_intersection(
                    &s_edge_start,
                    &s_edge_end,
                    &c_edge_start,
                    &c_edge_end,
                ));
            }
        }
    }
    final_polygon
}

/// Unsigned polygon area by the shoelace formula.
pub fn polygon_area(polygon: &Polygon) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..polygon.len() {
        let p1 = &polygon[i];
        let p2 = &polygon[(i + 1) % polygon.len()];
        acc += p1.x * p2.y - p2.x * p1.y;
    }
    acc.abs() / 2.0
}
