//! 2D convex hull and point containment, used to restrict depth maps to the
//! region supported by sparse observations.

use nalgebra::Point2;

/// Tolerance for orientation tests (pixels²).
const ORIENT_EPS: f64 = 1e-9;

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull via Andrew's monotone chain.
///
/// Returns the hull vertices in counter-clockwise order without repeating the
/// first vertex. Collinear boundary points are dropped. Non-finite input
/// points are ignored.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points
        .iter()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .copied()
        .collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| (a.x - b.x).abs() < ORIENT_EPS && (a.y - b.y).abs() < ORIENT_EPS);

    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= ORIENT_EPS {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= ORIENT_EPS {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Whether `p` lies inside or on the boundary of a counter-clockwise convex
/// polygon. Degenerate polygons (fewer than 3 vertices) contain nothing.
pub fn point_in_convex_polygon(hull: &[Point2<f64>], p: &Point2<f64>) -> bool {
    if hull.len() < 3 {
        return false;
    }
    (0..hull.len()).all(|i| {
        let a = &hull[i];
        let b = &hull[(i + 1) % hull.len()];
        cross(a, b, p) >= -ORIENT_EPS
    })
}
