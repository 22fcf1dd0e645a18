use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{BBox, Point};

const AREA_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolygonError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon vertex {0} has a non-finite coordinate")]
    NonFinite(usize),
    #[error("polygon has zero area")]
    ZeroArea,
    #[error("polygon edges {0} and {1} intersect")]
    SelfIntersecting(usize, usize),
}

/// Simple polygon in frame pixel space, validated on construction.
///
/// Repeated consecutive vertices are collapsed and an explicitly closed ring
/// (last vertex equal to the first) is accepted and stored open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polygon {
    vertices: Vec<Point>,
    bounds: BBox,
}

impl Polygon {
    pub fn new(mut vertices: Vec<Point>) -> Result<Self, PolygonError> {
        vertices.dedup();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(PolygonError::TooFewVertices(vertices.len()));
        }
        if let Some(index) = vertices.iter().position(|p| !p.is_finite()) {
            return Err(PolygonError::NonFinite(index));
        }
        if signed_area(&vertices).abs() <= AREA_EPSILON {
            return Err(PolygonError::ZeroArea);
        }
        if let Some((a, b)) = first_crossing(&vertices) {
            return Err(PolygonError::SelfIntersecting(a, b));
        }
        let bounds = bounds_of(&vertices);
        Ok(Self { vertices, bounds })
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn bounds(&self) -> BBox {
        self.bounds
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.vertices).abs()
    }

    /// Strict containment: points on an edge or vertex are outside.
    pub fn contains(&self, point: Point) -> bool {
        if !point.is_finite() {
            return false;
        }
        let b = self.bounds;
        if point.x <= b.x1 || point.x >= b.x2 || point.y <= b.y1 || point.y >= b.y2 {
            return false;
        }

        let (px, py) = (point.x as f64, point.y as f64);
        let mut inside = false;
        for (a, b) in self.edges() {
            let (ax, ay) = (a.x as f64, a.y as f64);
            let (bx, by) = (b.x as f64, b.y as f64);
            if on_segment((ax, ay), (bx, by), (px, py)) {
                return false;
            }
            if (ay > py) != (by > py) {
                let cross_x = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < cross_x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = PolygonError;

    fn try_from(vertices: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(vertices)
    }
}

impl From<Polygon> for Vec<Point> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices
    }
}

fn signed_area(vertices: &[Point]) -> f64 {
    let n = vertices.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        sum += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    sum / 2.0
}

fn bounds_of(vertices: &[Point]) -> BBox {
    let mut bounds = BBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in vertices {
        bounds.x1 = bounds.x1.min(p.x);
        bounds.y1 = bounds.y1.min(p.y);
        bounds.x2 = bounds.x2.max(p.x);
        bounds.y2 = bounds.y2.max(p.y);
    }
    bounds
}

type P = (f64, f64);

fn cross(o: P, a: P, b: P) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn within_box(a: P, b: P, p: P) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn on_segment(a: P, b: P, p: P) -> bool {
    cross(a, b, p).abs() <= AREA_EPSILON && within_box(a, b, p)
}

fn segments_touch(a: P, b: P, c: P, d: P) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    if ((d1 > 0. && d2 < 0.) || (d1 < 0. && d2 > 0.)) && ((d3 > 0. && d4 < 0.) || (d3 < 0. && d4 > 0.))
    {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

/// First pair of non-adjacent edges that touch or cross.
fn first_crossing(vertices: &[Point]) -> Option<(usize, usize)> {
    let n = vertices.len();
    let at = |i: usize| {
        let p = vertices[i % n];
        (p.x as f64, p.y as f64)
    };
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_touch(at(i), at(i + 1), at(j), at(j + 1)) {
                return Some((i, j));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(points: &[(f32, f32)]) -> Result<Polygon, PolygonError> {
        Polygon::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    fn square() -> Polygon {
        poly(&[(0., 0.), (100., 0.), (100., 100.), (0., 100.)]).unwrap()
    }

    #[test]
    fn interior_points_are_inside() {
        let square = square();
        assert!(square.contains(Point::new(50., 50.)));
        assert!(square.contains(Point::new(0.5, 99.5)));
        assert!(!square.contains(Point::new(150., 50.)));
    }

    #[test]
    fn boundary_points_are_outside() {
        let square = square();
        assert!(!square.contains(Point::new(0., 50.)));
        assert!(!square.contains(Point::new(50., 100.)));
        assert!(!square.contains(Point::new(100., 100.)));

        let triangle = poly(&[(0., 0.), (100., 0.), (0., 100.)]).unwrap();
        assert!(!triangle.contains(Point::new(50., 50.)));
        assert!(triangle.contains(Point::new(20., 20.)));
    }

    #[test]
    fn concave_polygon_excludes_notch() {
        let l_shape = poly(&[
            (0., 0.),
            (100., 0.),
            (100., 40.),
            (40., 40.),
            (40., 100.),
            (0., 100.),
        ])
        .unwrap();
        assert!(l_shape.contains(Point::new(20., 80.)));
        assert!(l_shape.contains(Point::new(80., 20.)));
        assert!(!l_shape.contains(Point::new(80., 80.)));
    }

    #[test]
    fn invalid_polygons_are_rejected() {
        assert_eq!(
            poly(&[(0., 0.), (1., 1.)]),
            Err(PolygonError::TooFewVertices(2))
        );
        assert_eq!(
            poly(&[(0., 0.), (1., f32::NAN), (2., 0.)]),
            Err(PolygonError::NonFinite(1))
        );
        assert_eq!(
            poly(&[(0., 0.), (1., 1.), (2., 2.)]),
            Err(PolygonError::ZeroArea)
        );
        assert!(matches!(
            poly(&[(0., 0.), (100., 100.), (100., 0.), (0., 50.)]),
            Err(PolygonError::SelfIntersecting(_, _))
        ));
    }

    #[test]
    fn closed_rings_and_repeated_vertices_are_normalized() {
        let closed = poly(&[(0., 0.), (100., 0.), (100., 100.), (0., 100.), (0., 0.)]).unwrap();
        assert_eq!(closed, square());
        assert_eq!(closed.vertices().len(), 4);

        let stuttered = poly(&[
            (0., 0.),
            (100., 0.),
            (100., 0.),
            (100., 100.),
            (0., 100.),
            (0., 100.),
            (0., 0.),
        ])
        .unwrap();
        assert_eq!(stuttered.vertices(), square().vertices());
        assert_eq!(stuttered.area(), 10_000.0);

        // Closing a two-point ring does not make it a polygon.
        assert_eq!(
            poly(&[(0., 0.), (5., 5.), (0., 0.)]),
            Err(PolygonError::TooFewVertices(2))
        );
    }

    #[test]
    fn serializes_as_vertex_list() {
        let json = serde_json::to_value(square()).unwrap();
        assert_eq!(json[2], serde_json::json!({"x": 100.0, "y": 100.0}));
        let parsed: Result<Polygon, _> =
            serde_json::from_str(r#"[{"x": 0, "y": 0}, {"x": 1, "y": 1}]"#);
        assert!(parsed.is_err());
    }
}
