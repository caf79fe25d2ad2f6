// Copyright 2016 The Cartographer Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use nalgebra::{Point2, Vector2};

pub mod aabb;
pub mod rect;

pub use self::aabb::Aabb;
pub use self::rect::Rect;

pub fn clamp(value: f32, low: f32, high: f32) -> f32 {
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}

/// Planar area of a ring of vertices, `½·|Σ(xᵢ·yᵢ₊₁ − xᵢ₊₁·yᵢ)|`. The ring is implicitly closed;
/// a repeated first vertex at the end contributes nothing.
pub fn shoelace_area(ring: &[Point2<f64>]) -> f64 {
    if ring.len() < 3 {
        return 0.;
    }
    let mut twice_area = 0.;
    for (i, a) in ring.iter().enumerate() {
        let b = &ring[(i + 1) % ring.len()];
        twice_area += a.x * b.y - b.x * a.y;
    }
    twice_area.abs() / 2.
}

/// Distance from 'p' to the segment 'a'-'b' and the clamped parameter of the closest point.
pub fn point_segment_distance(p: &Point2<f32>, a: &Point2<f32>, b: &Point2<f32>) -> (f32, f32) {
    let ab: Vector2<f32> = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= std::f32::EPSILON {
        return ((p - a).norm(), 0.);
    }
    let t = clamp((p - a).dot(&ab) / len_sq, 0., 1.);
    let closest = a + ab * t;
    ((p - closest).norm(), t)
}

/// Even-odd rule containment test.
pub fn polygon_contains(polygon: &[Point2<f32>], p: &Point2<f32>) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (&polygon[i], &polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shoelace_unit_square() {
        let ring = [
            Point2::new(0., 0.),
            Point2::new(1., 0.),
            Point2::new(1., 1.),
            Point2::new(0., 1.),
        ];
        assert_relative_eq!(1., shoelace_area(&ring));
        let mut reversed = ring.to_vec();
        reversed.reverse();
        assert_relative_eq!(1., shoelace_area(&reversed));
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Point2::new(0., 0.);
        let b = Point2::new(10., 0.);
        let (d, t) = point_segment_distance(&Point2::new(5., 3.), &a, &b);
        assert_relative_eq!(3., d);
        assert_relative_eq!(0.5, t);
        let (d, t) = point_segment_distance(&Point2::new(-4., 3.), &a, &b);
        assert_relative_eq!(5., d);
        assert_relative_eq!(0., t);
    }

    #[test]
    fn test_polygon_contains() {
        let square = [
            Point2::new(0., 0.),
            Point2::new(4., 0.),
            Point2::new(4., 4.),
            Point2::new(0., 4.),
        ];
        assert!(polygon_contains(&square, &Point2::new(2., 2.)));
        assert!(!polygon_contains(&square, &Point2::new(5., 2.)));
    }
}
