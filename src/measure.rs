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

//! Measurements and point selection on the top-down view. Inputs are viewport pixels, results
//! are in world units.

use crate::math::{polygon_contains, shoelace_area, Rect};
use crate::projector::ViewState;
use crate::Point;
use nalgebra::Point2;

/// World distance in the xy plane between two pixels.
pub fn distance(view: &ViewState, a: &Point2<f32>, b: &Point2<f32>) -> f32 {
    (view.screen_to_world(b) - view.screen_to_world(a)).norm()
}

/// Length of a pixel path in world units.
pub fn path_length(view: &ViewState, path: &[Point2<f32>]) -> f32 {
    path.windows(2).map(|w| distance(view, &w[0], &w[1])).sum()
}

/// World area enclosed by a ring of pixels.
pub fn area(view: &ViewState, ring: &[Point2<f32>]) -> f64 {
    let world: Vec<Point2<f64>> = ring
        .iter()
        .map(|p| {
            let w = view.screen_to_world(p);
            Point2::new(f64::from(w.x), f64::from(w.y))
        })
        .collect();
    shoelace_area(&world)
}

/// The angle at 'vertex' between the rays to 'a' and 'b', in degrees within [0, 180]. None if
/// either ray has no length.
pub fn angle(view: &ViewState, a: &Point2<f32>, vertex: &Point2<f32>, b: &Point2<f32>) -> Option<f32> {
    let v = view.screen_to_world(vertex);
    let da = view.screen_to_world(a) - v;
    let db = view.screen_to_world(b) - v;
    let (na, nb) = (da.norm(), db.norm());
    if na <= std::f32::EPSILON || nb <= std::f32::EPSILON {
        return None;
    }
    let cos = (da.dot(&db) / (na * nb)).max(-1.).min(1.);
    Some(cos.acos().to_degrees())
}

/// An area of the viewport in pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// Spanned by two opposite corners.
    Rectangle(Point2<f32>, Point2<f32>),
    Circle { center: Point2<f32>, radius: f32 },
    Polygon(Vec<Point2<f32>>),
}

impl Region {
    pub fn contains(&self, p: &Point2<f32>) -> bool {
        match self {
            Region::Rectangle(a, b) => {
                let rect = Rect::from_min_max(
                    Point2::new(a.x.min(b.x), a.y.min(b.y)),
                    Point2::new(a.x.max(b.x), a.y.max(b.y)),
                );
                rect.contains(p)
            }
            Region::Circle { center, radius } => (p - center).norm() <= *radius,
            Region::Polygon(ring) => polygon_contains(ring, p),
        }
    }
}

/// Indices of the points whose projection falls into 'region', ascending.
pub fn select_points(points: &[Point], view: &ViewState, region: &Region) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, point)| region.contains(&view.world_to_screen(&point.position)))
        .map(|(i, _)| i)
        .collect()
}
