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

//! Closed regions traced through drawn wall segments, and their planar areas.

use crate::line_engine::LineSegment;
use crate::math::{polygon_contains, shoelace_area};
use fnv::FnvHashMap;
use nalgebra::Point2;
use serde_derive::{Deserialize, Serialize};

/// A closed region found by walking segments that share endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// The ring without a repeated first vertex.
    pub vertices: Vec<Point2<f32>>,
    pub segment_ids: Vec<i32>,
    /// Planar area of the xy projection.
    pub area: f64,
    /// True if the segments did not close the ring themselves.
    pub auto_closed: bool,
}

impl Polygon {
    pub fn contains(&self, p: &Point2<f32>) -> bool {
        polygon_contains(&self.vertices, p)
    }

    pub fn perimeter(&self) -> f64 {
        let n = self.vertices.len();
        (0..n)
            .map(|i| f64::from((self.vertices[(i + 1) % n] - self.vertices[i]).norm()))
            .sum()
    }
}

pub fn total_area(polygons: &[Polygon]) -> f64 {
    polygons.iter().map(|p| p.area).sum()
}

/// Snaps endpoints within 'eps' of each other to one node. Lookups go through a grid with cell
/// size 'eps', so only the 3x3 neighbourhood has to be searched.
struct NodeGrid {
    eps: f32,
    cells: FnvHashMap<(i64, i64), Vec<usize>>,
    nodes: Vec<Point2<f32>>,
}

impl NodeGrid {
    fn new(eps: f32) -> Self {
        NodeGrid {
            eps,
            cells: FnvHashMap::default(),
            nodes: Vec::new(),
        }
    }

    fn cell(&self, p: &Point2<f32>) -> (i64, i64) {
        (
            (p.x / self.eps).floor() as i64,
            (p.y / self.eps).floor() as i64,
        )
    }

    fn node(&mut self, p: Point2<f32>) -> usize {
        let (cx, cy) = self.cell(&p);
        let mut best: Option<(f32, usize)> = None;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(candidates) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &index in candidates {
                        let distance = (self.nodes[index] - p).norm();
                        if distance <= self.eps
                            && best.map_or(true, |(d, i)| (distance, index) < (d, i))
                        {
                            best = Some((distance, index));
                        }
                    }
                }
            }
        }
        if let Some((_, index)) = best {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(p);
        self.cells.entry((cx, cy)).or_insert_with(Vec::new).push(index);
        index
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PolygonExtractor {
    /// Endpoints closer than this are the same vertex.
    pub endpoint_eps: f32,
    /// Smaller polygons are dropped as noise.
    pub min_area: f64,
}

impl Default for PolygonExtractor {
    fn default() -> Self {
        PolygonExtractor::new(1e-3, 1e-2)
    }
}

impl PolygonExtractor {
    pub fn new(endpoint_eps: f32, min_area: f64) -> Self {
        PolygonExtractor {
            endpoint_eps,
            min_area,
        }
    }

    /// Walks the segments greedily in input order: each walk starts at the first unused segment
    /// and repeatedly takes the first unused segment touching its current end. There is no
    /// backtracking, so a ring that needs a later choice at a junction is not found.
    pub fn extract<'a, I>(&self, segments: I) -> Vec<Polygon>
    where
        I: IntoIterator<Item = &'a LineSegment>,
    {
        let mut grid = NodeGrid::new(self.endpoint_eps.max(std::f32::EPSILON));
        let mut edges: Vec<(i32, usize, usize)> = Vec::new();
        for segment in segments {
            let a = grid.node(Point2::new(segment.start.x, segment.start.y));
            let b = grid.node(Point2::new(segment.end.x, segment.end.y));
            if a != b {
                edges.push((segment.id, a, b));
            }
        }
        let mut incident: Vec<Vec<usize>> = vec![Vec::new(); grid.nodes.len()];
        for (index, &(_, a, b)) in edges.iter().enumerate() {
            incident[a].push(index);
            incident[b].push(index);
        }

        let mut used = vec![false; edges.len()];
        let mut polygons = Vec::new();
        for first in 0..edges.len() {
            if used[first] {
                continue;
            }
            used[first] = true;
            let (id, start, mut current) = edges[first];
            let mut path = vec![start, current];
            let mut segment_ids = vec![id];
            let mut closed = false;
            loop {
                if current == start {
                    closed = true;
                    path.pop();
                    break;
                }
                let next = incident[current].iter().cloned().find(|&e| !used[e]);
                let next = match next {
                    Some(next) => next,
                    None => break,
                };
                used[next] = true;
                let (id, a, b) = edges[next];
                current = if a == current { b } else { a };
                path.push(current);
                segment_ids.push(id);
            }
            if path.len() < 3 {
                continue;
            }
            let vertices: Vec<Point2<f32>> = path.iter().map(|&n| grid.nodes[n]).collect();
            let ring: Vec<Point2<f64>> = vertices
                .iter()
                .map(|v| Point2::new(f64::from(v.x), f64::from(v.y)))
                .collect();
            let area = shoelace_area(&ring);
            if area < self.min_area {
                tracing::debug!("dropping polygon of area {} from segments {:?}", area, segment_ids);
                continue;
            }
            polygons.push(Polygon {
                vertices,
                segment_ids,
                area,
                auto_closed: !closed,
            });
        }
        polygons
    }
}
