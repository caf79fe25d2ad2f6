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

//! A static k-d tree over a point set. Queries are deterministic: equal distances are ordered
//! by the lower point index.

use crate::math::Aabb;
use nalgebra::Point3;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const LEAF_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    distance_squared: OrderedFloat<f32>,
    index: usize,
}

#[derive(Debug, Clone)]
struct Node {
    // Range into 'order'. Interior nodes split at 'begin + (end - begin) / 2'.
    begin: usize,
    end: usize,
    axis: usize,
    split: f32,
    children: Option<(usize, usize)>,
}

/// Immutable once built. Holds its own copy of the positions, so it never observes a later
/// mutation of the cloud it was built from.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    points: Vec<Point3<f32>>,
    order: Vec<usize>,
    nodes: Vec<Node>,
}

impl SpatialIndex {
    pub fn new<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f32>>,
    {
        let points: Vec<Point3<f32>> = points.into_iter().cloned().collect();
        let mut index = SpatialIndex {
            order: (0..points.len()).collect(),
            points,
            nodes: Vec::new(),
        };
        if !index.points.is_empty() {
            let len = index.points.len();
            index.build(0, len);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    fn build(&mut self, begin: usize, end: usize) -> usize {
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            begin,
            end,
            axis: 0,
            split: 0.,
            children: None,
        });
        if end - begin <= LEAF_SIZE {
            return node_id;
        }

        let axis = self.widest_axis(begin, end);
        let mid = begin + (end - begin) / 2;
        let points = &self.points;
        self.order[begin..end].sort_unstable_by(|&a, &b| {
            OrderedFloat(points[a][axis])
                .cmp(&OrderedFloat(points[b][axis]))
                .then(a.cmp(&b))
        });
        let split = self.points[self.order[mid]][axis];
        let left = self.build(begin, mid);
        let right = self.build(mid, end);
        let node = &mut self.nodes[node_id];
        node.axis = axis;
        node.split = split;
        node.children = Some((left, right));
        node_id
    }

    fn widest_axis(&self, begin: usize, end: usize) -> usize {
        let bbox = Aabb::from_points(self.order[begin..end].iter().map(|&i| &self.points[i]));
        match bbox {
            Some(bbox) => {
                let extent = bbox.extent();
                if extent.x >= extent.y && extent.x >= extent.z {
                    0
                } else if extent.y >= extent.z {
                    1
                } else {
                    2
                }
            }
            None => 0,
        }
    }

    /// The 'k' nearest points to 'p', sorted ascending by distance and then by index.
    pub fn knn(&self, p: &Point3<f32>, k: usize) -> Vec<usize> {
        if k == 0 || self.points.is_empty() {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.knn_recurse(0, p, k, &mut heap);
        let mut result = heap.into_sorted_vec();
        result.truncate(k);
        result.into_iter().map(|c| c.index).collect()
    }

    fn knn_recurse(
        &self,
        node_id: usize,
        p: &Point3<f32>,
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        let node = &self.nodes[node_id];
        match node.children {
            None => {
                for &index in &self.order[node.begin..node.end] {
                    let candidate = Candidate {
                        distance_squared: OrderedFloat((self.points[index] - p).norm_squared()),
                        index,
                    };
                    if heap.len() < k {
                        heap.push(candidate);
                    } else if heap.peek().map_or(false, |worst| candidate < *worst) {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
            Some((left, right)) => {
                let delta = p[node.axis] - node.split;
                let (near, far) = if delta < 0. {
                    (left, right)
                } else {
                    (right, left)
                };
                self.knn_recurse(near, p, k, heap);
                // Equal distances may still hide a lower index on the far side.
                let must_visit = heap.len() < k
                    || heap
                        .peek()
                        .map_or(true, |worst| delta * delta <= worst.distance_squared.0);
                if must_visit {
                    self.knn_recurse(far, p, k, heap);
                }
            }
        }
    }

    /// Indices of all points inside 'bbox' (inclusive), ascending.
    pub fn range(&self, bbox: &Aabb) -> Vec<usize> {
        let mut result = Vec::new();
        if !self.points.is_empty() {
            self.range_recurse(0, bbox, &mut result);
        }
        result.sort_unstable();
        result
    }

    fn range_recurse(&self, node_id: usize, bbox: &Aabb, result: &mut Vec<usize>) {
        let node = &self.nodes[node_id];
        match node.children {
            None => result.extend(
                self.order[node.begin..node.end]
                    .iter()
                    .filter(|&&i| bbox.contains(&self.points[i])),
            ),
            Some((left, right)) => {
                if bbox.min()[node.axis] <= node.split {
                    self.range_recurse(left, bbox, result);
                }
                if bbox.max()[node.axis] >= node.split {
                    self.range_recurse(right, bbox, result);
                }
            }
        }
    }

    /// Indices of all points within 'radius' of 'p', sorted by distance and then by index.
    pub fn radius(&self, p: &Point3<f32>, radius: f32) -> Vec<usize> {
        let bbox = Aabb::new(
            Point3::new(p.x - radius, p.y - radius, p.z - radius),
            Point3::new(p.x + radius, p.y + radius, p.z + radius),
        );
        let radius_squared = radius * radius;
        let mut candidates: Vec<Candidate> = self
            .range(&bbox)
            .into_iter()
            .map(|index| Candidate {
                distance_squared: OrderedFloat((self.points[index] - p).norm_squared()),
                index,
            })
            .filter(|c| c.distance_squared.0 <= radius_squared)
            .collect();
        candidates.sort_unstable_by(|a, b| match a.distance_squared.cmp(&b.distance_squared) {
            Ordering::Equal => a.index.cmp(&b.index),
            other => other,
        });
        candidates.into_iter().map(|c| c.index).collect()
    }

    /// Mean distance from point 'index' to its 'k' nearest neighbours, itself excluded. 'None'
    /// if the set has no other point.
    pub fn mean_neighbor_distance(&self, index: usize, k: usize) -> Option<f32> {
        let p = &self.points[index];
        let neighbors: Vec<usize> = self
            .knn(p, k + 1)
            .into_iter()
            .filter(|&i| i != index)
            .take(k)
            .collect();
        if neighbors.is_empty() {
            return None;
        }
        let sum: f32 = neighbors
            .iter()
            .map(|&i| (self.points[i] - p).norm())
            .sum();
        Some(sum / neighbors.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize) -> Vec<Point3<f32>> {
        let mut rng = StdRng::seed_from_u64(17);
        (0..n)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-10f32, 10f32),
                    rng.gen_range(-10f32, 10f32),
                    rng.gen_range(-1f32, 1f32),
                )
            })
            .collect()
    }

    fn brute_force_knn(points: &[Point3<f32>], p: &Point3<f32>, k: usize) -> Vec<usize> {
        let mut all: Vec<(OrderedFloat<f32>, usize)> = points
            .iter()
            .enumerate()
            .map(|(i, q)| (OrderedFloat((q - p).norm_squared()), i))
            .collect();
        all.sort();
        all.into_iter().take(k).map(|(_, i)| i).collect()
    }

    #[test]
    fn test_knn_matches_brute_force() {
        let points = random_points(500);
        let index = SpatialIndex::new(&points);
        for query in random_points(20).iter() {
            assert_eq!(brute_force_knn(&points, query, 7), index.knn(query, 7));
        }
    }

    #[test]
    fn test_knn_ties_prefer_lower_index() {
        let points: Vec<Point3<f32>> = (0..40)
            .map(|i| Point3::new((i % 2) as f32 * 2. - 1., 0., 0.))
            .collect();
        let index = SpatialIndex::new(&points);
        assert_eq!(vec![0, 1, 2, 3], index.knn(&Point3::origin(), 4));
    }

    #[test]
    fn test_range_is_ascending() {
        let points = random_points(300);
        let index = SpatialIndex::new(&points);
        let bbox = Aabb::new(Point3::new(-2., -3., -1.), Point3::new(4., 1., 1.));
        let expected: Vec<usize> = (0..points.len())
            .filter(|&i| bbox.contains(&points[i]))
            .collect();
        assert_eq!(expected, index.range(&bbox));
    }

    #[test]
    fn test_radius_sorted_by_distance() {
        let points = vec![
            Point3::new(3., 0., 0.),
            Point3::new(1., 0., 0.),
            Point3::new(0., 2., 0.),
            Point3::new(0., -1., 0.),
        ];
        let index = SpatialIndex::new(&points);
        assert_eq!(vec![1, 3, 2], index.radius(&Point3::origin(), 2.5));
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::new(Vec::<Point3<f32>>::new().iter());
        assert!(index.knn(&Point3::origin(), 3).is_empty());
        assert!(index.range(&Aabb::from_point(Point3::origin())).is_empty());
    }
}
