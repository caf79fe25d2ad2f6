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

use crate::color::Color;
use crate::errors::*;
use crate::spatial_index::SpatialIndex;
use crate::{AttributeValue, Point, PointCloud, BLUE, GREEN, RED};
use fnv::FnvHashMap;
use nalgebra::Point3;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_LEVEL_COUNT: usize = 4;

/// Neighbours averaged for the local density estimate of 'Importance'.
const DENSITY_NEIGHBORS: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LodStrategy {
    Uniform,
    Voxel,
    Random,
    Importance,
}

#[derive(Debug, Clone)]
pub struct LodLevel {
    pub level: usize,
    pub cloud: PointCloud,
    /// |Lₖ| / |L₀|.
    pub reduction_ratio: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LodPyramid {
    levels: Vec<LodLevel>,
}

impl LodPyramid {
    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Option<&LodLevel> {
        self.levels.get(level)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The first level whose max distance is at least 'distance', else the coarsest one.
    pub fn select_level(&self, distance: f32) -> Option<usize> {
        if self.levels.is_empty() {
            return None;
        }
        Some(
            self.levels
                .iter()
                .position(|level| distance <= level.max_distance)
                .unwrap_or(self.levels.len() - 1),
        )
    }

    /// Replaces the per-level distance windows. Level k covers (thresholds[k-1], thresholds[k]];
    /// the coarsest level is open ended. One threshold per level boundary is required.
    pub fn set_distance_thresholds(&mut self, thresholds: &[f32]) -> Result<()> {
        let needed = self.levels.len().saturating_sub(1);
        if thresholds.len() < needed {
            return Err(ErrorKind::InvalidConfig(format!(
                "{} LOD levels need {} distance thresholds, got {}",
                self.levels.len(),
                needed,
                thresholds.len()
            ))
            .into());
        }
        if thresholds.iter().any(|t| !(*t >= 0.)) || thresholds.windows(2).any(|w| w[1] < w[0]) {
            return Err(ErrorKind::InvalidConfig(format!(
                "LOD distance thresholds must be non-negative and ascending: {:?}",
                thresholds
            ))
            .into());
        }
        for (k, level) in self.levels.iter_mut().enumerate() {
            level.min_distance = k
                .checked_sub(1)
                .and_then(|previous| thresholds.get(previous).copied())
                .unwrap_or(0.);
            level.max_distance = thresholds.get(k).copied().unwrap_or(std::f32::MAX);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LodBuilder {
    pub strategy: LodStrategy,
    pub level_count: usize,
    pub voxel_size: f32,
    pub seed: u64,
}

impl LodBuilder {
    pub fn new(strategy: LodStrategy, voxel_size: f32) -> Self {
        LodBuilder {
            strategy,
            level_count: DEFAULT_LEVEL_COUNT,
            voxel_size,
            seed: 0,
        }
    }

    pub fn with_level_count(mut self, level_count: usize) -> Self {
        self.level_count = level_count.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builds the pyramid. 'index' is only consulted by 'Importance'; one is built on the fly
    /// when it is needed and not supplied.
    pub fn build(&self, cloud: &PointCloud, index: Option<&SpatialIndex>) -> LodPyramid {
        let n = cloud.len();
        let densities = match self.strategy {
            LodStrategy::Importance => Some(match index {
                Some(index) => local_densities(index),
                None => local_densities(&SpatialIndex::new(cloud.positions())),
            }),
            _ => None,
        };
        let max_extent = cloud.bounding_box().map_or(0., |bbox| bbox.max_extent());

        let mut levels = Vec::with_capacity(self.level_count);
        for k in 0..self.level_count {
            let level_cloud = if k == 0 {
                cloud.clone()
            } else {
                match self.strategy {
                    LodStrategy::Uniform => cloud.select(&uniform_indices(n, k)),
                    LodStrategy::Voxel => PointCloud::new(voxel_centroids(
                        cloud.points(),
                        self.voxel_size * (1u64 << k) as f32,
                    )),
                    LodStrategy::Random => cloud.select(&random_indices(n, k, self.seed)),
                    LodStrategy::Importance => match densities.as_ref() {
                        Some(densities) => cloud.select(&importance_indices(densities, k)),
                        None => cloud.select(&uniform_indices(n, k)),
                    },
                }
            };
            let reduction_ratio = if n == 0 {
                1.
            } else {
                level_cloud.len() as f32 / n as f32
            };
            let threshold = |k: usize| max_extent * (1u64 << k) as f32;
            levels.push(LodLevel {
                level: k,
                reduction_ratio,
                min_distance: if k == 0 { 0. } else { threshold(k - 1) },
                max_distance: if k + 1 == self.level_count {
                    std::f32::MAX
                } else {
                    threshold(k)
                },
                cloud: level_cloud,
            });
        }
        tracing::debug!(
            "built {:?} LOD pyramid: {:?}",
            self.strategy,
            levels.iter().map(|l| l.cloud.len()).collect::<Vec<_>>()
        );
        LodPyramid { levels }
    }
}

fn fraction_count(n: usize, k: usize) -> usize {
    (n as f64 * 0.5f64.powi(k as i32)).floor() as usize
}

fn uniform_indices(n: usize, k: usize) -> Vec<usize> {
    (0..n).step_by(1 << k).collect()
}

fn random_indices(n: usize, k: usize, seed: u64) -> Vec<usize> {
    // Each level draws from its own stream so levels do not depend on each other.
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
    let mut indices = rand::seq::index::sample(&mut rng, n, fraction_count(n, k)).into_vec();
    indices.sort_unstable();
    indices
}

fn importance_indices(densities: &[f32], k: usize) -> Vec<usize> {
    let keep = fraction_count(densities.len(), k);
    let mut ranked: Vec<usize> = (0..densities.len()).collect();
    ranked.sort_by_key(|&i| (OrderedFloat(densities[i]), i));
    ranked.truncate(keep);
    ranked.sort_unstable();
    ranked
}

/// Points per unit length around each point: the inverse of the mean distance to its nearest
/// neighbours. Isolated points get density 0.
pub fn local_densities(index: &SpatialIndex) -> Vec<f32> {
    (0..index.len())
        .map(
            |i| match index.mean_neighbor_distance(i, DENSITY_NEIGHBORS) {
                Some(mean) if mean > 0. => 1. / mean,
                Some(_) => std::f32::MAX,
                None => 0.,
            },
        )
        .collect()
}

pub type VoxelKey = (i64, i64, i64);

pub fn voxel_key(p: &Point3<f32>, edge: f32) -> VoxelKey {
    (
        (p.x / edge).floor() as i64,
        (p.y / edge).floor() as i64,
        (p.z / edge).floor() as i64,
    )
}

/// Keeps the variant of 'template' so averaged attributes read back like the originals.
fn attribute_like(template: AttributeValue, value: f32) -> AttributeValue {
    match template {
        AttributeValue::U8(_) => AttributeValue::U8(value.round() as u8),
        AttributeValue::U16(_) => AttributeValue::U16(value.round() as u16),
        AttributeValue::U32(_) => AttributeValue::U32(value.round() as u32),
        AttributeValue::I32(_) => AttributeValue::I32(value.round() as i32),
        AttributeValue::F32(_) => AttributeValue::F32(value),
        AttributeValue::F64(_) => AttributeValue::F64(f64::from(value)),
    }
}

fn raw_color(point: &Point) -> Option<Color<f32>> {
    let [red, green, blue] = point.rgb()?;
    Some(Color {
        red: f32::from(red),
        green: f32::from(green),
        blue: f32::from(blue),
        alpha: 1.,
    })
}

/// One centroid per non-empty voxel of edge 'edge', in ascending key order. Attributes of the
/// first point that fell into each voxel are carried over, except the colour which is the mean
/// colour of the voxel when every point in it has one.
pub fn voxel_centroids(points: &[Point], edge: f32) -> Vec<Point> {
    let mut voxels: FnvHashMap<VoxelKey, Vec<usize>> = FnvHashMap::default();
    for (i, p) in points.iter().enumerate() {
        voxels
            .entry(voxel_key(&p.position, edge))
            .or_insert_with(Vec::new)
            .push(i);
    }
    let mut voxels: Vec<_> = voxels.into_iter().collect();
    voxels.sort_unstable_by_key(|(key, _)| *key);
    voxels
        .into_iter()
        .map(|(_, members)| {
            let count = members.len() as f64;
            let mut sum = [0f64; 3];
            for &i in &members {
                let p = &points[i].position;
                sum[0] += f64::from(p.x);
                sum[1] += f64::from(p.y);
                sum[2] += f64::from(p.z);
            }
            let first = &points[members[0]];
            let mut centroid = Point {
                position: Point3::new(
                    (sum[0] / count) as f32,
                    (sum[1] / count) as f32,
                    (sum[2] / count) as f32,
                ),
                attributes: first.attributes.clone(),
            };
            let colors: Option<Vec<Color<f32>>> =
                members.iter().map(|&i| raw_color(&points[i])).collect();
            if let Some(colors) = colors {
                let mean = colors.into_iter().sum::<Color<f32>>() / members.len() as f32;
                for (key, value) in &[(RED, mean.red), (GREEN, mean.green), (BLUE, mean.blue)] {
                    if let Some(template) = first.attribute(key) {
                        centroid
                            .attributes
                            .insert(key.to_string(), attribute_like(template, *value));
                    }
                }
            }
            centroid
        })
        .collect()
}
