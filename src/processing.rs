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

//! Cloud clean-up passes run before LOD building and rendering.

use crate::config::Config;
use crate::errors::*;
use crate::lod::voxel_centroids;
use crate::spatial_index::SpatialIndex;
use crate::PointCloud;

/// Indices of the points kept by statistical outlier removal: a point is dropped when the mean
/// distance to its 'k' nearest neighbours exceeds 'μ̄ + threshold·σ' over all points.
pub fn inlier_indices(index: &SpatialIndex, k: usize, std_dev_threshold: f32) -> Vec<usize> {
    let n = index.len();
    if n < 2 || k == 0 {
        return (0..n).collect();
    }
    let means: Vec<f64> = (0..n)
        .map(|i| f64::from(index.mean_neighbor_distance(i, k).unwrap_or(0.)))
        .collect();
    let mean = means.iter().sum::<f64>() / n as f64;
    let variance = means.iter().map(|m| (m - mean) * (m - mean)).sum::<f64>() / n as f64;
    let limit = mean + f64::from(std_dev_threshold) * variance.sqrt();
    (0..n).filter(|&i| means[i] <= limit).collect()
}

pub fn remove_outliers(
    cloud: &PointCloud,
    index: Option<&SpatialIndex>,
    k: usize,
    std_dev_threshold: f32,
) -> PointCloud {
    let kept = match index {
        Some(index) => inlier_indices(index, k, std_dev_threshold),
        None => inlier_indices(
            &SpatialIndex::new(cloud.positions()),
            k,
            std_dev_threshold,
        ),
    };
    tracing::debug!(
        "outlier removal kept {} of {} points",
        kept.len(),
        cloud.len()
    );
    cloud.select(&kept)
}

/// One centroid per occupied voxel, ordered by ascending voxel key.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32) -> Result<PointCloud> {
    if !(voxel_size.is_finite() && voxel_size > 0.) {
        return Err(ErrorKind::InvalidConfig(format!(
            "voxel size must be positive, got {}",
            voxel_size
        ))
        .into());
    }
    Ok(PointCloud::new(voxel_centroids(cloud.points(), voxel_size)))
}

/// Keeps the points with 'min_z <= z <= max_z', in input order.
pub fn filter_by_height(cloud: &PointCloud, min_z: f32, max_z: f32) -> PointCloud {
    let kept: Vec<usize> = cloud
        .positions()
        .enumerate()
        .filter(|(_, p)| p.z >= min_z && p.z <= max_z)
        .map(|(i, _)| i)
        .collect();
    cloud.select(&kept)
}

/// Splits the cloud into '(ground, rest)'. Ground is every point no higher than the lowest point
/// plus 'threshold'.
pub fn separate_ground(cloud: &PointCloud, threshold: f32) -> (PointCloud, PointCloud) {
    let min_z = match cloud.bounding_box() {
        Some(bbox) => bbox.min().z,
        None => return (PointCloud::default(), PointCloud::default()),
    };
    let (ground, rest): (Vec<usize>, Vec<usize>) =
        (0..cloud.len()).partition(|&i| cloud.points()[i].position.z <= min_z + threshold);
    (cloud.select(&ground), cloud.select(&rest))
}

#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub remove_outliers: bool,
    pub downsample: bool,
    pub voxel_size: f32,
    pub outlier_k: usize,
    pub outlier_std_dev_threshold: f32,
}

impl From<&Config> for PreprocessOptions {
    fn from(config: &Config) -> Self {
        PreprocessOptions {
            remove_outliers: true,
            downsample: true,
            voxel_size: config.voxel_size,
            outlier_k: config.outlier_k as usize,
            outlier_std_dev_threshold: config.outlier_std_dev_threshold,
        }
    }
}

/// Outlier removal followed by voxel downsampling, each optional.
pub fn preprocess(cloud: &PointCloud, options: &PreprocessOptions) -> Result<PointCloud> {
    let mut result = if options.remove_outliers {
        remove_outliers(
            cloud,
            None,
            options.outlier_k,
            options.outlier_std_dev_threshold,
        )
    } else {
        cloud.clone()
    };
    if options.downsample {
        result = voxel_downsample(&result, options.voxel_size)?;
    }
    tracing::info!("preprocessed {} points into {}", cloud.len(), result.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;

    fn cluster_with_outlier() -> PointCloud {
        let mut points: Vec<Point> = (0..100)
            .map(|i| Point::new((i % 10) as f32 * 0.1, (i / 10) as f32 * 0.1, 0.))
            .collect();
        points.insert(37, Point::new(25., 25., 3.));
        PointCloud::new(points)
    }

    #[test]
    fn test_remove_outliers_drops_isolated_point() {
        let cloud = cluster_with_outlier();
        let cleaned = remove_outliers(&cloud, None, 20, 2.);
        assert_eq!(100, cleaned.len());
        assert!(cleaned.positions().all(|p| p.x < 1.));
        // Input order is preserved.
        assert_eq!(cloud.points()[38], cleaned.points()[37]);
    }

    #[test]
    fn test_remove_outliers_is_deterministic() {
        let cloud = cluster_with_outlier();
        assert_eq!(
            remove_outliers(&cloud, None, 5, 1.),
            remove_outliers(&cloud, None, 5, 1.)
        );
    }

    #[test]
    fn test_voxel_downsample_rejects_bad_size() {
        assert!(voxel_downsample(&cluster_with_outlier(), 0.).is_err());
        assert_eq!(
            1,
            voxel_downsample(&PointCloud::new(vec![Point::new(0.1, 0.1, 0.1); 5]), 1.)
                .unwrap()
                .len()
        );
    }

    #[test]
    fn test_height_filter_and_ground() {
        let cloud = PointCloud::new(vec![
            Point::new(0., 0., 0.),
            Point::new(0., 0., 0.05),
            Point::new(0., 0., 1.5),
            Point::new(0., 0., 3.),
        ]);
        assert_eq!(2, filter_by_height(&cloud, 0.01, 2.).len());
        let (ground, rest) = separate_ground(&cloud, 0.1);
        assert_eq!(2, ground.len());
        assert_eq!(2, rest.len());
        assert_eq!(1.5, rest.points()[0].position.z);
    }
}
