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

use crate::errors::*;
use crate::lod::LodStrategy;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration handed to the core at construction. It is never mutated afterwards; persisting
/// it is up to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// Hard cap for points-mode rasterisation.
    pub max_render_points: u32,
    /// Base voxel edge for Voxel LOD and downsampling.
    pub voxel_size: f32,
    pub outlier_k: u32,
    pub outlier_std_dev_threshold: f32,
    #[serde(rename = "defaultLODStrategy")]
    pub default_lod_strategy: LodStrategy,
    pub selection_tolerance_px: f32,
    pub endpoint_tolerance_px: f32,
    pub min_segment_length: f32,
    pub polygon_min_area: f32,
    pub endpoint_equality_eps: f32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_render_points: 500_000,
            voxel_size: 0.1,
            outlier_k: 20,
            outlier_std_dev_threshold: 2.0,
            default_lod_strategy: LodStrategy::Voxel,
            selection_tolerance_px: 5.0,
            endpoint_tolerance_px: 8.0,
            min_segment_length: 1e-3,
            polygon_min_area: 1e-2,
            endpoint_equality_eps: 1e-3,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::from(ErrorKind::InvalidConfig(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("voxelSize", self.voxel_size),
            ("selectionTolerancePx", self.selection_tolerance_px),
            ("endpointTolerancePx", self.endpoint_tolerance_px),
            ("minSegmentLength", self.min_segment_length),
            ("endpointEqualityEps", self.endpoint_equality_eps),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.) {
                return Err(ErrorKind::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                ))
                .into());
            }
        }
        if !(self.polygon_min_area.is_finite() && self.polygon_min_area >= 0.) {
            return Err(ErrorKind::InvalidConfig(format!(
                "polygonMinArea must not be negative, got {}",
                self.polygon_min_area
            ))
            .into());
        }
        if !(self.outlier_std_dev_threshold.is_finite() && self.outlier_std_dev_threshold >= 0.) {
            return Err(ErrorKind::InvalidConfig(format!(
                "outlierStdDevThreshold must not be negative, got {}",
                self.outlier_std_dev_threshold
            ))
            .into());
        }
        if self.outlier_k == 0 {
            return Err(ErrorKind::InvalidConfig("outlierK must be at least 1".into()).into());
        }
        if self.max_render_points == 0 {
            return Err(
                ErrorKind::InvalidConfig("maxRenderPoints must be at least 1".into()).into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = Config::from_json_str(r#"{"voxelSize": 0.5, "defaultLODStrategy": "Random"}"#)
            .unwrap();
        assert_eq!(0.5, config.voxel_size);
        assert_eq!(LodStrategy::Random, config.default_lod_strategy);
        assert_eq!(500_000, config.max_render_points);
        assert_eq!(20, config.outlier_k);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = Config::from_json_str(r#"{"voxelSize": 0.5, "renderThreads": 4}"#).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidConfig(detail) => assert!(detail.contains("renderThreads")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_json_str(r#"{"voxelSize": 0}"#).is_err());
        assert!(Config::from_json_str(r#"{"outlierK": 0}"#).is_err());
    }

    #[test]
    fn test_serialized_defaults_load_back() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"maxRenderPoints\":500000"));
        assert!(json.contains("\"defaultLODStrategy\":\"Voxel\""));
        assert_eq!(Config::default(), Config::from_json_str(&json).unwrap());
    }
}
