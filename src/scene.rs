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

//! Owner of the loaded cloud and everything derived from it.

use crate::colormap::ColorMapper;
use crate::config::Config;
use crate::errors::*;
use crate::line_engine::LineEngine;
use crate::lod::{LodBuilder, LodPyramid};
use crate::measure::{self, Region};
use crate::notice::{Notice, NoticeQueue};
use crate::processing::{self, PreprocessOptions};
use crate::projector::{Projector, Viewport};
use crate::rasterizer::{Rasterizer, RenderOptions, RenderStats};
use crate::read_write::{self, Metadata, ReadOptions};
use crate::spatial_index::SpatialIndex;
use crate::{Point, PointCloud};
use image::RgbaImage;
use std::path::Path;

/// Ties the pipeline together: the cloud, its spatial index and LOD pyramid, the view, colour
/// mapping, the last rendered frame and the annotations. Replacing the cloud swaps all derived
/// data at once; appending invalidates the index and pyramid until they are asked for again.
#[derive(Debug)]
pub struct Scene {
    config: Config,
    cloud: PointCloud,
    metadata: Option<Metadata>,
    index: Option<SpatialIndex>,
    lod: Option<LodPyramid>,
    projector: Projector,
    mapper: ColorMapper,
    rasterizer: Rasterizer,
    engine: LineEngine,
    notices: NoticeQueue,
}

impl Scene {
    pub fn new(config: Config, viewport: Viewport) -> Self {
        let rasterizer = Rasterizer::new(RenderOptions {
            max_render_points: config.max_render_points as usize,
            ..Default::default()
        });
        let engine = LineEngine::from_config(&config);
        Scene {
            config,
            cloud: PointCloud::default(),
            metadata: None,
            index: None,
            lod: None,
            projector: Projector::new(viewport),
            mapper: ColorMapper::new(),
            rasterizer,
            engine,
            notices: NoticeQueue::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn projector_mut(&mut self) -> &mut Projector {
        &mut self.projector
    }

    pub fn mapper(&self) -> &ColorMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut ColorMapper {
        &mut self.mapper
    }

    pub fn rasterizer(&self) -> &Rasterizer {
        &self.rasterizer
    }

    pub fn rasterizer_mut(&mut self) -> &mut Rasterizer {
        &mut self.rasterizer
    }

    pub fn engine(&self) -> &LineEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut LineEngine {
        &mut self.engine
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn has_lod(&self) -> bool {
        self.lod.is_some()
    }

    /// Decodes 'path' and replaces the current cloud with it. On error, including cancellation,
    /// the current cloud stays.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, options: &mut ReadOptions) -> Result<()> {
        let path = path.as_ref();
        let (metadata, cloud) = read_write::read_with_metadata(path, options)?;
        if metadata.large_coordinates {
            self.notices.warn(format!(
                "{} has very large coordinates, consider shifting it to a local origin",
                path.display()
            ));
        }
        self.replace_cloud(cloud);
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Swaps in a new cloud together with a freshly built index and pyramid.
    pub fn replace_cloud(&mut self, cloud: PointCloud) {
        let index = SpatialIndex::new(cloud.positions());
        let lod = self.lod_builder().build(&cloud, Some(&index));
        self.cloud = cloud;
        self.index = Some(index);
        self.lod = Some(lod);
        self.metadata = None;
        self.rasterizer.clear();
        self.projector.reset();
        if let Some(bbox) = self.cloud.bounding_box() {
            self.projector.update_auto_bounds(bbox);
        }
        self.mapper.auto_range(self.cloud.points());
        tracing::info!("scene holds {} points", self.cloud.len());
    }

    /// Adds points to the cloud. The index and pyramid are dropped and rebuilt on demand.
    pub fn append(&mut self, points: impl IntoIterator<Item = Point>) {
        let before = self.cloud.len();
        self.cloud.extend(points);
        if self.cloud.len() == before {
            return;
        }
        self.index = None;
        self.lod = None;
        self.mapper.clear_cache();
        if let Some(bbox) = self.cloud.bounding_box() {
            self.projector.update_auto_bounds(bbox);
        }
        tracing::debug!("appended {} points", self.cloud.len() - before);
    }

    fn lod_builder(&self) -> LodBuilder {
        LodBuilder::new(self.config.default_lod_strategy, self.config.voxel_size)
    }

    pub fn index(&mut self) -> &SpatialIndex {
        let cloud = &self.cloud;
        self.index
            .get_or_insert_with(|| SpatialIndex::new(cloud.positions()))
    }

    pub fn lod(&mut self) -> &LodPyramid {
        let builder = self.lod_builder();
        let cloud = &self.cloud;
        let index = &mut self.index;
        self.lod.get_or_insert_with(|| {
            let index = index.get_or_insert_with(|| SpatialIndex::new(cloud.positions()));
            builder.build(cloud, Some(index))
        })
    }

    /// Runs outlier removal and downsampling as configured and replaces the cloud with the result.
    pub fn preprocess(&mut self, options: &PreprocessOptions) -> Result<()> {
        let cloud = processing::preprocess(&self.cloud, options)?;
        self.replace_cloud(cloud);
        Ok(())
    }

    pub fn default_preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions::from(&self.config)
    }

    /// Renders the full cloud with the current view. The rasteriser decimates large inputs.
    pub fn render(&mut self) -> Result<&RgbaImage> {
        let view = *self.projector.state();
        self.rasterizer
            .render(self.cloud.points(), &view, &mut self.mapper)
    }

    /// Renders one level of the pyramid instead of the full cloud.
    pub fn render_level(&mut self, level: usize) -> Result<&RgbaImage> {
        let view = *self.projector.state();
        self.lod();
        let points = match self.lod.as_ref().and_then(|lod| lod.level(level)) {
            Some(lod_level) => lod_level.cloud.points(),
            None => {
                return Err(ErrorKind::InvalidConfig(format!("no LOD level {}", level)).into())
            }
        };
        self.rasterizer.render(points, &view, &mut self.mapper)
    }

    pub fn render_stats(&self) -> &RenderStats {
        self.rasterizer.stats()
    }

    /// Indices of the cloud's points inside a region of the viewport.
    pub fn select_points(&self, region: &Region) -> Result<Vec<usize>> {
        let view = self.projector.view()?;
        Ok(measure::select_points(self.cloud.points(), view, region))
    }

    /// Forgets the cloud, every derived cache, the view bounds and the annotations.
    pub fn clear_all(&mut self) {
        self.cloud = PointCloud::default();
        self.metadata = None;
        self.index = None;
        self.lod = None;
        self.projector.reset();
        self.mapper.clear_cache();
        self.rasterizer.clear();
        self.engine.clear_all();
        self.notices.info("cleared the scene");
    }

    /// Notices of the scene and the line engine, oldest first within each.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut notices = self.notices.drain();
        notices.extend(self.engine.drain_notices());
        notices
    }
}
