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

use pbr::ProgressBar;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use wall_extraction::config::Config;
use wall_extraction::errors::*;
use wall_extraction::line_engine::LineEngine;
use wall_extraction::polygon::total_area;
use wall_extraction::projector::Viewport;
use wall_extraction::rasterizer::RenderMode;
use wall_extraction::read_write::{self, ReadOptions};
use wall_extraction::scene::Scene;

#[derive(StructOpt, Debug)]
#[structopt(name = "floorplan")]
enum Command {
    /// Prints format, point count, bounds and attributes of a point cloud.
    #[structopt(name = "info")]
    Info {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
    },

    /// Renders a top-down image of a point cloud.
    #[structopt(name = "render")]
    Render {
        #[structopt(parse(from_os_str))]
        input: PathBuf,

        /// PNG file to write.
        #[structopt(long = "out", parse(from_os_str))]
        out: PathBuf,

        /// One of points, density, contour or heatmap.
        #[structopt(long = "mode", default_value = "points")]
        mode: RenderMode,

        #[structopt(long = "width", default_value = "1024")]
        width: i32,

        #[structopt(long = "height", default_value = "1024")]
        height: i32,

        /// Color scheme: Height, Intensity, Classification or RGB.
        #[structopt(long = "scheme", default_value = "Height")]
        scheme: String,

        /// Disc diameter in pixels for points mode.
        #[structopt(long = "point_size", default_value = "2")]
        point_size: f32,

        /// Render this LOD level instead of the full cloud.
        #[structopt(long = "level")]
        level: Option<usize>,

        /// Remove outliers and downsample before rendering.
        #[structopt(long = "preprocess")]
        preprocess: bool,

        /// JSON configuration file.
        #[structopt(long = "config", parse(from_os_str))]
        config: Option<PathBuf>,
    },

    /// Extracts enclosed polygons from saved annotations and prints their areas.
    #[structopt(name = "polygons")]
    Polygons {
        #[structopt(parse(from_os_str))]
        annotations: PathBuf,

        #[structopt(long = "config", parse(from_os_str))]
        config: Option<PathBuf>,
    },
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn info(input: &Path) -> Result<()> {
    let metadata = read_write::read_metadata(input)?;
    println!("format:      {}", metadata.format);
    println!("points:      {}", metadata.point_count);
    if let Some(bbox) = &metadata.bounding_box {
        let (min, max) = (bbox.min(), bbox.max());
        println!(
            "bounds:      ({}, {}, {}) - ({}, {}, {})",
            min.x, min.y, min.z, max.x, max.y, max.z
        );
    }
    println!("attributes:  {}", metadata.attributes_present.join(", "));
    println!("coordinates: {:?}", metadata.coord_system);
    if metadata.large_coordinates {
        println!("warning:     coordinates are very large");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render(
    input: &Path,
    out: &Path,
    mode: RenderMode,
    viewport: Viewport,
    scheme: &str,
    point_size: f32,
    level: Option<usize>,
    preprocess: bool,
    config: Config,
) -> Result<()> {
    let mut scene = Scene::new(config, viewport);
    let mut progress_bar = ProgressBar::new(100);
    progress_bar.message(&format!("Reading {}: ", input.display()));
    let mut on_progress = |percent: u8| {
        progress_bar.set(u64::from(percent));
    };
    scene.load(input, &mut ReadOptions::default().with_progress(&mut on_progress))?;
    progress_bar.finish();

    if preprocess {
        let options = scene.default_preprocess_options();
        scene.preprocess(&options)?;
    }
    let points = scene.cloud().points().to_vec();
    let mapper = scene.mapper_mut();
    mapper.set_scheme(scheme)?;
    mapper.auto_range(&points);
    let rasterizer = scene.rasterizer_mut();
    rasterizer.set_mode(mode);
    rasterizer.set_point_size(point_size);
    match level {
        Some(level) => scene.render_level(level)?,
        None => scene.render()?,
    };
    let stats = *scene.render_stats();
    if stats.was_decimated() {
        tracing::warn!(
            "rendered a uniform sample of {:.1}% of the points",
            stats.decimation_ratio * 100.
        );
    }
    scene.rasterizer().save_png(out)?;
    for notice in scene.drain_notices() {
        println!("{}", notice);
    }
    println!(
        "wrote {} ({} of {} points, {} outside the view)",
        out.display(),
        stats.rendered_points,
        stats.input_points,
        stats.culled_points
    );
    Ok(())
}

fn polygons(annotations: &Path, config: Config) -> Result<()> {
    let mut engine = LineEngine::from_config(&config);
    engine.load(annotations)?;
    for notice in engine.drain_notices() {
        println!("{}", notice);
    }
    let polygons = engine.extract_polygons();
    for (i, polygon) in polygons.iter().enumerate() {
        println!(
            "polygon {}: {} vertices, area {:.4}{}, segments {:?}",
            i,
            polygon.vertices.len(),
            polygon.area,
            if polygon.auto_closed { " (auto-closed)" } else { "" },
            polygon.segment_ids
        );
    }
    println!("total area: {:.4}", total_area(&polygons));
    Ok(())
}

fn run() -> Result<()> {
    match Command::from_args() {
        Command::Info { input } => info(&input),
        Command::Render {
            input,
            out,
            mode,
            width,
            height,
            scheme,
            point_size,
            level,
            preprocess,
            config,
        } => render(
            &input,
            &out,
            mode,
            Viewport::new(width, height),
            &scheme,
            point_size,
            level,
            preprocess,
            load_config(&config)?,
        ),
        Command::Polygons {
            annotations,
            config,
        } => polygons(&annotations, load_config(&config)?),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
