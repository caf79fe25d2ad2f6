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
use crate::colormap::ColorMapper;
use crate::errors::*;
use crate::projector::ViewState;
use crate::Point;
use image::{ImageBuffer, Luma, Pixel, RgbaImage};
use nalgebra::Point2;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Density fractions at which contour mode draws iso-lines.
pub const CONTOUR_LEVELS: [f32; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];
/// Standard deviation of the heatmap kernel in pixels.
pub const HEATMAP_SIGMA: f32 = 1.5;
/// Smoothed densities below this fraction of the maximum stay background in heatmap mode.
const HEATMAP_CUTOFF: f32 = 1e-3;

type DensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    Points,
    Density,
    Contour,
    Heatmap,
}

impl FromStr for RenderMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "points" => Ok(RenderMode::Points),
            "density" => Ok(RenderMode::Density),
            "contour" => Ok(RenderMode::Contour),
            "heatmap" => Ok(RenderMode::Heatmap),
            other => Err(ErrorKind::InvalidConfig(format!("unknown render mode '{}'", other)).into()),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub mode: RenderMode,
    /// Disc diameter in pixels for points mode.
    pub point_size: f32,
    /// Points mode samples the input uniformly down to this many points.
    pub max_render_points: usize,
    pub background: Color<u8>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            mode: RenderMode::Points,
            point_size: 2.,
            max_render_points: 500_000,
            background: Color {
                red: 0,
                green: 0,
                blue: 0,
                alpha: 0,
            },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderStats {
    pub input_points: usize,
    pub rendered_points: usize,
    pub culled_points: usize,
    /// Fraction of the input that was rasterised, 1 unless the input was decimated.
    pub decimation_ratio: f32,
}

impl RenderStats {
    pub fn was_decimated(&self) -> bool {
        self.decimation_ratio < 1.
    }
}

/// 'count' indices spread evenly over 0..len, in ascending order.
pub fn uniform_sample(len: usize, count: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    if count >= len {
        return (0..len).collect();
    }
    (0..count)
        .map(|i| (i as u64 * len as u64 / count as u64) as usize)
        .collect()
}

fn blank(view: &ViewState, background: Color<u8>) -> RgbaImage {
    let width = view.viewport.width.max(0) as u32;
    let height = view.viewport.height.max(0) as u32;
    ImageBuffer::from_pixel(width, height, background.to_rgba())
}

fn pixel_of(screen: &Point2<f32>) -> (i64, i64) {
    (screen.x.floor() as i64, screen.y.floor() as i64)
}

fn blend(image: &mut RgbaImage, x: i64, y: i64, color: Color<u8>) {
    if x < 0 || y < 0 || x >= i64::from(image.width()) || y >= i64::from(image.height()) {
        return;
    }
    let pixel = image.get_pixel_mut(x as u32, y as u32);
    if color.alpha == 255 {
        *pixel = color.to_rgba();
    } else {
        pixel.blend(&color.to_rgba());
    }
}

/// Every pixel whose centre lies within 'radius' of 'center', plus the pixel containing it.
fn draw_disc(image: &mut RgbaImage, center: &Point2<f32>, radius: f32, color: Color<u8>) {
    let (cx, cy) = pixel_of(center);
    blend(image, cx, cy, color);
    let reach = radius.ceil() as i64;
    let r2 = radius * radius;
    for y in (cy - reach)..=(cy + reach) {
        for x in (cx - reach)..=(cx + reach) {
            if x == cx && y == cy {
                continue;
            }
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            if dx * dx + dy * dy <= r2 {
                blend(image, x, y, color);
            }
        }
    }
}

/// Rasterises point batches into an RGBA buffer of viewport size.
#[derive(Debug)]
pub struct Rasterizer {
    options: RenderOptions,
    image: RgbaImage,
    stats: RenderStats,
}

impl Rasterizer {
    pub fn new(options: RenderOptions) -> Self {
        Rasterizer {
            options,
            image: RgbaImage::new(0, 0),
            stats: RenderStats::default(),
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        self.options.mode = mode;
    }

    pub fn set_point_size(&mut self, point_size: f32) {
        self.options.point_size = point_size.max(0.);
    }

    pub fn set_background(&mut self, background: Color<u8>) {
        self.options.background = background;
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Drops the last frame.
    pub fn clear(&mut self) {
        self.image = RgbaImage::new(0, 0);
        self.stats = RenderStats::default();
    }

    /// Renders a new frame. On error the previous frame is kept.
    pub fn render(
        &mut self,
        points: &[Point],
        view: &ViewState,
        mapper: &mut ColorMapper,
    ) -> Result<&RgbaImage> {
        let mut image = blank(view, self.options.background);
        let stats = render_into(&mut image, points, view, mapper, &self.options)?;
        self.image = image;
        self.stats = stats;
        Ok(&self.image)
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image
            .save_with_format(path.as_ref(), image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Renders 'points' into a host supplied buffer, which must match the viewport size. An empty
/// input only clears the buffer and does not need a usable view.
pub fn render_into(
    image: &mut RgbaImage,
    points: &[Point],
    view: &ViewState,
    mapper: &mut ColorMapper,
    options: &RenderOptions,
) -> Result<RenderStats> {
    let background = options.background.to_rgba();
    if points.is_empty() {
        for pixel in image.pixels_mut() {
            *pixel = background;
        }
        return Ok(RenderStats {
            decimation_ratio: 1.,
            ..Default::default()
        });
    }
    view.validate()?;
    if image.width() as i64 != i64::from(view.viewport.width)
        || image.height() as i64 != i64::from(view.viewport.height)
    {
        return Err(geometry_error(
            GeometryErrorKind::InvalidViewState,
            format!(
                "buffer is {}x{} but the viewport is {}x{}",
                image.width(),
                image.height(),
                view.viewport.width,
                view.viewport.height
            ),
        ));
    }
    for pixel in image.pixels_mut() {
        *pixel = background;
    }

    let mut stats = RenderStats {
        input_points: points.len(),
        decimation_ratio: 1.,
        ..Default::default()
    };
    match options.mode {
        RenderMode::Points => {
            // Too many points are never an error here: the input is sampled down to the cap.
            let sample = if points.len() > options.max_render_points {
                tracing::warn!(
                    "{} points exceed the render cap of {}, sampling uniformly",
                    points.len(),
                    options.max_render_points
                );
                Some(uniform_sample(points.len(), options.max_render_points))
            } else {
                None
            };
            if let Some(sample) = &sample {
                stats.decimation_ratio = sample.len() as f32 / points.len() as f32;
            }
            let radius = options.point_size / 2.;
            let mut draw = |point: &Point| {
                let screen = view.world_to_screen(&point.position);
                if !view.viewport.contains(&screen) {
                    stats.culled_points += 1;
                    return;
                }
                let color = mapper.color_for_point(point);
                draw_disc(image, &screen, radius, color);
                stats.rendered_points += 1;
            };
            match &sample {
                Some(sample) => sample.iter().for_each(|&i| draw(&points[i])),
                None => points.iter().for_each(|p| draw(p)),
            }
        }
        RenderMode::Density | RenderMode::Contour | RenderMode::Heatmap => {
            let mut density = histogram(points, view, &mut stats);
            if options.mode == RenderMode::Heatmap {
                density = gaussian_blur(&density, HEATMAP_SIGMA);
            }
            log_normalize(&mut density);
            match options.mode {
                RenderMode::Contour => draw_contours(image, &density, mapper),
                RenderMode::Heatmap => draw_density(image, &density, mapper, HEATMAP_CUTOFF),
                _ => draw_density(image, &density, mapper, 0.),
            }
        }
    }
    tracing::debug!(
        "rendered {} of {} points in {} mode ({} culled)",
        stats.rendered_points,
        stats.input_points,
        options.mode,
        stats.culled_points
    );
    Ok(stats)
}

/// Point counts per pixel.
fn histogram(points: &[Point], view: &ViewState, stats: &mut RenderStats) -> DensityImage {
    let width = view.viewport.width as u32;
    let height = view.viewport.height as u32;
    let mut counts = vec![0u32; width as usize * height as usize];
    for point in points {
        let screen = view.world_to_screen(&point.position);
        if !view.viewport.contains(&screen) {
            stats.culled_points += 1;
            continue;
        }
        let (x, y) = pixel_of(&screen);
        counts[y as usize * width as usize + x as usize] += 1;
        stats.rendered_points += 1;
    }
    let data = counts.into_iter().map(|c| c as f32).collect();
    // The vector has exactly width * height entries.
    ImageBuffer::from_raw(width, height, data).unwrap_or_else(|| ImageBuffer::new(width, height))
}

/// Separable Gaussian with a 3 sigma support. Samples outside the image count as empty.
fn gaussian_blur(density: &DensityImage, sigma: f32) -> DensityImage {
    let radius = (3. * sigma).ceil() as i64;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2. * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    let (width, height) = density.dimensions();
    let pass = |src: &DensityImage, horizontal: bool| -> DensityImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let mut acc = 0.;
            for (k, weight) in kernel.iter().enumerate() {
                let offset = k as i64 - radius;
                let (sx, sy) = if horizontal {
                    (i64::from(x) + offset, i64::from(y))
                } else {
                    (i64::from(x), i64::from(y) + offset)
                };
                if sx >= 0 && sy >= 0 && sx < i64::from(width) && sy < i64::from(height) {
                    acc += weight * src.get_pixel(sx as u32, sy as u32).0[0];
                }
            }
            Luma([acc / sum])
        })
    };
    let horizontal = pass(density, true);
    pass(&horizontal, false)
}

/// Maps counts to ln(1 + c) / ln(1 + max), so a single hit stays visible next to dense pixels.
fn log_normalize(density: &mut DensityImage) {
    let max = density.pixels().map(|p| p.0[0]).fold(0f32, f32::max);
    if max <= 0. {
        return;
    }
    let norm = (1. + max).ln();
    for pixel in density.pixels_mut() {
        pixel.0[0] = (1. + pixel.0[0].max(0.)).ln() / norm;
    }
}

fn value_in_domain(mapper: &ColorMapper, t: f32) -> f32 {
    let (min, max) = mapper.domain();
    min + t * (max - min)
}

fn draw_density(image: &mut RgbaImage, density: &DensityImage, mapper: &mut ColorMapper, cutoff: f32) {
    for (x, y, d) in density.enumerate_pixels() {
        let d = d.0[0];
        if d <= cutoff {
            continue;
        }
        let value = value_in_domain(mapper, d);
        let color = mapper.color_for_value(value);
        blend(image, i64::from(x), i64::from(y), color);
    }
}

/// A pixel lies on the iso-line for 'level' if it reaches the level and a 4-neighbour does not.
fn draw_contours(image: &mut RgbaImage, density: &DensityImage, mapper: &mut ColorMapper) {
    let (width, height) = density.dimensions();
    let at = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
            0.
        } else {
            density.get_pixel(x as u32, y as u32).0[0]
        }
    };
    for &level in CONTOUR_LEVELS.iter() {
        let value = value_in_domain(mapper, level);
        let color = mapper.color_for_value(value);
        for y in 0..i64::from(height) {
            for x in 0..i64::from(width) {
                if at(x, y) < level {
                    continue;
                }
                let edge = [(1, 0), (-1, 0), (0, 1), (0, -1)]
                    .iter()
                    .any(|&(dx, dy)| at(x + dx, y + dy) < level);
                if edge {
                    blend(image, x, y, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rect;
    use crate::projector::Viewport;
    use approx::assert_relative_eq;
    use tempdir::TempDir;

    fn view() -> ViewState {
        ViewState::new(Rect::new(0., 0., 10., 10.), Viewport::new(10, 10))
    }

    #[test]
    fn test_points_mode_plots_and_culls() {
        let mut rasterizer = Rasterizer::new(RenderOptions {
            point_size: 1.,
            ..Default::default()
        });
        let mut mapper = ColorMapper::new();
        let points = vec![
            Point::new(2.5, 3.5, 0.),
            Point::new(7.5, 7.5, 1.),
            Point::new(-3., 4., 0.),
        ];
        let image = rasterizer.render(&points, &view(), &mut mapper).unwrap();
        assert_eq!((10, 10), image.dimensions());
        assert_eq!(Color::rgb(0, 0, 255).to_rgba(), *image.get_pixel(2, 3));
        assert_eq!(Color::rgb(255, 0, 0).to_rgba(), *image.get_pixel(7, 7));
        assert_eq!(
            rasterizer.options().background.to_rgba(),
            *rasterizer.image().get_pixel(0, 0)
        );
        let stats = rasterizer.stats();
        assert_eq!(3, stats.input_points);
        assert_eq!(2, stats.rendered_points);
        assert_eq!(1, stats.culled_points);
        assert!(!stats.was_decimated());
    }

    #[test]
    fn test_painter_order_last_point_wins() {
        let mut rasterizer = Rasterizer::new(RenderOptions::default());
        let mut mapper = ColorMapper::new();
        let points = vec![Point::new(5.5, 5.5, 1.), Point::new(5.5, 5.5, 0.)];
        let image = rasterizer.render(&points, &view(), &mut mapper).unwrap();
        assert_eq!(Color::rgb(0, 0, 255).to_rgba(), *image.get_pixel(5, 5));
    }

    #[test]
    fn test_decimation_is_recorded() {
        let mut rasterizer = Rasterizer::new(RenderOptions {
            max_render_points: 10,
            ..Default::default()
        });
        let mut mapper = ColorMapper::new();
        let points: Vec<Point> = (0..40)
            .map(|i| Point::new((i % 10) as f32 + 0.5, (i / 10) as f32 + 0.5, 0.))
            .collect();
        rasterizer.render(&points, &view(), &mut mapper).unwrap();
        let stats = rasterizer.stats();
        assert_eq!(40, stats.input_points);
        assert_eq!(10, stats.rendered_points);
        assert_eq!(0.25, stats.decimation_ratio);
        assert_eq!(vec![0, 4, 8], uniform_sample(12, 3));
    }

    #[test]
    fn test_invalid_view_keeps_previous_frame() {
        let mut rasterizer = Rasterizer::new(RenderOptions::default());
        let mut mapper = ColorMapper::new();
        let points = vec![Point::new(1., 1., 0.)];
        rasterizer.render(&points, &view(), &mut mapper).unwrap();
        let bad = ViewState::new(Rect::new(0., 0., 0., 10.), Viewport::new(10, 10));
        assert!(rasterizer.render(&points, &bad, &mut mapper).is_err());
        assert_eq!((10, 10), rasterizer.image().dimensions());
        assert_eq!(1, rasterizer.stats().rendered_points);
    }

    #[test]
    fn test_empty_input_renders_background_without_view() {
        let mut rasterizer = Rasterizer::new(RenderOptions::default());
        let mut mapper = ColorMapper::new();
        let image = rasterizer
            .render(&[], &ViewState::default(), &mut mapper)
            .unwrap();
        assert_eq!((0, 0), image.dimensions());
    }

    #[test]
    fn test_density_modes() {
        let mut mapper = ColorMapper::new();
        let mut points = vec![Point::new(2.5, 2.5, 0.); 9];
        points.push(Point::new(7.5, 7.5, 0.));
        let background = RenderOptions::default().background.to_rgba();

        let mut density = Rasterizer::new(RenderOptions {
            mode: RenderMode::Density,
            ..Default::default()
        });
        let image = density.render(&points, &view(), &mut mapper).unwrap();
        // Densest pixel maps to the top of the scheme.
        assert_eq!(Color::rgb(255, 0, 0).to_rgba(), *image.get_pixel(2, 2));
        assert_ne!(background, *image.get_pixel(7, 7));
        assert_eq!(background, *image.get_pixel(5, 5));

        let mut heatmap = Rasterizer::new(RenderOptions {
            mode: RenderMode::Heatmap,
            ..Default::default()
        });
        let image = heatmap.render(&points, &view(), &mut mapper).unwrap();
        assert_ne!(background, *image.get_pixel(3, 2));

        let mut contour = Rasterizer::new(RenderOptions {
            mode: RenderMode::Contour,
            ..Default::default()
        });
        let image = contour.render(&points, &view(), &mut mapper).unwrap();
        assert_ne!(background, *image.get_pixel(2, 2));
        assert_eq!(background, *image.get_pixel(5, 5));
    }

    #[test]
    fn test_log_scale_keeps_sparse_pixels() {
        let mut points = vec![Point::new(2.5, 2.5, 0.); 1000];
        points.push(Point::new(7.5, 7.5, 0.));
        let mut stats = RenderStats::default();
        let mut density = histogram(&points, &view(), &mut stats);
        assert_eq!(1000., density.get_pixel(2, 2).0[0]);
        assert_eq!(1., density.get_pixel(7, 7).0[0]);
        log_normalize(&mut density);
        assert_relative_eq!(1., density.get_pixel(2, 2).0[0], epsilon = 1e-6);
        assert_relative_eq!(
            2f32.ln() / 1001f32.ln(),
            density.get_pixel(7, 7).0[0],
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_save_png() {
        let dir = TempDir::new("rasterizer").unwrap();
        let path = dir.path().join("frame.png");
        let mut rasterizer = Rasterizer::new(RenderOptions::default());
        let mut mapper = ColorMapper::new();
        rasterizer
            .render(&[Point::new(5., 5., 0.)], &view(), &mut mapper)
            .unwrap();
        rasterizer.save_png(&path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba();
        assert_eq!((10, 10), loaded.dimensions());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(RenderMode::Heatmap, "heatmap".parse::<RenderMode>().unwrap());
        assert!("wireframe".parse::<RenderMode>().is_err());
    }
}
