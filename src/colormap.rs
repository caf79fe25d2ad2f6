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

use crate::color::{self, Color};
use crate::errors::*;
use crate::math::clamp;
use crate::Point;
use fnv::FnvHashMap;
use image::RgbaImage;
use ordered_float::OrderedFloat;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HEIGHT: &str = "Height";
pub const INTENSITY: &str = "Intensity";
pub const CLASSIFICATION: &str = "Classification";
pub const RGB: &str = "RGB";

const BUILTIN_SCHEMES: [&str; 4] = [HEIGHT, INTENSITY, CLASSIFICATION, RGB];

const AUTO_RANGE_LOW: f32 = 0.02;
const AUTO_RANGE_HIGH: f32 = 0.98;
const MAX_CACHED_COLORS: usize = 1 << 16;

pub trait Colormap {
    fn for_value_unchecked(&self, t: f32) -> Color<f32>;

    /// 't' is a normalised value and gets clamped to [0, 1].
    fn for_value(&self, t: f32) -> Color<f32> {
        self.for_value_unchecked(clamp(t, 0., 1.))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub t: f32,
    pub color: Color<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub name: String,
    stops: Vec<ColorStop>,
    pub discrete: bool,
    /// Default value window, replaced by 'ColorMapper::set_domain' or 'auto_range'.
    pub domain: (f32, f32),
}

fn stop(t: f32, color: Color<u8>) -> ColorStop {
    ColorStop {
        t,
        color: color.to_f32(),
    }
}

/// ASPRS standard classes that get their own colour; everything else is drawn grey.
const CLASS_COLORS: [(u8, Color<u8>); 14] = [
    (1, Color::rgb(170, 170, 170)),
    (2, Color::rgb(139, 69, 19)),
    (3, Color::rgb(0, 128, 0)),
    (4, Color::rgb(0, 200, 0)),
    (5, Color::rgb(34, 139, 34)),
    (6, Color::rgb(255, 0, 0)),
    (7, Color::rgb(255, 165, 0)),
    (8, Color::rgb(255, 255, 0)),
    (9, Color::rgb(0, 0, 255)),
    (10, Color::rgb(128, 0, 128)),
    (11, Color::rgb(64, 64, 64)),
    (12, Color::rgb(255, 192, 203)),
    (17, Color::rgb(160, 82, 45)),
    (18, Color::rgb(255, 69, 0)),
];

impl ColorScheme {
    /// Checks the stop invariants: non-empty, 't' within [0, 1] and non-decreasing, and for
    /// continuous schemes the first stop at 0 and the last at 1.
    pub fn new(
        name: impl Into<String>,
        stops: Vec<ColorStop>,
        discrete: bool,
        domain: (f32, f32),
    ) -> Result<Self> {
        let name = name.into();
        let invalid = |detail: &str| -> Error {
            ErrorKind::InvalidConfig(format!("color scheme '{}': {}", name, detail)).into()
        };
        if stops.is_empty() {
            return Err(invalid("no stops"));
        }
        if stops.iter().any(|s| !(0. ..=1.).contains(&s.t)) {
            return Err(invalid("stop outside of [0, 1]"));
        }
        if stops.windows(2).any(|w| w[1].t < w[0].t) {
            return Err(invalid("stops are not sorted"));
        }
        if !discrete && (stops[0].t != 0. || stops[stops.len() - 1].t != 1.) {
            return Err(invalid("continuous stops must span [0, 1]"));
        }
        if !(domain.0.is_finite() && domain.1.is_finite()) || domain.1 < domain.0 {
            return Err(invalid("invalid domain"));
        }
        Ok(ColorScheme {
            name,
            stops,
            discrete,
            domain,
        })
    }

    pub fn height() -> Self {
        ColorScheme {
            name: HEIGHT.to_string(),
            stops: vec![
                ColorStop { t: 0., color: color::BLUE },
                ColorStop { t: 0.25, color: color::CYAN },
                ColorStop { t: 0.5, color: color::GREEN },
                ColorStop { t: 0.75, color: color::YELLOW },
                ColorStop { t: 1., color: color::RED },
            ],
            discrete: false,
            domain: (0., 1.),
        }
    }

    pub fn intensity() -> Self {
        ColorScheme {
            name: INTENSITY.to_string(),
            stops: vec![
                ColorStop { t: 0., color: color::BLACK },
                ColorStop { t: 1., color: color::WHITE },
            ],
            discrete: false,
            domain: (0., f32::from(u16::max_value())),
        }
    }

    /// One stop per classification code, with 't = code / 255' over the domain [0, 255].
    pub fn classification() -> Self {
        let default = Color::rgb(128, 128, 128);
        let stops = (0..=255u8)
            .map(|code| {
                let color = CLASS_COLORS
                    .iter()
                    .find(|(c, _)| *c == code)
                    .map_or(default, |(_, color)| *color);
                stop(f32::from(code) / 255., color)
            })
            .collect();
        ColorScheme {
            name: CLASSIFICATION.to_string(),
            stops,
            discrete: true,
            domain: (0., 255.),
        }
    }

    /// Points are drawn with their stored colour. The grey ramp is used for points without one.
    pub fn rgb() -> Self {
        ColorScheme {
            name: RGB.to_string(),
            stops: vec![
                ColorStop { t: 0., color: color::BLACK },
                ColorStop { t: 1., color: color::WHITE },
            ],
            discrete: false,
            domain: (0., 1.),
        }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }
}

impl Colormap for ColorScheme {
    fn for_value_unchecked(&self, t: f32) -> Color<f32> {
        if self.discrete {
            // Nearest stop, the first one on ties.
            let mut best = &self.stops[0];
            for stop in &self.stops[1..] {
                if (stop.t - t).abs() < (best.t - t).abs() {
                    best = stop;
                }
            }
            return best.color;
        }
        for pair in self.stops.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t >= a.t && t <= b.t {
                if b.t == a.t {
                    return a.color;
                }
                return a.color.lerp(&b.color, (t - a.t) / (b.t - a.t));
            }
        }
        if t < self.stops[0].t {
            self.stops[0].color
        } else {
            self.stops[self.stops.len() - 1].color
        }
    }
}

/// Which point property drives the colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColorAttribute {
    Height,
    Intensity,
    Classification,
    Rgb,
    Named(String),
}

impl ColorAttribute {
    /// The driving value; points without the attribute fall back to their height.
    pub fn value(&self, point: &Point) -> f32 {
        let value = match self {
            ColorAttribute::Height => None,
            ColorAttribute::Intensity => point.intensity().map(f32::from),
            ColorAttribute::Classification => point.classification().map(f32::from),
            ColorAttribute::Rgb => point
                .rgb()
                .map(|[r, g, b]| (f32::from(r) + f32::from(g) + f32::from(b)) / (3. * 65535.)),
            ColorAttribute::Named(name) => point.attribute(name).map(|v| v.as_f32()),
        };
        value.unwrap_or(point.position.z)
    }
}

/// Maps point attributes to colours under the current scheme and value window.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    schemes: BTreeMap<String, ColorScheme>,
    current: String,
    attribute: ColorAttribute,
    domain: (f32, f32),
    alpha: f32,
    cache: FnvHashMap<u32, Color<u8>>,
}

impl Default for ColorMapper {
    fn default() -> Self {
        let mut schemes = BTreeMap::new();
        for scheme in vec![
            ColorScheme::height(),
            ColorScheme::intensity(),
            ColorScheme::classification(),
            ColorScheme::rgb(),
        ] {
            schemes.insert(scheme.name.clone(), scheme);
        }
        ColorMapper {
            schemes,
            current: HEIGHT.to_string(),
            attribute: ColorAttribute::Height,
            domain: (0., 1.),
            alpha: 1.,
            cache: FnvHashMap::default(),
        }
    }
}

impl ColorMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self) -> &ColorScheme {
        &self.schemes[&self.current]
    }

    pub fn scheme_names(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(String::as_str)
    }

    /// Switches scheme and resets the value window to the scheme's domain. Built-in schemes also
    /// select their attribute.
    pub fn set_scheme(&mut self, name: &str) -> Result<()> {
        let scheme = self.schemes.get(name).ok_or_else(|| {
            Error::from(ErrorKind::InvalidConfig(format!(
                "unknown color scheme '{}'",
                name
            )))
        })?;
        self.domain = scheme.domain;
        self.attribute = match name {
            HEIGHT => ColorAttribute::Height,
            INTENSITY => ColorAttribute::Intensity,
            CLASSIFICATION => ColorAttribute::Classification,
            RGB => ColorAttribute::Rgb,
            _ => self.attribute.clone(),
        };
        self.current = name.to_string();
        self.cache.clear();
        Ok(())
    }

    pub fn attribute(&self) -> &ColorAttribute {
        &self.attribute
    }

    pub fn set_attribute(&mut self, attribute: ColorAttribute) {
        self.attribute = attribute;
        self.cache.clear();
    }

    pub fn domain(&self) -> (f32, f32) {
        self.domain
    }

    pub fn set_domain(&mut self, min: f32, max: f32) {
        self.domain = if min <= max { (min, max) } else { (max, min) };
        self.cache.clear();
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = clamp(alpha, 0., 1.);
        self.cache.clear();
    }

    pub fn add_scheme(&mut self, scheme: ColorScheme) -> Result<()> {
        if BUILTIN_SCHEMES.contains(&scheme.name.as_str()) {
            return Err(ErrorKind::InvalidConfig(format!(
                "cannot replace built-in color scheme '{}'",
                scheme.name
            ))
            .into());
        }
        if scheme.name == self.current {
            self.cache.clear();
        }
        self.schemes.insert(scheme.name.clone(), scheme);
        Ok(())
    }

    /// Removes a custom scheme. Returns false if there was none by that name. Removing the
    /// current scheme falls back to 'Height'.
    pub fn remove_scheme(&mut self, name: &str) -> Result<bool> {
        if BUILTIN_SCHEMES.contains(&name) {
            return Err(ErrorKind::InvalidConfig(format!(
                "cannot remove built-in color scheme '{}'",
                name
            ))
            .into());
        }
        if self.schemes.remove(name).is_none() {
            return Ok(false);
        }
        if self.current == name {
            self.set_scheme(HEIGHT)?;
        }
        Ok(true)
    }

    pub fn normalize(&self, value: f32) -> f32 {
        let (min, max) = self.domain;
        if max <= min {
            return 0.;
        }
        clamp((value - min) / (max - min), 0., 1.)
    }

    pub fn color_for_value(&mut self, value: f32) -> Color<u8> {
        if let Some(color) = self.cache.get(&value.to_bits()) {
            return *color;
        }
        let mut color = self.schemes[&self.current].for_value(self.normalize(value));
        color.alpha *= self.alpha;
        let color = color.to_u8();
        if self.cache.len() >= MAX_CACHED_COLORS {
            self.cache.clear();
        }
        self.cache.insert(value.to_bits(), color);
        color
    }

    pub fn color_for_point(&mut self, point: &Point) -> Color<u8> {
        if self.attribute == ColorAttribute::Rgb {
            if let Some([r, g, b]) = point.rgb() {
                let mut color = Color::from_u16_channels(r, g, b);
                color.alpha = (self.alpha * 255.).round() as u8;
                return color;
            }
        }
        let value = self.attribute.value(point);
        self.color_for_value(value)
    }

    /// Sets the value window to the [2%, 98%] percentiles of the driving attribute. Discrete
    /// schemes and RGB passthrough keep their fixed domain.
    pub fn auto_range(&mut self, points: &[Point]) {
        if self.scheme().discrete || self.attribute == ColorAttribute::Rgb {
            return;
        }
        let mut values: Vec<OrderedFloat<f32>> = points
            .iter()
            .map(|p| OrderedFloat(self.attribute.value(p)))
            .filter(|v| v.0.is_finite())
            .collect();
        if values.is_empty() {
            return;
        }
        values.sort_unstable();
        let at = |q: f32| values[(q * (values.len() - 1) as f32).round() as usize].0;
        let (min, max) = (at(AUTO_RANGE_LOW), at(AUTO_RANGE_HIGH));
        tracing::debug!("auto range for {:?}: [{}, {}]", self.attribute, min, max);
        self.set_domain(min, max);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// A horizontal legend of the current scheme, low values on the left.
    pub fn color_bar(&self, width: u32, height: u32) -> RgbaImage {
        let scheme = self.scheme();
        let mut image = RgbaImage::new(width, height);
        for x in 0..width {
            let t = if width > 1 {
                x as f32 / (width - 1) as f32
            } else {
                0.
            };
            let pixel = scheme.for_value(t).to_u8().to_rgba();
            for y in 0..height {
                image.put_pixel(x, y, pixel);
            }
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeValue, CLASSIFICATION as CLASSIFICATION_KEY};

    #[test]
    fn test_height_scheme_interpolates() {
        let mut mapper = ColorMapper::new();
        mapper.set_domain(0., 10.);
        assert_eq!(color::BLUE.to_u8(), mapper.color_for_value(0.));
        assert_eq!(color::RED.to_u8(), mapper.color_for_value(10.));
        assert_eq!(color::GREEN.to_u8(), mapper.color_for_value(5.));
        assert_eq!(
            color::BLUE.lerp(&color::CYAN, 0.5).to_u8(),
            mapper.color_for_value(1.25)
        );
        // Out-of-window values clamp.
        assert_eq!(color::RED.to_u8(), mapper.color_for_value(25.));
    }

    #[test]
    fn test_classification_is_discrete() {
        let mut mapper = ColorMapper::new();
        mapper.set_scheme(CLASSIFICATION).unwrap();
        let ground = Point::new(0., 0., 0.).with_attribute(CLASSIFICATION_KEY, AttributeValue::U8(2));
        let building =
            Point::new(0., 0., 0.).with_attribute(CLASSIFICATION_KEY, AttributeValue::U8(6));
        let other = Point::new(0., 0., 0.).with_attribute(CLASSIFICATION_KEY, AttributeValue::U8(77));
        assert_eq!(Color::rgb(139, 69, 19), mapper.color_for_point(&ground));
        assert_eq!(Color::rgb(255, 0, 0), mapper.color_for_point(&building));
        assert_eq!(Color::rgb(128, 128, 128), mapper.color_for_point(&other));
    }

    #[test]
    fn test_rgb_passthrough_and_alpha() {
        let mut mapper = ColorMapper::new();
        mapper.set_scheme(RGB).unwrap();
        mapper.set_alpha(0.5);
        let p = Point::new(0., 0., 0.)
            .with_attribute(crate::RED, AttributeValue::U16(65535))
            .with_attribute(crate::GREEN, AttributeValue::U16(0))
            .with_attribute(crate::BLUE, AttributeValue::U16(32768));
        let c = mapper.color_for_point(&p);
        assert_eq!((255, 0, 128, 128), (c.red, c.green, c.blue, c.alpha));
    }

    #[test]
    fn test_custom_schemes() {
        let mut mapper = ColorMapper::new();
        assert!(ColorScheme::new("bad", vec![], false, (0., 1.)).is_err());
        let scheme = ColorScheme::new(
            "two-tone",
            vec![
                ColorStop { t: 0., color: color::BLACK },
                ColorStop { t: 1., color: color::YELLOW },
            ],
            false,
            (0., 4.),
        )
        .unwrap();
        mapper.add_scheme(scheme).unwrap();
        mapper.set_scheme("two-tone").unwrap();
        assert_eq!((0., 4.), mapper.domain());
        assert!(mapper.remove_scheme(HEIGHT).is_err());
        assert!(mapper.remove_scheme("two-tone").unwrap());
        assert_eq!(HEIGHT, mapper.scheme().name);
        assert!(!mapper.remove_scheme("two-tone").unwrap());
    }

    #[test]
    fn test_auto_range_uses_percentiles() {
        let mut points: Vec<Point> = (0..=100).map(|i| Point::new(0., 0., i as f32)).collect();
        points.push(Point::new(0., 0., 1e6));
        let mut mapper = ColorMapper::new();
        mapper.auto_range(&points);
        let (min, max) = mapper.domain();
        assert!(min >= 1. && min <= 3.);
        assert!(max >= 97. && max <= 100.);
    }

    #[test]
    fn test_auto_range_keeps_class_colors() {
        let points: Vec<Point> = (0..100)
            .map(|i| {
                let class = if i % 2 == 0 { 2 } else { 6 };
                Point::new(0., 0., i as f32).with_attribute(CLASSIFICATION_KEY, AttributeValue::U8(class))
            })
            .collect();
        let mut mapper = ColorMapper::new();
        mapper.set_scheme(CLASSIFICATION).unwrap();
        mapper.auto_range(&points);
        assert_eq!((0., 255.), mapper.domain());
        assert_eq!(Color::rgb(139, 69, 19), mapper.color_for_point(&points[0]));
        assert_eq!(Color::rgb(255, 0, 0), mapper.color_for_point(&points[1]));

        mapper.set_scheme(RGB).unwrap();
        let domain = mapper.domain();
        mapper.auto_range(&points);
        assert_eq!(domain, mapper.domain());
    }

    #[test]
    fn test_color_bar_ends() {
        let mapper = ColorMapper::new();
        let bar = mapper.color_bar(11, 2);
        assert_eq!(color::BLUE.to_u8().to_rgba(), *bar.get_pixel(0, 1));
        assert_eq!(color::RED.to_u8().to_rgba(), *bar.get_pixel(10, 0));
    }
}
