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

// TODO(feuerste): Remove this, once https://github.com/rust-lang-nursery/error-chain/pull/255 is merged.
#![allow(renamed_and_removed_lints)]
#![recursion_limit = "1024"]

pub mod color;
pub mod colormap;
pub mod config;
#[allow(deprecated)]
pub mod errors;
pub mod line_engine;
pub mod lod;
pub mod math;
pub mod measure;
pub mod notice;
pub mod polygon;
pub mod processing;
pub mod projector;
pub mod rasterizer;
pub mod read_write;
pub mod scene;
pub mod spatial_index;

use crate::math::Aabb;
use nalgebra::Point3;
use std::collections::BTreeMap;

pub const INTENSITY: &str = "intensity";
pub const CLASSIFICATION: &str = "classification";
pub const RED: &str = "red";
pub const GREEN: &str = "green";
pub const BLUE: &str = "blue";

/// A scalar attached to a point. The known keys have fixed types (intensity and the color
/// channels are U16, classification is U8); everything else is carried through untouched.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AttributeValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    F32(f32),
    F64(f64),
}

impl AttributeValue {
    pub fn as_f32(self) -> f32 {
        match self {
            AttributeValue::U8(v) => f32::from(v),
            AttributeValue::U16(v) => f32::from(v),
            AttributeValue::U32(v) => v as f32,
            AttributeValue::I32(v) => v as f32,
            AttributeValue::F32(v) => v,
            AttributeValue::F64(v) => v as f32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: Point3<f32>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Point {
            position: Point3::new(x, y, z),
            attributes: BTreeMap::new(),
        }
    }

    pub fn from_position(position: Point3<f32>) -> Self {
        Point {
            position,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attributes.get(key).copied()
    }

    pub fn intensity(&self) -> Option<u16> {
        match self.attributes.get(INTENSITY)? {
            AttributeValue::U16(v) => Some(*v),
            other => Some(other.as_f32().max(0.).min(f32::from(u16::max_value())) as u16),
        }
    }

    pub fn classification(&self) -> Option<u8> {
        match self.attributes.get(CLASSIFICATION)? {
            AttributeValue::U8(v) => Some(*v),
            other => Some(other.as_f32().max(0.).min(255.) as u8),
        }
    }

    pub fn rgb(&self) -> Option<[u16; 3]> {
        let channel = |key| self.attribute(key).map(|v| v.as_f32() as u16);
        Some([channel(RED)?, channel(GREEN)?, channel(BLUE)?])
    }

    pub fn is_finite(&self) -> bool {
        self.position.x.is_finite() && self.position.y.is_finite() && self.position.z.is_finite()
    }
}

/// An ordered sequence of points and the exact bounding box over them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point>,
    bounding_box: Option<Aabb>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        let bounding_box = Aabb::from_points(points.iter().map(|p| &p.position));
        PointCloud {
            points,
            bounding_box,
        }
    }

    pub fn from_positions(positions: Vec<Point3<f32>>) -> Self {
        PointCloud::new(positions.into_iter().map(Point::from_position).collect())
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn positions(&self) -> impl Iterator<Item = &Point3<f32>> {
        self.points.iter().map(|p| &p.position)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounding_box(&self) -> Option<&Aabb> {
        self.bounding_box.as_ref()
    }

    pub fn push(&mut self, point: Point) {
        match self.bounding_box.as_mut() {
            Some(bbox) => bbox.grow(point.position),
            None => self.bounding_box = Some(Aabb::from_point(point.position)),
        }
        self.points.push(point);
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = Point>) {
        for p in points {
            self.push(p);
        }
    }

    /// A new cloud holding the points at 'indices', in the given order.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        PointCloud::new(indices.iter().map(|&i| self.points[i].clone()).collect())
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }
}
