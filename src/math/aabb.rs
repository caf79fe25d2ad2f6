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

use nalgebra::Point3;
use serde_derive::{Deserialize, Serialize};

/// An Axis Aligned Bounding Box.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct Aabb {
    mins: Point3<f32>,
    maxs: Point3<f32>,
}

impl Aabb {
    pub fn new(mins: Point3<f32>, maxs: Point3<f32>) -> Self {
        Aabb { mins, maxs }
    }

    pub fn from_point(p: Point3<f32>) -> Self {
        Aabb { mins: p, maxs: p }
    }

    /// Bounding box of all 'points', None for an empty input.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3<f32>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Aabb::from_point(*first);
        for p in iter {
            bbox.grow(*p);
        }
        Some(bbox)
    }

    pub fn min(&self) -> &Point3<f32> {
        &self.mins
    }

    pub fn max(&self) -> &Point3<f32> {
        &self.maxs
    }

    pub fn grow(&mut self, p: Point3<f32>) {
        self.mins = nalgebra::inf(&self.mins, &p);
        self.maxs = nalgebra::sup(&self.maxs, &p);
    }

    pub fn contains(&self, p: &Point3<f32>) -> bool {
        nalgebra::partial_le(&self.mins, p) && nalgebra::partial_le(p, &self.maxs)
    }

    /// Like 'contains', but ignores z.
    pub fn contains_xy(&self, p: &Point3<f32>) -> bool {
        self.mins.x <= p.x && p.x <= self.maxs.x && self.mins.y <= p.y && p.y <= self.maxs.y
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.mins.x <= other.maxs.x
            && other.mins.x <= self.maxs.x
            && self.mins.y <= other.maxs.y
            && other.mins.y <= self.maxs.y
            && self.mins.z <= other.maxs.z
            && other.mins.z <= self.maxs.z
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.mins, &self.maxs)
    }

    pub fn extent(&self) -> nalgebra::Vector3<f32> {
        self.maxs - self.mins
    }

    pub fn max_extent(&self) -> f32 {
        let e = self.extent();
        e.x.max(e.y).max(e.z)
    }
}
