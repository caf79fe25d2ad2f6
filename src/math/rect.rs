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

use nalgebra::Point2;
use serde_derive::{Deserialize, Serialize};

/// An axis aligned rectangle in world units. 'top' is the smaller y value, matching the
/// orientation of pixel rows on screen.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Rect {
            left,
            top,
            width,
            height,
        }
    }

    pub fn from_min_max(min: Point2<f32>, max: Point2<f32>) -> Self {
        Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.left + self.width / 2., self.top + self.height / 2.)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0.
            && self.height > 0.
            && self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    pub fn contains(&self, p: &Point2<f32>) -> bool {
        self.left <= p.x && p.x <= self.right() && self.top <= p.y && p.y <= self.bottom()
    }

    /// Grows the rectangle by 'fraction' of its size on each side and enforces 'min_extent' per
    /// axis around the center.
    pub fn expanded(&self, fraction: f32, min_extent: f32) -> Rect {
        let width = (self.width * (1. + 2. * fraction)).max(min_extent);
        let height = (self.height * (1. + 2. * fraction)).max(min_extent);
        let c = self.center();
        Rect::new(c.x - width / 2., c.y - height / 2., width, height)
    }
}
