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

//! The one world <-> screen mapping. Every component that needs to go between viewport pixels
//! and world coordinates goes through a 'ViewState', usually owned by a 'Projector'.

use crate::errors::*;
use crate::math::{Aabb, Rect};
use nalgebra::{Point2, Point3, Vector2};
use serde_derive::{Deserialize, Serialize};

/// Margin added on every side of the cloud's footprint when bounds are derived automatically.
pub const AUTO_BOUNDS_MARGIN: f32 = 0.1;
/// Smallest extent per axis of derived bounds, in world units.
pub const MIN_VIEW_EXTENT: f32 = 1e-3;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(width: i32, height: i32) -> Self {
        Viewport { width, height }
    }

    pub fn contains(&self, p: &Point2<f32>) -> bool {
        p.x >= 0. && p.y >= 0. && p.x < self.width as f32 && p.y < self.height as f32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub bounds: Rect,
    pub viewport: Viewport,
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState {
            bounds: Rect::new(0., 0., 0., 0.),
            viewport: Viewport::default(),
        }
    }
}

impl ViewState {
    pub fn new(bounds: Rect, viewport: Viewport) -> Self {
        ViewState { bounds, viewport }
    }

    pub fn is_valid(&self) -> bool {
        self.bounds.is_valid() && self.viewport.width > 0 && self.viewport.height > 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        Err(geometry_error(
            GeometryErrorKind::InvalidViewState,
            format!(
                "bounds {}x{} at ({}, {}) with viewport {}x{}",
                self.bounds.width,
                self.bounds.height,
                self.bounds.left,
                self.bounds.top,
                self.viewport.width,
                self.viewport.height
            ),
        ))
    }

    /// Only meaningful for a valid state. The z coordinate is ignored.
    pub fn world_to_screen(&self, world: &Point3<f32>) -> Point2<f32> {
        let b = &self.bounds;
        let sx = (f64::from(world.x) - f64::from(b.left)) / f64::from(b.width)
            * f64::from(self.viewport.width);
        let sy = (f64::from(world.y) - f64::from(b.top)) / f64::from(b.height)
            * f64::from(self.viewport.height);
        Point2::new(sx as f32, sy as f32)
    }

    /// Inverse of 'world_to_screen'; the returned z is always 0.
    pub fn screen_to_world(&self, screen: &Point2<f32>) -> Point3<f32> {
        let b = &self.bounds;
        let wx = f64::from(b.left)
            + f64::from(screen.x) / f64::from(self.viewport.width) * f64::from(b.width);
        let wy = f64::from(b.top)
            + f64::from(screen.y) / f64::from(self.viewport.height) * f64::from(b.height);
        Point3::new(wx as f32, wy as f32, 0.)
    }

    /// World units covered by one pixel along x and y.
    pub fn units_per_pixel(&self) -> Vector2<f32> {
        Vector2::new(
            self.bounds.width / self.viewport.width as f32,
            self.bounds.height / self.viewport.height as f32,
        )
    }
}

/// The xy footprint of 'bbox' grown by 'margin' on each side.
pub fn bounds_for(bbox: &Aabb, margin: f32) -> Rect {
    let min = bbox.min();
    let max = bbox.max();
    Rect::from_min_max(Point2::new(min.x, min.y), Point2::new(max.x, max.y))
        .expanded(margin, MIN_VIEW_EXTENT)
}

/// Owns the current 'ViewState'. Bounds follow the loaded cloud until they are set explicitly,
/// and every change bumps 'epoch' so overlays can tell whether they are drawing against the state
/// the raster was produced with.
#[derive(Debug, Default, Clone)]
pub struct Projector {
    state: ViewState,
    explicit_bounds: bool,
    epoch: u64,
}

impl Projector {
    pub fn new(viewport: Viewport) -> Self {
        Projector {
            state: ViewState {
                viewport,
                ..Default::default()
            },
            explicit_bounds: false,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_explicit_bounds(&self) -> bool {
        self.explicit_bounds
    }

    /// The current state, which may not be usable yet.
    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// The current state if it can be used for mapping.
    pub fn view(&self) -> Result<&ViewState> {
        self.state.validate()?;
        Ok(&self.state)
    }

    fn commit(&mut self, state: ViewState) {
        if state != self.state {
            self.state = state;
            self.epoch += 1;
        }
    }

    /// Replaces the whole state. An invalid state is rejected and the previous one is kept.
    pub fn set_view_state(&mut self, state: ViewState) -> Result<()> {
        state.validate()?;
        self.explicit_bounds = true;
        self.commit(state);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        if viewport.width <= 0 || viewport.height <= 0 {
            return Err(geometry_error(
                GeometryErrorKind::InvalidViewState,
                format!("viewport is {}x{}", viewport.width, viewport.height),
            ));
        }
        let state = ViewState {
            viewport,
            ..self.state
        };
        self.commit(state);
        Ok(())
    }

    pub fn set_bounds(&mut self, bounds: Rect) -> Result<()> {
        if !bounds.is_valid() {
            return Err(geometry_error(
                GeometryErrorKind::InvalidViewState,
                format!("bounds {:?} are empty", bounds),
            ));
        }
        self.explicit_bounds = true;
        let state = ViewState {
            bounds,
            ..self.state
        };
        self.commit(state);
        Ok(())
    }

    /// Derives the bounds from 'bbox' unless they were set explicitly.
    pub fn update_auto_bounds(&mut self, bbox: &Aabb) {
        if self.explicit_bounds {
            return;
        }
        let state = ViewState {
            bounds: bounds_for(bbox, AUTO_BOUNDS_MARGIN),
            ..self.state
        };
        self.commit(state);
    }

    /// Frames 'points' with 'margin' of their extent on each side. Does nothing for no points.
    pub fn fit_bounds<'a>(
        &mut self,
        points: impl IntoIterator<Item = &'a Point3<f32>>,
        margin: f32,
    ) -> Result<()> {
        match Aabb::from_points(points) {
            Some(bbox) => self.set_bounds(bounds_for(&bbox, margin.max(0.))),
            None => Ok(()),
        }
    }

    /// Hands the bounds back to the loaded cloud.
    pub fn reset(&mut self) {
        self.explicit_bounds = false;
        let state = ViewState {
            bounds: ViewState::default().bounds,
            ..self.state
        };
        self.commit(state);
    }

    /// Scales the view by 'factor' (> 1 zooms in) while the world point under 'anchor' stays
    /// under it.
    pub fn zoom(&mut self, factor: f32, anchor: &Point2<f32>) -> Result<()> {
        let view = *self.view()?;
        if !(factor.is_finite() && factor > 0.) {
            return Err(geometry_error(
                GeometryErrorKind::InvalidViewState,
                format!("zoom factor {}", factor),
            ));
        }
        let world = view.screen_to_world(anchor);
        let width = view.bounds.width / factor;
        let height = view.bounds.height / factor;
        let left = world.x - anchor.x / view.viewport.width as f32 * width;
        let top = world.y - anchor.y / view.viewport.height as f32 * height;
        self.set_bounds(Rect::new(left, top, width, height))
    }

    /// Moves the view so that content follows a pointer drag of 'delta' pixels.
    pub fn pan(&mut self, delta: &Vector2<f32>) -> Result<()> {
        let view = *self.view()?;
        let upp = view.units_per_pixel();
        let bounds = Rect::new(
            view.bounds.left - delta.x * upp.x,
            view.bounds.top - delta.y * upp.y,
            view.bounds.width,
            view.bounds.height,
        );
        self.set_bounds(bounds)
    }

    pub fn world_to_screen(&self, world: &Point3<f32>) -> Result<Point2<f32>> {
        Ok(self.view()?.world_to_screen(world))
    }

    pub fn screen_to_world(&self, screen: &Point2<f32>) -> Result<Point3<f32>> {
        Ok(self.view()?.screen_to_world(screen))
    }
}
