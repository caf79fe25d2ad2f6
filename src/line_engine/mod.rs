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

//! Line segments and polylines drawn over the top-down view, plus the drawing and editing state
//! machine driven by pointer events in viewport pixels.

use crate::color::Color;
use crate::config::Config;
use crate::errors::*;
use crate::math::point_segment_distance;
use crate::notice::{Notice, NoticeQueue};
use crate::polygon::{Polygon, PolygonExtractor};
use crate::projector::{Projector, ViewState};
use nalgebra::{Point2, Point3};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

pub mod persistence;

pub use self::persistence::{AnnotationDocument, Statistics, ANNOTATION_VERSION};

/// Endpoints closer than this are considered shared by a merge.
pub const MERGE_EPS: f32 = 1e-6;

pub const DEFAULT_SEGMENT_COLOR: Color<u8> = Color::rgb(255, 0, 0);
pub const DEFAULT_POLYLINE_COLOR: Color<u8> = Color::rgb(0, 128, 255);

#[derive(Debug, Clone, PartialEq)]
pub struct LineSegment {
    pub id: i32,
    pub start: Point3<f32>,
    pub end: Point3<f32>,
    pub polyline_id: Option<i32>,
    pub description: String,
    pub created_at: OffsetDateTime,
    pub selected: bool,
    pub color: Color<u8>,
}

impl LineSegment {
    pub fn length(&self) -> f32 {
        (self.end - self.start).norm()
    }

    pub fn endpoint(&self, which: Endpoint) -> &Point3<f32> {
        match which {
            Endpoint::Start => &self.start,
            Endpoint::End => &self.end,
        }
    }

    fn endpoint_mut(&mut self, which: Endpoint) -> &mut Point3<f32> {
        match which {
            Endpoint::Start => &mut self.start,
            Endpoint::End => &mut self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub id: i32,
    pub segment_ids: Vec<i32>,
    pub description: String,
    pub created_at: OffsetDateTime,
    pub closed: bool,
    pub color: Color<u8>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Start,
    End,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawingMode {
    None,
    SingleLine,
    Polyline,
    Selection,
    Edit,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditMode {
    None,
    MoveEndpoint,
    SplitSegment,
    MergeSegments,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Key {
    Escape,
    Delete,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Modifiers {
    /// Makes selection clicks toggle instead of replace.
    pub toggle: bool,
}

/// Pick radii and geometry thresholds of the engine.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EngineSettings {
    pub selection_tolerance_px: f32,
    pub endpoint_tolerance_px: f32,
    pub min_segment_length: f32,
    pub endpoint_equality_eps: f32,
    pub polygon_min_area: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        EngineSettings {
            selection_tolerance_px: config.selection_tolerance_px,
            endpoint_tolerance_px: config.endpoint_tolerance_px,
            min_segment_length: config.min_segment_length,
            endpoint_equality_eps: config.endpoint_equality_eps,
            polygon_min_area: config.polygon_min_area,
        }
    }
}

/// What the pointer is in the middle of.
#[derive(Debug, Clone, PartialEq)]
enum Interaction {
    Idle,
    SingleLine {
        start: Point3<f32>,
        cursor: Point3<f32>,
    },
    Polyline {
        vertices: Vec<Point3<f32>>,
        cursor: Point3<f32>,
    },
    MoveEndpoint {
        segment_id: i32,
        endpoint: Endpoint,
        original: Point3<f32>,
    },
    Merge {
        first: i32,
    },
}

impl Interaction {
    fn describe(&self) -> &'static str {
        match self {
            Interaction::Idle => "nothing",
            Interaction::SingleLine { .. } => "line drawing",
            Interaction::Polyline { .. } => "polyline drawing",
            Interaction::MoveEndpoint { .. } => "endpoint move",
            Interaction::Merge { .. } => "merge",
        }
    }
}

#[derive(Debug)]
pub struct LineEngine {
    settings: EngineSettings,
    segments: BTreeMap<i32, LineSegment>,
    polylines: BTreeMap<i32, Polyline>,
    next_segment_id: i32,
    next_polyline_id: i32,
    drawing_mode: DrawingMode,
    edit_mode: EditMode,
    interaction: Interaction,
    segment_color: Color<u8>,
    notices: NoticeQueue,
}

impl Default for LineEngine {
    fn default() -> Self {
        LineEngine::new(EngineSettings::default())
    }
}

impl LineEngine {
    pub fn new(settings: EngineSettings) -> Self {
        LineEngine {
            settings,
            segments: BTreeMap::new(),
            polylines: BTreeMap::new(),
            next_segment_id: 1,
            next_polyline_id: 1,
            drawing_mode: DrawingMode::None,
            edit_mode: EditMode::None,
            interaction: Interaction::Idle,
            segment_color: DEFAULT_SEGMENT_COLOR,
            notices: NoticeQueue::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        LineEngine::new(EngineSettings::from(config))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Segments in id order.
    pub fn segments(&self) -> impl Iterator<Item = &LineSegment> {
        self.segments.values()
    }

    pub fn segment(&self, id: i32) -> Option<&LineSegment> {
        self.segments.get(&id)
    }

    pub fn polylines(&self) -> impl Iterator<Item = &Polyline> {
        self.polylines.values()
    }

    pub fn polyline(&self, id: i32) -> Option<&Polyline> {
        self.polylines.get(&id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn polyline_count(&self) -> usize {
        self.polylines.len()
    }

    pub fn selected_ids(&self) -> Vec<i32> {
        self.segments
            .values()
            .filter(|s| s.selected)
            .map(|s| s.id)
            .collect()
    }

    pub fn drawing_mode(&self) -> DrawingMode {
        self.drawing_mode
    }

    pub fn edit_mode(&self) -> EditMode {
        self.edit_mode
    }

    pub fn is_busy(&self) -> bool {
        self.interaction != Interaction::Idle
    }

    /// The rubber band from the last fixed point to the cursor while drawing.
    pub fn preview(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        match &self.interaction {
            Interaction::SingleLine { start, cursor } => Some((*start, *cursor)),
            Interaction::Polyline { vertices, cursor } => vertices.last().map(|v| (*v, *cursor)),
            _ => None,
        }
    }

    /// Vertices fixed so far by an unfinished polyline.
    pub fn pending_vertices(&self) -> &[Point3<f32>] {
        match &self.interaction {
            Interaction::Polyline { vertices, .. } => vertices,
            _ => &[],
        }
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.peek()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    /// Colour given to newly drawn segments.
    pub fn set_default_color(&mut self, color: Color<u8>) {
        self.segment_color = color;
    }

    fn cancel_interaction(&mut self) {
        let interaction = std::mem::replace(&mut self.interaction, Interaction::Idle);
        match interaction {
            Interaction::Idle => return,
            Interaction::MoveEndpoint {
                segment_id,
                endpoint,
                original,
            } => {
                if let Some(segment) = self.segments.get_mut(&segment_id) {
                    *segment.endpoint_mut(endpoint) = original;
                }
            }
            Interaction::Merge { first } => {
                if let Some(segment) = self.segments.get_mut(&first) {
                    segment.selected = false;
                }
            }
            _ => (),
        }
        self.notices
            .info(format!("cancelled {}", interaction.describe()));
    }

    /// Switches the drawing mode. Whatever was in progress is cancelled; entering 'Edit' resets
    /// the edit mode.
    pub fn set_drawing_mode(&mut self, mode: DrawingMode) {
        self.cancel_interaction();
        if mode == DrawingMode::Edit || self.drawing_mode == DrawingMode::Edit {
            self.edit_mode = EditMode::None;
        }
        self.drawing_mode = mode;
    }

    /// Selects an edit tool, entering 'Edit' if necessary.
    pub fn set_edit_mode(&mut self, mode: EditMode) {
        if self.drawing_mode != DrawingMode::Edit {
            self.set_drawing_mode(DrawingMode::Edit);
        } else {
            self.cancel_interaction();
        }
        self.edit_mode = mode;
    }

    /// Allocation below never overflows once this has passed for 'count' ids.
    fn ensure_ids(next: i32, count: usize, what: &str) -> Result<()> {
        if i64::from(next) + count as i64 > i64::from(i32::max_value()) {
            return Err(ErrorKind::ResourceExhausted(
                ResourceErrorKind::OutOfMemory,
                format!("{} ids are exhausted", what),
            )
            .into());
        }
        Ok(())
    }

    fn allocate_segment(&mut self, start: Point3<f32>, end: Point3<f32>) -> i32 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        self.segments.insert(
            id,
            LineSegment {
                id,
                start,
                end,
                polyline_id: None,
                description: String::new(),
                created_at: OffsetDateTime::now_utc(),
                selected: false,
                color: self.segment_color,
            },
        );
        id
    }

    fn check_length(&self, start: &Point3<f32>, end: &Point3<f32>) -> Result<()> {
        let length = (end - start).norm();
        if !(length >= self.settings.min_segment_length) {
            return Err(geometry_error(
                GeometryErrorKind::DegenerateSegment,
                format!(
                    "segment of length {} is shorter than {}",
                    length, self.settings.min_segment_length
                ),
            ));
        }
        Ok(())
    }

    /// Adds a segment in world coordinates and returns its id.
    pub fn add_segment(&mut self, start: Point3<f32>, end: Point3<f32>) -> Result<i32> {
        self.check_length(&start, &end)?;
        Self::ensure_ids(self.next_segment_id, 1, "segment")?;
        Ok(self.allocate_segment(start, end))
    }

    /// Groups existing, unowned segments into a new polyline, in the given order.
    pub fn create_polyline(&mut self, segment_ids: &[i32], closed: bool) -> Result<i32> {
        if segment_ids.is_empty() {
            return Err(geometry_error(
                GeometryErrorKind::DegenerateSegment,
                "a polyline needs at least one segment",
            ));
        }
        let mut listed = BTreeSet::new();
        for id in segment_ids {
            if !listed.insert(*id) {
                return Err(geometry_error(
                    GeometryErrorKind::DegenerateSegment,
                    format!("segment {} is listed twice", id),
                ));
            }
            match self.segments.get(id) {
                None => {
                    return Err(geometry_error(
                        GeometryErrorKind::DegenerateSegment,
                        format!("segment {} does not exist", id),
                    ))
                }
                Some(segment) if segment.polyline_id.is_some() => {
                    return Err(geometry_error(
                        GeometryErrorKind::DegenerateSegment,
                        format!("segment {} already belongs to a polyline", id),
                    ))
                }
                Some(_) => (),
            }
        }
        Self::ensure_ids(self.next_polyline_id, 1, "polyline")?;
        let id = self.next_polyline_id;
        self.next_polyline_id += 1;
        for segment_id in segment_ids {
            if let Some(segment) = self.segments.get_mut(segment_id) {
                segment.polyline_id = Some(id);
            }
        }
        self.polylines.insert(
            id,
            Polyline {
                id,
                segment_ids: segment_ids.to_vec(),
                description: String::new(),
                created_at: OffsetDateTime::now_utc(),
                closed,
                color: DEFAULT_POLYLINE_COLOR,
            },
        );
        Ok(id)
    }

    /// Removes a segment and its polyline membership. Polylines left empty are removed too.
    pub fn remove_segment(&mut self, id: i32) -> bool {
        let segment = match self.segments.remove(&id) {
            Some(segment) => segment,
            None => return false,
        };
        if let Some(polyline_id) = segment.polyline_id {
            let now_empty = match self.polylines.get_mut(&polyline_id) {
                Some(polyline) => {
                    polyline.segment_ids.retain(|s| *s != id);
                    polyline.segment_ids.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.polylines.remove(&polyline_id);
            }
        }
        let involved = match &self.interaction {
            Interaction::MoveEndpoint { segment_id, .. } => *segment_id == id,
            Interaction::Merge { first } => *first == id,
            _ => false,
        };
        if involved {
            self.interaction = Interaction::Idle;
        }
        true
    }

    /// Removes a polyline. With 'cascade' its segments go too, otherwise they become free
    /// segments.
    pub fn remove_polyline(&mut self, id: i32, cascade: bool) -> bool {
        let polyline = match self.polylines.remove(&id) {
            Some(polyline) => polyline,
            None => return false,
        };
        for segment_id in polyline.segment_ids {
            if cascade {
                self.segments.remove(&segment_id);
            } else if let Some(segment) = self.segments.get_mut(&segment_id) {
                segment.polyline_id = None;
            }
        }
        true
    }

    /// Selects a segment, either replacing the selection or toggling this one.
    pub fn select(&mut self, id: i32, toggle: bool) -> bool {
        if !self.segments.contains_key(&id) {
            return false;
        }
        if toggle {
            if let Some(segment) = self.segments.get_mut(&id) {
                segment.selected = !segment.selected;
            }
        } else {
            for segment in self.segments.values_mut() {
                segment.selected = segment.id == id;
            }
        }
        true
    }

    pub fn select_all(&mut self) {
        for segment in self.segments.values_mut() {
            segment.selected = true;
        }
    }

    pub fn clear_selection(&mut self) {
        for segment in self.segments.values_mut() {
            segment.selected = false;
        }
    }

    /// Removes every selected segment and returns how many there were.
    pub fn delete_selected(&mut self) -> usize {
        let selected = self.selected_ids();
        for id in &selected {
            self.remove_segment(*id);
        }
        selected.len()
    }

    pub fn set_segment_description(&mut self, id: i32, description: impl Into<String>) -> bool {
        match self.segments.get_mut(&id) {
            Some(segment) => {
                segment.description = description.into();
                true
            }
            None => false,
        }
    }

    pub fn set_segment_color(&mut self, id: i32, color: Color<u8>) -> bool {
        match self.segments.get_mut(&id) {
            Some(segment) => {
                segment.color = color;
                true
            }
            None => false,
        }
    }

    pub fn set_polyline_description(&mut self, id: i32, description: impl Into<String>) -> bool {
        match self.polylines.get_mut(&id) {
            Some(polyline) => {
                polyline.description = description.into();
                true
            }
            None => false,
        }
    }

    pub fn set_polyline_color(&mut self, id: i32, color: Color<u8>) -> bool {
        match self.polylines.get_mut(&id) {
            Some(polyline) => {
                polyline.color = color;
                true
            }
            None => false,
        }
    }

    /// Moves one endpoint. Fails without changes if the segment would become too short.
    pub fn move_endpoint(&mut self, id: i32, endpoint: Endpoint, to: Point3<f32>) -> Result<()> {
        let segment = self.segments.get(&id).ok_or_else(|| {
            geometry_error(
                GeometryErrorKind::DegenerateSegment,
                format!("segment {} does not exist", id),
            )
        })?;
        match endpoint {
            Endpoint::Start => self.check_length(&to, &segment.end)?,
            Endpoint::End => self.check_length(&segment.start, &to)?,
        }
        if let Some(segment) = self.segments.get_mut(&id) {
            *segment.endpoint_mut(endpoint) = to;
        }
        Ok(())
    }

    /// Splits a segment at 'at', which is projected onto it. The two pieces get new ids and take
    /// the original's place in its polyline.
    pub fn split_segment(&mut self, id: i32, at: &Point3<f32>) -> Result<(i32, i32)> {
        let original = self.segments.get(&id).cloned().ok_or_else(|| {
            geometry_error(
                GeometryErrorKind::DegenerateSegment,
                format!("segment {} does not exist", id),
            )
        })?;
        let direction = original.end - original.start;
        let t = (at - original.start).dot(&direction) / direction.norm_squared();
        let vertex = original.start + direction * t.max(0.).min(1.);
        self.check_length(&original.start, &vertex)?;
        self.check_length(&vertex, &original.end)?;
        Self::ensure_ids(self.next_segment_id, 2, "segment")?;

        self.segments.remove(&id);
        let first = self.allocate_segment(original.start, vertex);
        let second = self.allocate_segment(vertex, original.end);
        for piece in &[first, second] {
            if let Some(segment) = self.segments.get_mut(piece) {
                segment.polyline_id = original.polyline_id;
                segment.description = original.description.clone();
                segment.color = original.color;
            }
        }
        if let Some(polyline) = original
            .polyline_id
            .and_then(|p| self.polylines.get_mut(&p))
        {
            if let Some(position) = polyline.segment_ids.iter().position(|s| *s == id) {
                polyline.segment_ids[position] = first;
                polyline.segment_ids.insert(position + 1, second);
            }
        }
        Ok((first, second))
    }

    /// Joins 'second' onto 'first' at their shared endpoint. 'first' keeps its id and direction
    /// and spans both; 'second' is removed.
    pub fn merge_segments(&mut self, first: i32, second: i32) -> Result<i32> {
        let missing = |id: i32| {
            geometry_error(
                GeometryErrorKind::DisconnectedMerge,
                format!("segment {} does not exist", id),
            )
        };
        if first == second {
            return Err(geometry_error(
                GeometryErrorKind::DisconnectedMerge,
                format!("cannot merge segment {} with itself", first),
            ));
        }
        let a = self.segments.get(&first).ok_or_else(|| missing(first))?;
        let b = self.segments.get(&second).ok_or_else(|| missing(second))?;
        let near = |p: &Point3<f32>, q: &Point3<f32>| (p - q).norm() <= MERGE_EPS;
        let (start, end) = if near(&a.end, &b.start) {
            (a.start, b.end)
        } else if near(&a.end, &b.end) {
            (a.start, b.start)
        } else if near(&a.start, &b.end) {
            (b.start, a.end)
        } else if near(&a.start, &b.start) {
            (b.end, a.end)
        } else {
            return Err(geometry_error(
                GeometryErrorKind::DisconnectedMerge,
                format!("segments {} and {} share no endpoint", first, second),
            ));
        };
        self.check_length(&start, &end)?;
        if let Some(segment) = self.segments.get_mut(&first) {
            segment.start = start;
            segment.end = end;
        }
        self.remove_segment(second);
        Ok(first)
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            segment_count: self.segments.len(),
            polyline_count: self.polylines.len(),
            total_length: self.segments.values().map(|s| f64::from(s.length())).sum(),
            selected_count: self.segments.values().filter(|s| s.selected).count(),
        }
    }

    /// Drops every segment and polyline and rewinds the id counters.
    pub fn clear_all(&mut self) {
        self.interaction = Interaction::Idle;
        self.segments.clear();
        self.polylines.clear();
        self.next_segment_id = 1;
        self.next_polyline_id = 1;
    }

    /// Closed regions formed by the current segments.
    pub fn extract_polygons(&self) -> Vec<Polygon> {
        PolygonExtractor::new(
            self.settings.endpoint_equality_eps,
            f64::from(self.settings.polygon_min_area),
        )
        .extract(self.segments.values())
    }

    /// The nearest segment within the selection tolerance, in screen space. Ties go to the
    /// lower id.
    pub fn pick_segment(&self, view: &ViewState, screen: &Point2<f32>) -> Option<i32> {
        let mut best: Option<(f32, i32)> = None;
        for segment in self.segments.values() {
            let a = view.world_to_screen(&segment.start);
            let b = view.world_to_screen(&segment.end);
            let (distance, _) = point_segment_distance(screen, &a, &b);
            if distance > self.settings.selection_tolerance_px {
                continue;
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, segment.id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// The nearest endpoint within the endpoint tolerance, in screen space.
    pub fn pick_endpoint(&self, view: &ViewState, screen: &Point2<f32>) -> Option<(i32, Endpoint)> {
        let mut best: Option<(f32, i32, Endpoint)> = None;
        for segment in self.segments.values() {
            for &endpoint in &[Endpoint::Start, Endpoint::End] {
                let p = view.world_to_screen(segment.endpoint(endpoint));
                let distance = (p - *screen).norm();
                if distance > self.settings.endpoint_tolerance_px {
                    continue;
                }
                if best.map_or(true, |(d, _, _)| distance < d) {
                    best = Some((distance, segment.id, endpoint));
                }
            }
        }
        best.map(|(_, id, endpoint)| (id, endpoint))
    }

    fn view<'a>(&mut self, projector: &'a Projector) -> Option<&'a ViewState> {
        match projector.view() {
            Ok(view) => Some(view),
            Err(e) => {
                self.notices.warn(e.to_string());
                None
            }
        }
    }

    fn report(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.notices.warn(e.to_string());
        }
    }

    /// Pointer press at viewport pixel 'screen'.
    pub fn press(
        &mut self,
        screen: &Point2<f32>,
        button: Button,
        modifiers: Modifiers,
        projector: &Projector,
    ) {
        let view = match self.view(projector) {
            Some(view) => view,
            None => return,
        };
        let world = view.screen_to_world(screen);
        match (self.drawing_mode, button) {
            (DrawingMode::SingleLine, Button::Left) => self.single_line_click(world),
            (DrawingMode::SingleLine, Button::Right) => self.cancel_interaction(),
            (DrawingMode::Polyline, Button::Left) => self.polyline_click(world),
            (DrawingMode::Polyline, Button::Right) => self.finish_polyline(),
            (DrawingMode::Selection, Button::Left) => self.selection_click(view, screen, modifiers),
            (DrawingMode::Edit, Button::Left) => self.edit_press(view, screen),
            (DrawingMode::Edit, Button::Right) => self.cancel_interaction(),
            _ => (),
        }
    }

    /// Pointer movement, with or without a pressed button.
    pub fn drag(&mut self, screen: &Point2<f32>, projector: &Projector) {
        let world = match projector.view() {
            Ok(view) => view.screen_to_world(screen),
            Err(_) => return,
        };
        match &mut self.interaction {
            Interaction::SingleLine { cursor, .. } | Interaction::Polyline { cursor, .. } => {
                *cursor = world;
            }
            Interaction::MoveEndpoint {
                segment_id,
                endpoint,
                ..
            } => {
                if let Some(segment) = self.segments.get_mut(segment_id) {
                    *segment.endpoint_mut(*endpoint) = world;
                }
            }
            _ => (),
        }
    }

    /// Pointer release. Commits an endpoint move.
    pub fn release(&mut self, screen: &Point2<f32>, projector: &Projector) {
        if let Interaction::MoveEndpoint { .. } = self.interaction {
            self.drag(screen, projector);
        } else {
            return;
        }
        if let Interaction::MoveEndpoint {
            segment_id,
            endpoint,
            original,
        } = std::mem::replace(&mut self.interaction, Interaction::Idle)
        {
            let short = self
                .segments
                .get(&segment_id)
                .map(|s| self.check_length(&s.start, &s.end));
            if let Some(Err(e)) = short {
                if let Some(segment) = self.segments.get_mut(&segment_id) {
                    *segment.endpoint_mut(endpoint) = original;
                }
                self.notices.warn(e.to_string());
            }
        }
    }

    pub fn key(&mut self, key: Key) {
        match key {
            Key::Escape => match self.interaction {
                Interaction::Polyline { .. } => self.finish_polyline(),
                _ => self.cancel_interaction(),
            },
            Key::Delete => {
                if self.interaction == Interaction::Idle {
                    let count = self.delete_selected();
                    if count > 0 {
                        self.notices.info(format!("deleted {} segments", count));
                    }
                }
            }
        }
    }

    fn single_line_click(&mut self, world: Point3<f32>) {
        match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::SingleLine { start, .. } => {
                let result = self.add_segment(start, world).map(|_| ());
                self.report(result);
            }
            _ => {
                self.interaction = Interaction::SingleLine {
                    start: world,
                    cursor: world,
                }
            }
        }
    }

    fn polyline_click(&mut self, world: Point3<f32>) {
        let last = match &self.interaction {
            Interaction::Polyline { vertices, .. } => vertices.last().cloned(),
            _ => None,
        };
        let last = match last {
            Some(last) => last,
            None => {
                self.interaction = Interaction::Polyline {
                    vertices: vec![world],
                    cursor: world,
                };
                return;
            }
        };
        if let Err(e) = self.check_length(&last, &world) {
            self.notices.warn(e.to_string());
            return;
        }
        if let Interaction::Polyline { vertices, cursor } = &mut self.interaction {
            vertices.push(world);
            *cursor = world;
        }
    }

    /// Turns the pending vertices into segments and a polyline. Without a single segment the
    /// drawing is cancelled instead.
    fn finish_polyline(&mut self) {
        let vertices = match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::Polyline { vertices, .. } => vertices,
            other => {
                self.interaction = other;
                return;
            }
        };
        if vertices.len() < 2 {
            self.notices.info("cancelled polyline drawing");
            return;
        }
        let reserved = Self::ensure_ids(self.next_segment_id, vertices.len() - 1, "segment")
            .and_then(|_| Self::ensure_ids(self.next_polyline_id, 1, "polyline"));
        if reserved.is_err() {
            self.report(reserved);
            return;
        }
        let ids: Vec<i32> = vertices
            .windows(2)
            .map(|pair| self.allocate_segment(pair[0], pair[1]))
            .collect();
        let first = vertices[0];
        let last = vertices[vertices.len() - 1];
        let closed =
            vertices.len() > 3 && (last - first).norm() <= self.settings.endpoint_equality_eps;
        let result = self.create_polyline(&ids, closed).map(|_| ());
        self.report(result);
    }

    fn selection_click(&mut self, view: &ViewState, screen: &Point2<f32>, modifiers: Modifiers) {
        match self.pick_segment(view, screen) {
            Some(id) => {
                self.select(id, modifiers.toggle);
            }
            None if !modifiers.toggle => self.clear_selection(),
            None => (),
        }
    }

    fn edit_press(&mut self, view: &ViewState, screen: &Point2<f32>) {
        match self.edit_mode {
            EditMode::None => (),
            EditMode::MoveEndpoint => {
                if let Some((segment_id, endpoint)) = self.pick_endpoint(view, screen) {
                    if let Some(segment) = self.segments.get(&segment_id) {
                        self.interaction = Interaction::MoveEndpoint {
                            segment_id,
                            endpoint,
                            original: *segment.endpoint(endpoint),
                        };
                    }
                }
            }
            EditMode::SplitSegment => {
                if let Some(id) = self.pick_segment(view, screen) {
                    let world = view.screen_to_world(screen);
                    let result = self.split_segment(id, &world).map(|_| ());
                    self.report(result);
                }
            }
            EditMode::MergeSegments => {
                let picked = match self.pick_segment(view, screen) {
                    Some(id) => id,
                    None => return,
                };
                match self.interaction {
                    Interaction::Merge { first } => {
                        self.interaction = Interaction::Idle;
                        if let Some(segment) = self.segments.get_mut(&first) {
                            segment.selected = false;
                        }
                        let result = self.merge_segments(first, picked).map(|_| ());
                        self.report(result);
                    }
                    _ => {
                        self.select(picked, false);
                        self.interaction = Interaction::Merge { first: picked };
                    }
                }
            }
        }
    }
}
