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

//! JSON persistence of the annotations.

use super::{LineEngine, LineSegment, Polyline};
use crate::color::Color;
use crate::errors::*;
use nalgebra::Point3;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use time::{Format, OffsetDateTime};

pub const ANNOTATION_VERSION: &str = "1.0";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub segment_count: usize,
    pub polyline_count: usize,
    pub total_length: f64,
    pub selected_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    pub id: i32,
    pub start: [f32; 3],
    pub end: [f32; 3],
    #[serde(default)]
    pub polyline_id: Option<i32>,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    #[serde(default)]
    pub selected: bool,
    pub color: Color<u8>,
    /// Derived, ignored on load.
    #[serde(default)]
    pub length: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolylineRecord {
    pub id: i32,
    pub segment_ids: Vec<i32>,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    #[serde(default)]
    pub closed: bool,
    pub color: Color<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDocument {
    pub version: String,
    pub created: String,
    pub line_segments: Vec<SegmentRecord>,
    pub polylines: Vec<PolylineRecord>,
    #[serde(default)]
    pub statistics: Statistics,
}

fn schema_mismatch(detail: impl Into<String>) -> Error {
    persistence_error(PersistenceErrorKind::SchemaMismatch, detail)
}

fn to_array(p: &Point3<f32>) -> [f32; 3] {
    [p.x, p.y, p.z]
}

fn to_point(what: &str, id: i32, a: [f32; 3]) -> Result<Point3<f32>> {
    if a.iter().any(|v| !v.is_finite()) {
        return Err(schema_mismatch(format!(
            "{} {} has a non-finite coordinate",
            what, id
        )));
    }
    Ok(Point3::new(a[0], a[1], a[2]))
}

fn parse_time(what: &str, id: i32, s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, Format::Rfc3339).map_err(|e| {
        schema_mismatch(format!("{} {} has an invalid timestamp '{}': {}", what, id, s, e))
    })
}

impl LineEngine {
    pub fn to_document(&self) -> AnnotationDocument {
        AnnotationDocument {
            version: ANNOTATION_VERSION.to_string(),
            created: OffsetDateTime::now_utc().format(Format::Rfc3339),
            line_segments: self
                .segments
                .values()
                .map(|s| SegmentRecord {
                    id: s.id,
                    start: to_array(&s.start),
                    end: to_array(&s.end),
                    polyline_id: s.polyline_id,
                    description: s.description.clone(),
                    created_at: s.created_at.format(Format::Rfc3339),
                    selected: s.selected,
                    color: s.color,
                    length: s.length(),
                })
                .collect(),
            polylines: self
                .polylines
                .values()
                .map(|p| PolylineRecord {
                    id: p.id,
                    segment_ids: p.segment_ids.clone(),
                    description: p.description.clone(),
                    created_at: p.created_at.format(Format::Rfc3339),
                    closed: p.closed,
                    color: p.color,
                })
                .collect(),
            statistics: self.statistics(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path.as_ref(), json).map_err(|e| {
            persistence_error(
                PersistenceErrorKind::IoFailure,
                format!("could not write '{}': {}", path.as_ref().display(), e),
            )
        })?;
        tracing::info!(
            "saved {} segments and {} polylines to {}",
            self.segments.len(),
            self.polylines.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let json = fs::read_to_string(path.as_ref()).map_err(|e| {
            persistence_error(
                PersistenceErrorKind::IoFailure,
                format!("could not read '{}': {}", path.as_ref().display(), e),
            )
        })?;
        self.load_json(&json)
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let document: AnnotationDocument =
            serde_json::from_str(json).map_err(|e| schema_mismatch(e.to_string()))?;
        self.restore(document)
    }

    /// Replaces the current annotations. References that do not resolve are dropped and empty
    /// polylines pruned; the engine is untouched if the document is rejected.
    pub fn restore(&mut self, document: AnnotationDocument) -> Result<()> {
        if document.version != ANNOTATION_VERSION {
            return Err(schema_mismatch(format!(
                "unsupported version '{}'",
                document.version
            )));
        }
        let mut segments = BTreeMap::new();
        for record in document.line_segments {
            if record.id < 1 {
                return Err(schema_mismatch(format!("invalid segment id {}", record.id)));
            }
            let segment = LineSegment {
                id: record.id,
                start: to_point("segment", record.id, record.start)?,
                end: to_point("segment", record.id, record.end)?,
                polyline_id: record.polyline_id,
                description: record.description,
                created_at: parse_time("segment", record.id, &record.created_at)?,
                selected: record.selected,
                color: record.color,
            };
            if segments.insert(record.id, segment).is_some() {
                return Err(schema_mismatch(format!("duplicate segment id {}", record.id)));
            }
        }
        let mut polylines = BTreeMap::new();
        for record in document.polylines {
            if record.id < 1 {
                return Err(schema_mismatch(format!("invalid polyline id {}", record.id)));
            }
            let polyline = Polyline {
                id: record.id,
                segment_ids: record.segment_ids,
                description: record.description,
                created_at: parse_time("polyline", record.id, &record.created_at)?,
                closed: record.closed,
                color: record.color,
            };
            if polylines.insert(record.id, polyline).is_some() {
                return Err(schema_mismatch(format!("duplicate polyline id {}", record.id)));
            }
        }

        // Each segment belongs to the first polyline listing it.
        let mut dangling = 0;
        let mut owner = BTreeMap::new();
        for polyline in polylines.values_mut() {
            let mut kept = Vec::with_capacity(polyline.segment_ids.len());
            let mut seen = BTreeSet::new();
            for id in &polyline.segment_ids {
                if segments.contains_key(id) && !owner.contains_key(id) && seen.insert(*id) {
                    owner.insert(*id, polyline.id);
                    kept.push(*id);
                } else {
                    dangling += 1;
                }
            }
            polyline.segment_ids = kept;
        }
        for segment in segments.values_mut() {
            let claimed = owner.get(&segment.id).cloned();
            if segment.polyline_id.is_some() && segment.polyline_id != claimed {
                dangling += 1;
            }
            segment.polyline_id = claimed;
        }
        let before = polylines.len();
        polylines.retain(|_, p| !p.segment_ids.is_empty());
        let pruned = before - polylines.len();

        let next_id = |what: &str, last: Option<&i32>| match last {
            None => Ok(1),
            Some(&last) => last
                .checked_add(1)
                .ok_or_else(|| schema_mismatch(format!("{} id {} leaves no room", what, last))),
        };
        let next_segment_id = next_id("segment", segments.keys().next_back())?;
        let next_polyline_id = next_id("polyline", polylines.keys().next_back())?;

        self.clear_all();
        self.next_segment_id = next_segment_id;
        self.next_polyline_id = next_polyline_id;
        self.segments = segments;
        self.polylines = polylines;
        if dangling > 0 {
            let error = persistence_error(
                PersistenceErrorKind::DanglingReference,
                format!("dropped {} references that did not resolve", dangling),
            );
            self.notices.warn(error.to_string());
        }
        if pruned > 0 {
            self.notices
                .info(format!("pruned {} empty polylines", pruned));
        }
        tracing::info!(
            "loaded {} segments and {} polylines",
            self.segments.len(),
            self.polylines.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn engine() -> LineEngine {
        let mut engine = LineEngine::default();
        let a = engine
            .add_segment(Point3::new(0., 0., 0.), Point3::new(1., 0., 0.))
            .unwrap();
        let b = engine
            .add_segment(Point3::new(1., 0., 0.), Point3::new(1., 2., 0.))
            .unwrap();
        engine
            .add_segment(Point3::new(5., 5., 0.), Point3::new(6., 5., 0.))
            .unwrap();
        let polyline = engine.create_polyline(&[a, b], true).unwrap();
        engine.set_segment_description(a, "north wall");
        engine.set_polyline_description(polyline, "room");
        engine.select(b, false);
        engine
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new("annotations").unwrap();
        let path = dir.path().join("walls.json");
        let original = engine();
        original.save(&path).unwrap();

        let mut loaded = LineEngine::default();
        loaded.load(&path).unwrap();
        let ids: Vec<i32> = loaded.segments().map(|s| s.id).collect();
        assert_eq!(vec![1, 2, 3], ids);
        assert_eq!("north wall", loaded.segment(1).unwrap().description);
        assert_eq!(Some(1), loaded.segment(2).unwrap().polyline_id);
        assert!(loaded.segment(2).unwrap().selected);
        let polyline = loaded.polyline(1).unwrap();
        assert_eq!(vec![1, 2], polyline.segment_ids);
        assert!(polyline.closed);
        assert_eq!("room", polyline.description);
        assert_eq!(original.statistics(), loaded.statistics());

        // Id counters continue after the loaded maximum.
        let next = loaded
            .add_segment(Point3::new(0., 0., 0.), Point3::new(0., 1., 0.))
            .unwrap();
        assert_eq!(4, next);
    }

    #[test]
    fn test_document_layout() {
        let json = engine().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!("1.0", value["version"]);
        assert_eq!(3, value["lineSegments"].as_array().unwrap().len());
        assert_eq!(1, value["lineSegments"][0]["polylineId"]);
        assert_eq!(serde_json::Value::Null, value["lineSegments"][2]["polylineId"]);
        assert_eq!(3, value["statistics"]["segmentCount"]);
        assert!(value["created"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_dangling_references_are_dropped() {
        let mut document = engine().to_document();
        document.polylines[0].segment_ids.push(42);
        document.line_segments[2].polyline_id = Some(7);
        document.polylines.push(PolylineRecord {
            id: 9,
            segment_ids: vec![99],
            description: String::new(),
            created_at: document.created.clone(),
            closed: false,
            color: Color::rgb(0, 0, 0),
        });
        let mut engine = LineEngine::default();
        engine.restore(document).unwrap();
        assert_eq!(vec![1, 2], engine.polyline(1).unwrap().segment_ids);
        assert_eq!(None, engine.segment(3).unwrap().polyline_id);
        assert!(engine.polyline(9).is_none());
        assert_eq!(1, engine.polyline_count());
        let notices = engine.drain_notices();
        assert!(notices[0].message.contains("DanglingReference"));
    }

    #[test]
    fn test_schema_mismatch() {
        let mut engine = engine();
        let mut document = engine.to_document();
        document.version = "2.0".to_string();
        match engine.restore(document).unwrap_err().kind() {
            ErrorKind::Persistence(PersistenceErrorKind::SchemaMismatch, _) => (),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(engine.load_json("{\"version\": \"1.0\"}").is_err());
        // Rejected documents leave the engine alone.
        assert_eq!(3, engine.segment_count());

        match engine.load("/nonexistent/walls.json").unwrap_err().kind() {
            ErrorKind::Persistence(PersistenceErrorKind::IoFailure, _) => (),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_ids_at_the_top_of_the_range() {
        let mut engine = engine();
        let mut document = engine.to_document();
        document.line_segments[2].id = i32::max_value();
        match engine.restore(document).unwrap_err().kind() {
            ErrorKind::Persistence(PersistenceErrorKind::SchemaMismatch, _) => (),
            other => panic!("unexpected error {:?}", other),
        }
        let mut document = engine.to_document();
        document.polylines[0].id = i32::max_value();
        assert!(engine.restore(document).is_err());
        let mut document = engine.to_document();
        document.line_segments[2].id = 0;
        assert!(engine.restore(document).is_err());
        assert_eq!(vec![1, 2, 3], engine.segments().map(|s| s.id).collect::<Vec<_>>());

        // The last representable id loads, but nothing can be allocated after it.
        let mut document = engine.to_document();
        document.line_segments[2].id = i32::max_value() - 1;
        engine.restore(document).unwrap();
        let err = engine
            .add_segment(Point3::new(0., 0., 0.), Point3::new(0., 1., 0.))
            .unwrap_err();
        match err.kind() {
            ErrorKind::ResourceExhausted(ResourceErrorKind::OutOfMemory, _) => (),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(3, engine.segment_count());
        assert!(engine.split_segment(1, &Point3::new(0.5, 0., 0.)).is_err());
        assert_eq!(vec![1, 2], engine.polyline(1).unwrap().segment_ids);
    }
}
