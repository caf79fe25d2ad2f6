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

use approx::assert_abs_diff_eq;
use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{Point2, Point3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use tempdir::TempDir;
use wall_extraction::color;
use wall_extraction::colormap::ColorMapper;
use wall_extraction::config::Config;
use wall_extraction::errors::*;
use wall_extraction::line_engine::{Button, EditMode, LineEngine, Modifiers};
use wall_extraction::lod::{LodBuilder, LodStrategy};
use wall_extraction::math::Rect;
use wall_extraction::polygon::total_area;
use wall_extraction::projector::{Projector, Viewport};
use wall_extraction::read_write::{
    read_points_with_attributes, read_points_with_options, CancellationToken, ReadOptions,
};
use wall_extraction::scene::Scene;
use wall_extraction::{Point, PointCloud};

const LAS_HEADER_SIZE: usize = 227;
const LAS_FORMAT0_RECORD: usize = 20;

/// A LAS 1.2 file with point format 0 claiming 'declared' points and holding 'written'.
fn las_file(declared: u32, written: usize) -> Vec<u8> {
    let mut out = vec![0u8; LAS_HEADER_SIZE + written * LAS_FORMAT0_RECORD];
    out[0..4].copy_from_slice(b"LASF");
    out[24] = 1;
    out[25] = 2;
    LittleEndian::write_u16(&mut out[94..], LAS_HEADER_SIZE as u16);
    LittleEndian::write_u32(&mut out[96..], LAS_HEADER_SIZE as u32);
    out[104] = 0;
    LittleEndian::write_u16(&mut out[105..], LAS_FORMAT0_RECORD as u16);
    LittleEndian::write_u32(&mut out[107..], declared);
    for i in 0..3 {
        LittleEndian::write_f64(&mut out[131 + 8 * i..], 0.01);
    }
    for i in 0..written {
        let record = &mut out[LAS_HEADER_SIZE + i * LAS_FORMAT0_RECORD..];
        LittleEndian::write_i32(&mut record[0..], i as i32 * 100);
        LittleEndian::write_i32(&mut record[4..], 50);
        LittleEndian::write_i32(&mut record[8..], 0);
    }
    out
}

fn test_projector() -> Projector {
    let mut projector = Projector::new(Viewport::new(100, 100));
    projector
        .set_bounds(Rect::new(-10., -10., 20., 20.))
        .unwrap();
    projector
}

#[test]
fn pcd_ascii_three_points() {
    let dir = TempDir::new("scenarios").unwrap();
    let path = dir.path().join("three.pcd");
    fs::write(
        &path,
        "# .PCD v0.7 — Point Cloud Data file format\nVERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\n\
         TYPE F F F\nCOUNT 1 1 1\nWIDTH 3\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS 3\n\
         DATA ascii\n1 2 3\n4 5 6\n7 8 9\n",
    )
    .unwrap();
    let cloud = read_points_with_attributes(&path).unwrap();
    let positions: Vec<Point3<f32>> = cloud.positions().cloned().collect();
    assert_eq!(
        vec![
            Point3::new(1., 2., 3.),
            Point3::new(4., 5., 6.),
            Point3::new(7., 8., 9.)
        ],
        positions
    );
}

#[test]
fn las_with_corrupt_record_count() {
    let dir = TempDir::new("scenarios").unwrap();
    let path = dir.path().join("short.las");
    fs::write(&path, las_file(100, 50)).unwrap();
    let err = read_points_with_attributes(&path).unwrap_err();
    match err.kind() {
        ErrorKind::Decode(DecodeErrorKind::TruncatedFile, _, offset, detail) => {
            assert_eq!(Some((LAS_HEADER_SIZE + 50 * LAS_FORMAT0_RECORD) as u64), *offset);
            assert!(detail.contains("record 50"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().starts_with("decode: "));

    // The intact prefix alone decodes.
    fs::write(&path, las_file(50, 50)).unwrap();
    let cloud = read_points_with_attributes(&path).unwrap();
    assert_eq!(50, cloud.len());
    assert_abs_diff_eq!(49., cloud.points()[49].position.x, epsilon = 1e-5);
}

#[test]
fn shoelace_right_triangle() {
    let mut engine = LineEngine::default();
    let p = |x: f32, y: f32| Point3::new(x, y, 0.);
    engine.add_segment(p(0., 0.), p(2., 0.)).unwrap();
    engine.add_segment(p(2., 0.), p(2., 1.)).unwrap();
    engine.add_segment(p(2., 1.), p(0., 0.)).unwrap();
    // A stray wall that does not enclose anything.
    engine.add_segment(p(5., 5.), p(6., 5.)).unwrap();
    let polygons = engine.extract_polygons();
    assert_eq!(1, polygons.len());
    assert_eq!(1., polygons[0].area);
    assert_eq!(1., total_area(&polygons));
}

#[test]
fn projector_round_trip() {
    let projector = test_projector();
    assert_eq!(
        Point3::new(0., 0., 0.),
        projector.screen_to_world(&Point2::new(50., 50.)).unwrap()
    );
    assert_eq!(
        Point2::new(75., 75.),
        projector
            .world_to_screen(&Point3::new(5., 5., 0.))
            .unwrap()
    );
}

#[test]
fn height_scheme_mapping() {
    let mut mapper = ColorMapper::new();
    mapper.set_domain(0., 10.);
    assert_eq!(color::BLUE.to_u8(), mapper.color_for_value(0.));
    assert_eq!(color::RED.to_u8(), mapper.color_for_value(10.));
    // 5 is the middle stop exactly; 6.25 lies halfway between green and yellow.
    assert_eq!(color::GREEN.to_u8(), mapper.color_for_value(5.));
    assert_eq!(
        color::GREEN.lerp(&color::YELLOW, 0.5).to_u8(),
        mapper.color_for_value(6.25)
    );
}

#[test]
fn merge_of_disconnected_segments_is_a_notice() {
    let mut projector = Projector::new(Viewport::new(100, 100));
    projector.set_bounds(Rect::new(0., 0., 10., 10.)).unwrap();
    let mut engine = LineEngine::default();
    let a = engine
        .add_segment(Point3::new(0., 0., 0.), Point3::new(1., 0., 0.))
        .unwrap();
    let b = engine
        .add_segment(Point3::new(2., 2., 0.), Point3::new(3., 2., 0.))
        .unwrap();
    engine.set_edit_mode(EditMode::MergeSegments);
    for screen in &[Point2::new(5., 1.), Point2::new(25., 20.)] {
        engine.press(screen, Button::Left, Modifiers::default(), &projector);
    }
    let notices = engine.drain_notices();
    assert_eq!(1, notices.len());
    assert!(notices[0].message.contains("DisconnectedMerge"));
    let ids: Vec<i32> = engine.segments().map(|s| s.id).collect();
    assert_eq!(vec![a, b], ids);
    assert_eq!(Point3::new(1., 0., 0.), engine.segment(a).unwrap().end);

    match engine.merge_segments(a, b).unwrap_err().kind() {
        ErrorKind::Geometry(GeometryErrorKind::DisconnectedMerge, _) => (),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn decoded_coordinates_are_finite() {
    let dir = TempDir::new("scenarios").unwrap();
    let path = dir.path().join("holes.xyz");
    fs::write(&path, "# scan\n1 2 3\nnan 1 1\n4 inf 6\n// note\n7 8 9\n").unwrap();
    let cloud = read_points_with_attributes(&path).unwrap();
    assert_eq!(2, cloud.len());
    assert!(cloud.points().iter().all(Point::is_finite));
}

#[test]
fn cancelled_decode_returns_nothing() {
    let dir = TempDir::new("scenarios").unwrap();
    let path = dir.path().join("cloud.las");
    fs::write(&path, las_file(50, 50)).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let err = read_points_with_options(&path, &mut ReadOptions::default().with_cancellation(&token))
        .unwrap_err();
    match err.kind() {
        ErrorKind::Decode(DecodeErrorKind::Cancelled, ..) => (),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn clear_all_resets_every_cache() {
    let mut scene = Scene::new(Config::default(), Viewport::new(40, 30));
    let points = (0..200)
        .map(|i| Point::new((i % 20) as f32, (i / 20) as f32, 0.5))
        .collect();
    scene.replace_cloud(PointCloud::new(points));
    scene.render().unwrap();
    assert!(scene.projector().view().is_ok());
    scene.clear_all();
    assert!(scene.cloud().is_empty());
    assert!(!scene.has_index() && !scene.has_lod());
    assert!(scene.projector().view().is_err());
    let image = scene.render().unwrap();
    assert!(image.pixels().all(|p| p.0[3] == 0));
    assert_eq!(0, scene.render_stats().rendered_points);
}

#[test]
fn screen_world_round_trip_within_half_pixel() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut projector = Projector::new(Viewport::new(1280, 720));
    projector
        .set_bounds(Rect::new(-5321.7, 812.25, 97.5, 41.3))
        .unwrap();
    let upp = projector.view().unwrap().units_per_pixel();
    for _ in 0..1000 {
        let screen = Point2::new(rng.gen_range(0f32, 1280f32), rng.gen_range(0f32, 720f32));
        let world = projector.screen_to_world(&screen).unwrap();
        let back = projector.world_to_screen(&world).unwrap();
        assert!((back - screen).norm() <= 0.5);

        let again = projector.screen_to_world(&back).unwrap();
        assert!((again.x - world.x).abs() <= upp.x);
        assert!((again.y - world.y).abs() <= upp.y);
    }
}

#[test]
fn lod_levels_shrink_and_keep_order() {
    let mut rng = StdRng::seed_from_u64(3);
    let points: Vec<Point> = (0..2000)
        .map(|_| {
            Point::new(
                rng.gen_range(0f32, 20f32),
                rng.gen_range(0f32, 20f32),
                rng.gen_range(0f32, 3f32),
            )
        })
        .collect();
    let cloud = PointCloud::new(points);
    for &strategy in &[
        LodStrategy::Uniform,
        LodStrategy::Voxel,
        LodStrategy::Random,
        LodStrategy::Importance,
    ] {
        let pyramid = LodBuilder::new(strategy, 0.5).with_seed(11).build(&cloud, None);
        assert_eq!(cloud.points(), pyramid.level(0).unwrap().cloud.points());
        for pair in pyramid.levels().windows(2) {
            assert!(pair[0].cloud.len() >= pair[1].cloud.len(), "{:?}", strategy);
        }
    }
}

#[test]
fn annotations_survive_a_round_trip() {
    let dir = TempDir::new("scenarios").unwrap();
    let path = dir.path().join("walls.json");
    let mut engine = LineEngine::default();
    let p = |x: f32, y: f32| Point3::new(x, y, 0.);
    let a = engine.add_segment(p(0.1234567, 0.), p(4., 0.)).unwrap();
    let b = engine.add_segment(p(4., 0.), p(4., 3.)).unwrap();
    engine.add_segment(p(-1., -1.), p(-2., -7.5)).unwrap();
    engine.create_polyline(&[a, b], true).unwrap();
    engine.set_segment_description(b, "east wall");
    engine.save(&path).unwrap();

    let mut loaded = LineEngine::default();
    loaded.load(&path).unwrap();
    let before: Vec<_> = engine.segments().collect();
    let after: Vec<_> = loaded.segments().collect();
    assert_eq!(before.len(), after.len());
    for (x, y) in before.iter().zip(after.iter()) {
        assert_eq!(x.id, y.id);
        assert!((x.start - y.start).norm() <= 1e-6);
        assert!((x.end - y.end).norm() <= 1e-6);
        assert_eq!(x.description, y.description);
        assert_eq!(x.polyline_id, y.polyline_id);
    }
    let polylines: Vec<_> = loaded.polylines().collect();
    assert_eq!(1, polylines.len());
    assert_eq!(vec![a, b], polylines[0].segment_ids);
    assert!(polylines[0].closed);
}

#[test]
fn shoelace_matches_monte_carlo() {
    let mut engine = LineEngine::default();
    // An L-shaped room of area 12.
    let ring = [(0., 0.), (4., 0.), (4., 2.), (2., 2.), (2., 4.), (0., 4.)];
    for i in 0..ring.len() {
        let (x0, y0) = ring[i];
        let (x1, y1) = ring[(i + 1) % ring.len()];
        engine
            .add_segment(Point3::new(x0, y0, 0.), Point3::new(x1, y1, 0.))
            .unwrap();
    }
    let polygons = engine.extract_polygons();
    assert_eq!(1, polygons.len());
    let polygon = &polygons[0];
    assert_abs_diff_eq!(12., polygon.area, epsilon = 1e-9);

    let mut rng = StdRng::seed_from_u64(1);
    let samples = 1_000_000;
    let inside = (0..samples)
        .filter(|_| {
            let p = Point2::new(rng.gen_range(0f32, 4f32), rng.gen_range(0f32, 4f32));
            polygon.contains(&p)
        })
        .count();
    let estimate = 16. * inside as f64 / f64::from(samples);
    assert!((estimate - polygon.area).abs() / polygon.area < 0.01);
}

#[test]
fn polygon_extraction_is_deterministic() {
    let mut engine = LineEngine::default();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..60 {
        let x = rng.gen_range(0i32, 6i32) as f32;
        let y = rng.gen_range(0i32, 6i32) as f32;
        let (dx, dy) = if rng.gen() { (1., 0.) } else { (0., 1.) };
        engine
            .add_segment(Point3::new(x, y, 0.), Point3::new(x + dx, y + dy, 0.))
            .unwrap();
    }
    assert_eq!(engine.extract_polygons(), engine.extract_polygons());
}

#[test]
fn removing_segments_cleans_polylines() {
    let mut engine = LineEngine::default();
    let p = |x: f32| Point3::new(x, 0., 0.);
    let ids: Vec<i32> = (0..3)
        .map(|i| engine.add_segment(p(i as f32), p(i as f32 + 1.)).unwrap())
        .collect();
    let polyline = engine.create_polyline(&ids, false).unwrap();
    engine.remove_segment(ids[1]);
    assert_eq!(vec![ids[0], ids[2]], engine.polyline(polyline).unwrap().segment_ids);
    engine.remove_segment(ids[0]);
    engine.remove_segment(ids[2]);
    assert!(engine.polyline(polyline).is_none());
    assert_eq!(0, engine.polyline_count());
}
