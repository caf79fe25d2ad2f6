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

//! Point cloud decoding: format detection, metadata and the per-format readers.

pub mod coordinates;
pub mod las;
pub mod pcd;
pub mod ply;
pub mod xyz;

pub use self::coordinates::{transform, CoordinateSystem, Transformed};

use crate::errors::*;
use crate::math::Aabb;
use crate::{AttributeValue, Point, PointCloud, BLUE, CLASSIFICATION, GREEN, INTENSITY, RED};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Beyond this absolute coordinate value f32 positions lose centimetre precision.
pub const LARGE_COORDINATE: f32 = 1e5;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    PcdAscii,
    PcdBinary,
    PcdBinaryCompressed,
    PlyAscii,
    PlyBinary,
    Las,
    Laz,
    Xyz,
    Txt,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Format::PcdAscii => "PCD (ascii)",
            Format::PcdBinary => "PCD (binary)",
            Format::PcdBinaryCompressed => "PCD (binary_compressed)",
            Format::PlyAscii => "PLY (ascii)",
            Format::PlyBinary => "PLY (binary)",
            Format::Las => "LAS",
            Format::Laz => "LAZ",
            Format::Xyz => "XYZ",
            Format::Txt => "TXT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub format: Format,
    pub point_count: u64,
    pub bounding_box: Option<Aabb>,
    pub attributes_present: Vec<String>,
    pub coord_system: CoordinateSystem,
    /// Set when any absolute coordinate exceeds 'LARGE_COORDINATE'. Downstream stages may
    /// offset the cloud to its centroid.
    pub large_coordinates: bool,
}

impl Metadata {
    fn new(
        format: Format,
        point_count: u64,
        bounding_box: Option<Aabb>,
        attributes_present: Vec<String>,
        coord_system: CoordinateSystem,
    ) -> Self {
        let large_coordinates = bounding_box.as_ref().map_or(false, has_large_coordinates);
        Metadata {
            format,
            point_count,
            bounding_box,
            attributes_present,
            coord_system,
            large_coordinates,
        }
    }
}

pub fn has_large_coordinates(bbox: &Aabb) -> bool {
    bbox.min()
        .coords
        .iter()
        .chain(bbox.max().coords.iter())
        .any(|v| v.abs() > LARGE_COORDINATE)
}

/// Cooperative cancellation for long decodes. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress reporting and cancellation for a single decode. The progress callback receives a
/// percentage and fires at most once per percent.
#[derive(Default)]
pub struct ReadOptions<'a> {
    progress: Option<&'a mut dyn FnMut(u8)>,
    cancel: Option<&'a CancellationToken>,
    last_percent: Option<u8>,
}

impl<'a> ReadOptions<'a> {
    pub fn with_progress(mut self, progress: &'a mut dyn FnMut(u8)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Called by the readers after each record, 'done' out of 'total' units.
    pub(crate) fn update(&mut self, path: &Path, done: u64, total: u64) -> Result<()> {
        if self.cancel.map_or(false, CancellationToken::is_cancelled) {
            return Err(decode_error(
                DecodeErrorKind::Cancelled,
                path,
                None,
                format!("cancelled after {} of {}", done, total),
            ));
        }
        if let Some(progress) = self.progress.as_mut() {
            let percent = if total == 0 {
                100
            } else {
                (done.min(total) * 100 / total) as u8
            };
            if self.last_percent != Some(percent) {
                self.last_percent = Some(percent);
                progress(percent);
            }
        }
        Ok(())
    }
}

/// A streaming reader: yields points in file order and knows how far it got.
pub trait PointSource: Iterator<Item = Result<Point>> {
    /// '(done, total)' in reader-specific units (records or bytes).
    fn progress(&self) -> (u64, u64);
}

/// Scalar types shared by the PCD and PLY field descriptions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
        }
    }

    /// Reads one little endian value from the front of 'buf'.
    pub fn read_le(self, buf: &[u8]) -> f64 {
        use byteorder::{ByteOrder, LittleEndian};
        match self {
            DataType::Int8 => f64::from(buf[0] as i8),
            DataType::Uint8 => f64::from(buf[0]),
            DataType::Int16 => f64::from(LittleEndian::read_i16(buf)),
            DataType::Uint16 => f64::from(LittleEndian::read_u16(buf)),
            DataType::Int32 => f64::from(LittleEndian::read_i32(buf)),
            DataType::Uint32 => f64::from(LittleEndian::read_u32(buf)),
            DataType::Int64 => LittleEndian::read_i64(buf) as f64,
            DataType::Uint64 => LittleEndian::read_u64(buf) as f64,
            DataType::Float32 => f64::from(LittleEndian::read_f32(buf)),
            DataType::Float64 => LittleEndian::read_f64(buf),
        }
    }

    pub fn to_attribute(self, value: f64) -> AttributeValue {
        match self {
            DataType::Uint8 => AttributeValue::U8(value as u8),
            DataType::Uint16 => AttributeValue::U16(value as u16),
            DataType::Uint32 => AttributeValue::U32(value as u32),
            DataType::Int8 | DataType::Int16 | DataType::Int32 => AttributeValue::I32(value as i32),
            DataType::Float32 => AttributeValue::F32(value as f32),
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => AttributeValue::F64(value),
        }
    }
}

/// Stores a decoded scalar under its attribute key. The known keys are normalised to their
/// fixed types; anything else keeps the type it was declared with.
pub(crate) fn assign_attribute(point: &mut Point, name: &str, value: f64, data_type: DataType) {
    let clamp_u16 = |v: f64| v.round().max(0.).min(f64::from(u16::max_value())) as u16;
    let (key, value) = match name {
        "intensity" => (INTENSITY, AttributeValue::U16(clamp_u16(value))),
        "classification" | "label" => (
            CLASSIFICATION,
            AttributeValue::U8(value.round().max(0.).min(255.) as u8),
        ),
        "red" | "r" => (RED, AttributeValue::U16(clamp_u16(value))),
        "green" | "g" => (GREEN, AttributeValue::U16(clamp_u16(value))),
        "blue" | "b" => (BLUE, AttributeValue::U16(clamp_u16(value))),
        other => {
            point
                .attributes
                .insert(other.to_string(), data_type.to_attribute(value));
            return;
        }
    };
    point.attributes.insert(key.to_string(), value);
}

/// The attribute keys a list of field names will produce, in canonical order.
pub(crate) fn known_attributes<'a>(fields: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut present = Vec::new();
    for field in fields {
        let keys: &[&str] = match field {
            "intensity" => &[INTENSITY],
            "classification" | "label" => &[CLASSIFICATION],
            "red" | "r" => &[RED],
            "green" | "g" => &[GREEN],
            "blue" | "b" => &[BLUE],
            "rgb" | "rgba" => &[RED, GREEN, BLUE],
            _ => &[],
        };
        present.extend(keys.iter().map(|k| k.to_string()));
    }
    let order = [INTENSITY, CLASSIFICATION, RED, GREEN, BLUE];
    present.sort_by_key(|k| order.iter().position(|o| *o == k.as_str()));
    present.dedup();
    present
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Identifies the format by magic bytes, falling back to the file extension. PCD headers are
/// parsed to tell the three body encodings apart.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<Format> {
    let path = path.as_ref();
    let mut magic = Vec::with_capacity(512);
    File::open(path)?.take(512).read_to_end(&mut magic)?;
    let ext = extension(path);

    if magic.starts_with(las::SIGNATURE) {
        return las::detect(path, &magic);
    }
    if ext == "las" || ext == "laz" {
        return Err(decode_error(
            DecodeErrorKind::BadHeader,
            path,
            Some(0),
            "missing LASF signature",
        ));
    }
    if magic.starts_with(b"ply") {
        return ply::detect(path, &magic);
    }
    if ext == "pcd" || magic.starts_with(b"# .PCD") || magic.starts_with(b"VERSION") {
        return pcd::detect(path);
    }
    match ext.as_str() {
        "xyz" => Ok(Format::Xyz),
        "txt" | "pts" => Ok(Format::Txt),
        _ => Err(decode_error(
            DecodeErrorKind::UnsupportedFormat,
            path,
            None,
            format!("unrecognised point cloud format '{}'", ext),
        )),
    }
}

/// Header-only for LAS; the other formats carry no point count or bounds in a reliable form and
/// are decoded in full.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    match format {
        Format::Las | Format::Laz => {
            let metadata = las::read_metadata(path, format)?;
            warn_if_large(path, &metadata);
            Ok(metadata)
        }
        _ => read_with_metadata(path, &mut ReadOptions::default()).map(|(metadata, _)| metadata),
    }
}

/// Decodes the points once and describes them. Progress and cancellation follow 'options'.
pub fn read_with_metadata<P: AsRef<Path>>(
    path: P,
    options: &mut ReadOptions,
) -> Result<(Metadata, PointCloud)> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    let cloud = read_points_with_options(path, options)?;
    let metadata = match format {
        Format::Las | Format::Laz => las::read_metadata(path, format)?,
        _ => {
            let attributes_present = match format {
                Format::PcdAscii | Format::PcdBinary | Format::PcdBinaryCompressed => {
                    pcd::read_header(path)?.attributes_present()
                }
                Format::PlyAscii => ply::PlyReader::open(path)?.attributes_present(),
                _ => known_attributes(
                    cloud
                        .points()
                        .first()
                        .into_iter()
                        .flat_map(|p| p.attributes.keys().map(String::as_str)),
                ),
            };
            Metadata::new(
                format,
                cloud.len() as u64,
                cloud.bounding_box().copied(),
                attributes_present,
                CoordinateSystem::Unknown,
            )
        }
    };
    warn_if_large(path, &metadata);
    Ok((metadata, cloud))
}

fn warn_if_large(path: &Path, metadata: &Metadata) {
    if metadata.large_coordinates {
        tracing::warn!(
            "{}: coordinates exceed {}, consider recentring",
            path.display(),
            LARGE_COORDINATE
        );
    }
}

pub fn read_positions<P: AsRef<Path>>(path: P) -> Result<Vec<nalgebra::Point3<f32>>> {
    Ok(read_points_with_attributes(path)?
        .into_points()
        .into_iter()
        .map(|p| p.position)
        .collect())
}

pub fn read_points_with_attributes<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    read_points_with_options(path, &mut ReadOptions::default())
}

/// Decodes the whole file. Either every record decodes or an error is returned; a cancelled
/// read returns 'Cancelled' and nothing else.
pub fn read_points_with_options<P: AsRef<Path>>(
    path: P,
    options: &mut ReadOptions,
) -> Result<PointCloud> {
    let path = path.as_ref();
    let format = detect_format(path)?;
    options.update(path, 0, 1)?;
    let cloud = match format {
        Format::Las => collect_points(las::LasReader::open(path)?, path, options)?,
        Format::Laz => {
            return Err(decode_error(
                DecodeErrorKind::UnsupportedFormat,
                path,
                None,
                "LAZ decompression backend is not available",
            ))
        }
        Format::PcdAscii | Format::PcdBinary | Format::PcdBinaryCompressed => {
            PointCloud::new(pcd::read_points(path, options)?)
        }
        Format::PlyAscii => collect_points(ply::PlyReader::open(path)?, path, options)?,
        Format::PlyBinary => {
            return Err(decode_error(
                DecodeErrorKind::UnsupportedFormat,
                path,
                None,
                "binary PLY is not supported",
            ))
        }
        Format::Xyz | Format::Txt => collect_points(xyz::XyzReader::open(path)?, path, options)?,
    };
    tracing::info!(
        "read {} points from {} ({})",
        cloud.len(),
        path.display(),
        format
    );
    Ok(cloud)
}

fn collect_points<S: PointSource>(
    mut source: S,
    path: &Path,
    options: &mut ReadOptions,
) -> Result<PointCloud> {
    let mut cloud = PointCloud::default();
    while let Some(point) = source.next() {
        cloud.push(point?);
        let (done, total) = source.progress();
        options.update(path, done, total)?;
    }
    let (_, total) = source.progress();
    options.update(path, total, total)?;
    Ok(cloud)
}
