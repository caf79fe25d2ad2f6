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

//! PCD v0.7 with ascii, binary and binary_compressed bodies. Compressed bodies that do not
//! follow the PCL layout are recovered heuristically, but only a decode that passes
//! 'validate_recovered' is ever accepted.

use crate::errors::*;
use crate::read_write::{assign_attribute, known_attributes, DataType, Format, ReadOptions};
use crate::{AttributeValue, Point, BLUE, GREEN, RED};
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const MAX_HEADER_BYTES: u64 = 64 * 1024;

/// Offsets tried for a zlib stream when the PCL layout does not decompress.
const PROBE_OFFSETS: [usize; 7] = [0, 4, 8, 12, 16, 32, 64];

const MIN_RECOVERED_POINTS: usize = 100;
const MAX_RECOVERED_COORDINATE: f32 = 1e6;
const MIN_FINITE_FRACTION: f32 = 0.8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataMode {
    Ascii,
    Binary,
    BinaryCompressed,
}

impl DataMode {
    fn as_str(self) -> &'static str {
        match self {
            DataMode::Ascii => "ascii",
            DataMode::Binary => "binary",
            DataMode::BinaryCompressed => "binary_compressed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcdField {
    pub name: String,
    pub data_type: DataType,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcdHeader {
    pub version: String,
    pub fields: Vec<PcdField>,
    pub width: u64,
    pub height: u64,
    pub viewpoint: Vec<f64>,
    pub points: u64,
    pub data: DataMode,
    /// First byte after the 'DATA <mode>' line.
    pub data_start: usize,
}

fn bad_header(path: &Path, detail: String) -> Error {
    decode_error(DecodeErrorKind::BadHeader, path, None, detail)
}

fn data_type(path: &Path, kind: &str, size: usize) -> Result<DataType> {
    Ok(match (kind, size) {
        ("F", 4) => DataType::Float32,
        ("F", 8) => DataType::Float64,
        ("U", 1) => DataType::Uint8,
        ("U", 2) => DataType::Uint16,
        ("U", 4) => DataType::Uint32,
        ("U", 8) => DataType::Uint64,
        ("I", 1) => DataType::Int8,
        ("I", 2) => DataType::Int16,
        ("I", 4) => DataType::Int32,
        ("I", 8) => DataType::Int64,
        _ => {
            return Err(bad_header(
                path,
                format!("unsupported field type {} of size {}", kind, size),
            ))
        }
    })
}

fn parse_values<T: FromStr>(path: &Path, key: &str, values: &[&str]) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| bad_header(path, format!("invalid {} value '{}'", key, v)))
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl PcdHeader {
    /// Parses the header from the start of 'bytes', which must at least reach past the DATA line.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let mut version = String::new();
        let mut names: Vec<String> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let mut types: Vec<String> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let (mut width, mut height) = (0u64, 1u64);
        let mut viewpoint: Vec<f64> = vec![0., 0., 0., 1., 0., 0., 0.];
        let mut points: Option<u64> = None;
        let mut data = None;

        for line in bytes.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line);
            let entries: Vec<&str> = line.split_whitespace().collect();
            if entries.is_empty() || entries[0].starts_with('#') {
                continue;
            }
            let values = &entries[1..];
            match entries[0].to_ascii_uppercase().as_str() {
                "VERSION" => version = values.join(" "),
                "FIELDS" => names = values.iter().map(|v| v.to_ascii_lowercase()).collect(),
                "SIZE" => sizes = parse_values(path, "SIZE", values)?,
                "TYPE" => types = values.iter().map(|v| v.to_ascii_uppercase()).collect(),
                "COUNT" => counts = parse_values(path, "COUNT", values)?,
                "WIDTH" => {
                    width = parse_values(path, "WIDTH", values)?
                        .first()
                        .copied()
                        .unwrap_or(0)
                }
                "HEIGHT" => {
                    height = parse_values(path, "HEIGHT", values)?
                        .first()
                        .copied()
                        .unwrap_or(1)
                }
                "VIEWPOINT" => viewpoint = parse_values(path, "VIEWPOINT", values)?,
                "POINTS" => points = parse_values(path, "POINTS", values)?.first().copied(),
                "DATA" => {
                    data = Some(match values.first().map(|v| v.to_ascii_lowercase()) {
                        Some(ref mode) if mode == "ascii" => DataMode::Ascii,
                        Some(ref mode) if mode == "binary" => DataMode::Binary,
                        Some(ref mode) if mode == "binary_compressed" => {
                            DataMode::BinaryCompressed
                        }
                        other => {
                            return Err(bad_header(
                                path,
                                format!("unsupported DATA mode {:?}", other),
                            ))
                        }
                    });
                    break;
                }
                // Unknown keys are tolerated.
                _ => {}
            }
        }

        let data = data.ok_or_else(|| bad_header(path, "no DATA line".to_string()))?;
        if names.is_empty() {
            return Err(bad_header(path, "no FIELDS line".to_string()));
        }
        if counts.is_empty() {
            counts = vec![1; names.len()];
        }
        if sizes.len() != names.len() || types.len() != names.len() || counts.len() != names.len()
        {
            return Err(bad_header(
                path,
                format!(
                    "{} fields but {} sizes, {} types and {} counts",
                    names.len(),
                    sizes.len(),
                    types.len(),
                    counts.len()
                ),
            ));
        }
        for axis in &["x", "y", "z"] {
            if !names.iter().any(|n| n == *axis) {
                return Err(bad_header(path, format!("missing field '{}'", axis)));
            }
        }
        let fields = names
            .into_iter()
            .zip(sizes.into_iter().zip(types.iter().zip(counts.into_iter())))
            .map(|(name, (size, (kind, count)))| {
                Ok(PcdField {
                    name,
                    data_type: data_type(path, kind, size)?,
                    count: count.max(1),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // The DATA line is located by scanning for its literal bytes; positions reported by line
        // oriented parsing are not trusted once binary data follows.
        let marker = format!("DATA {}", data.as_str());
        let data_start = find(bytes, marker.as_bytes())
            .map(|start| {
                let after = start + marker.len();
                match bytes[after..].iter().position(|&b| b == b'\n') {
                    Some(newline) => after + newline + 1,
                    None => bytes.len(),
                }
            })
            .ok_or_else(|| bad_header(path, format!("'{}' not found", marker)))?;

        let points = match points {
            Some(points) => points,
            None => width.checked_mul(height).ok_or_else(|| {
                bad_header(path, format!("WIDTH {} x HEIGHT {} overflows", width, height))
            })?,
        };
        let header = PcdHeader {
            version,
            fields,
            width,
            height,
            viewpoint,
            points,
            data,
            data_start,
        };
        if header.body_len().is_none() {
            return Err(bad_header(
                path,
                format!("POINTS {} overflows the addressable body size", points),
            ));
        }
        Ok(header)
    }

    pub fn format(&self) -> Format {
        match self.data {
            DataMode::Ascii => Format::PcdAscii,
            DataMode::Binary => Format::PcdBinary,
            DataMode::BinaryCompressed => Format::PcdBinaryCompressed,
        }
    }

    pub fn point_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.data_type.size() * f.count)
            .sum()
    }

    pub fn attributes_present(&self) -> Vec<String> {
        known_attributes(self.fields.iter().map(|f| f.name.as_str()))
    }

    /// Bytes of an uncompressed body holding every declared point, if that is addressable.
    pub fn body_len(&self) -> Option<usize> {
        usize::try_from(self.points)
            .ok()?
            .checked_mul(self.point_size())
    }
}

pub fn read_header(path: &Path) -> Result<PcdHeader> {
    let mut bytes = Vec::new();
    File::open(path)?
        .take(MAX_HEADER_BYTES)
        .read_to_end(&mut bytes)?;
    PcdHeader::parse(path, &bytes)
}

pub(crate) fn detect(path: &Path) -> Result<Format> {
    Ok(read_header(path)?.format())
}

/// A decoded field value. 'bits' keeps the raw 32 bit pattern for packed colour fields.
#[derive(Debug, Copy, Clone)]
struct Value {
    number: f64,
    bits: u32,
}

/// Builds a point from per-field values; 'value(field, element)' yields the decoded scalar.
fn assemble_point<F>(header: &PcdHeader, mut value: F) -> Option<Point>
where
    F: FnMut(usize, usize) -> Option<Value>,
{
    let mut point = Point::new(0., 0., 0.);
    for (index, field) in header.fields.iter().enumerate() {
        match field.name.as_str() {
            "x" => point.position.x = value(index, 0)?.number as f32,
            "y" => point.position.y = value(index, 0)?.number as f32,
            "z" => point.position.z = value(index, 0)?.number as f32,
            "rgb" | "rgba" => {
                let bits = value(index, 0)?.bits;
                for &(shift, key) in [(16, RED), (8, GREEN), (0, BLUE)].iter() {
                    point.attributes.insert(
                        key.to_string(),
                        AttributeValue::U16(((bits >> shift) & 0xff) as u16),
                    );
                }
            }
            "_" => {}
            name if field.count == 1 => {
                assign_attribute(&mut point, name, value(index, 0)?.number, field.data_type)
            }
            _ => {}
        }
    }
    Some(point)
}

fn binary_value(data_type: DataType, bytes: &[u8]) -> Value {
    Value {
        number: data_type.read_le(bytes),
        bits: if data_type.size() >= 4 {
            LittleEndian::read_u32(bytes)
        } else {
            0
        },
    }
}

/// Decodes point-interleaved records.
fn decode_rows(header: &PcdHeader, data: &[u8], count: usize) -> Vec<Point> {
    let point_size = header.point_size();
    let mut field_offsets = Vec::with_capacity(header.fields.len());
    let mut offset = 0;
    for field in &header.fields {
        field_offsets.push(offset);
        offset += field.data_type.size() * field.count;
    }
    (0..count)
        .filter_map(|i| {
            let row = &data[i * point_size..(i + 1) * point_size];
            assemble_point(header, |field, element| {
                let data_type = header.fields[field].data_type;
                let start = field_offsets[field] + element * data_type.size();
                Some(binary_value(data_type, &row[start..]))
            })
        })
        .collect()
}

/// Decodes the PCL compressed layout, where all values of one field are stored contiguously.
fn decode_columns(header: &PcdHeader, data: &[u8], count: usize) -> Vec<Point> {
    let mut field_offsets = Vec::with_capacity(header.fields.len());
    let mut offset = 0;
    for field in &header.fields {
        field_offsets.push(offset);
        offset += field.data_type.size() * field.count * count;
    }
    (0..count)
        .filter_map(|i| {
            assemble_point(header, |field, element| {
                let f = &header.fields[field];
                let size = f.data_type.size();
                let start = field_offsets[field] + (i * f.count + element) * size;
                Some(binary_value(f.data_type, &data[start..]))
            })
        })
        .collect()
}

fn parse_ascii_value(data_type: DataType, token: &str) -> Option<Value> {
    match data_type {
        DataType::Float32 | DataType::Float64 => {
            let number = token.parse::<f64>().ok()?;
            Some(Value {
                number,
                bits: (number as f32).to_bits(),
            })
        }
        _ => {
            let number = token.parse::<f64>().ok()?;
            Some(Value {
                number,
                bits: number as u32,
            })
        }
    }
}

fn read_ascii(
    path: &Path,
    header: &PcdHeader,
    body: &[u8],
    options: &mut ReadOptions,
) -> Result<Vec<Point>> {
    let mut column_starts = Vec::with_capacity(header.fields.len());
    let mut columns = 0;
    for field in &header.fields {
        column_starts.push(columns);
        columns += field.count;
    }

    let expected = header.points;
    let text = String::from_utf8_lossy(body);
    // Every value takes at least one character and one separator.
    let max_rows = body.len() / (2 * columns.max(1));
    let capacity = usize::try_from(expected).unwrap_or(max_rows).min(max_rows);
    let mut points = Vec::with_capacity(capacity);
    let mut consumed = 0u64;
    let mut dropped = 0u64;
    for line in text.lines() {
        if consumed == expected {
            break;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        consumed += 1;
        let point = if tokens.len() < columns {
            None
        } else {
            assemble_point(header, |field, element| {
                parse_ascii_value(
                    header.fields[field].data_type,
                    tokens[column_starts[field] + element],
                )
            })
        };
        match point {
            Some(point) if point.is_finite() => points.push(point),
            Some(_) => dropped += 1,
            None => {
                return Err(bad_header(
                    path,
                    format!(
                        "ascii record {} does not match the FIELDS header: '{}'",
                        consumed - 1,
                        line.trim()
                    ),
                ))
            }
        }
        options.update(path, consumed, expected)?;
    }
    if consumed < expected {
        return Err(decode_error(
            DecodeErrorKind::TruncatedFile,
            path,
            Some(body.len() as u64),
            format!("PCD ascii body ends after {} of {} points", consumed, expected),
        ));
    }
    if dropped > 0 {
        tracing::warn!("{}: dropped {} non-finite points", path.display(), dropped);
    }
    Ok(points)
}

fn read_binary(
    path: &Path,
    header: &PcdHeader,
    body: &[u8],
    options: &mut ReadOptions,
) -> Result<Vec<Point>> {
    let point_size = header.point_size();
    let needed = header
        .body_len()
        .ok_or_else(|| bad_header(path, format!("POINTS {} is not addressable", header.points)))?;
    let expected = needed / point_size.max(1);
    if body.len() < needed {
        let complete = body.len() / point_size.max(1);
        return Err(decode_error(
            DecodeErrorKind::TruncatedFile,
            path,
            Some((header.data_start + complete * point_size) as u64),
            format!("truncated PCD at record {}", complete),
        ));
    }
    let mut points = Vec::with_capacity(expected);
    // Records are decoded in chunks so progress and cancellation stay responsive.
    let chunk = 10_000;
    let mut start = 0;
    while start < expected {
        let end = (start + chunk).min(expected);
        let records = &body[start * point_size..end * point_size];
        points.extend(
            decode_rows(header, records, end - start)
                .into_iter()
                .filter(Point::is_finite),
        );
        options.update(path, end as u64, expected as u64)?;
        start = end;
    }
    if points.len() < expected {
        tracing::warn!(
            "{}: dropped {} non-finite points",
            path.display(),
            expected - points.len()
        );
    }
    Ok(points)
}

/// Accepts a heuristic decode only if it looks like a real cloud.
fn validate_recovered(points: &[Point]) -> bool {
    if points.len() < MIN_RECOVERED_POINTS {
        return false;
    }
    let finite: Vec<&Point> = points.iter().filter(|p| p.is_finite()).collect();
    if (finite.len() as f32) < MIN_FINITE_FRACTION * points.len() as f32 {
        return false;
    }
    finite.iter().all(|p| {
        p.position.x.abs() <= MAX_RECOVERED_COORDINATE
            && p.position.y.abs() <= MAX_RECOVERED_COORDINATE
            && p.position.z.abs() <= MAX_RECOVERED_COORDINATE
    })
}

fn inflate<R: Read>(mut decoder: R, limit: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match (&mut decoder).take(limit as u64).read_to_end(&mut out) {
        Ok(_) if !out.is_empty() => Some(out),
        _ => None,
    }
}

/// zlib first, then a headerless deflate stream.
fn decompress(data: &[u8], limit: usize) -> Option<Vec<u8>> {
    inflate(ZlibDecoder::new(data), limit).or_else(|| inflate(DeflateDecoder::new(data), limit))
}

/// Tries both layouts on a decompressed buffer and keeps the first that validates. Only the PCL
/// layout stores fields contiguously, so the other strategies try point records first.
fn decode_candidate(header: &PcdHeader, data: &[u8], columns_first: bool) -> Option<Vec<Point>> {
    let point_size = header.point_size();
    if point_size == 0 {
        return None;
    }
    let expected = usize::try_from(header.points).unwrap_or(usize::MAX);
    let as_columns = || match header.body_len() {
        Some(needed) if data.len() >= needed => decode_columns(header, data, expected),
        _ => Vec::new(),
    };
    let as_rows = || decode_rows(header, data, (data.len() / point_size).min(expected));
    let first = if columns_first { as_columns() } else { as_rows() };
    if validate_recovered(&first) {
        return Some(first);
    }
    let second = if columns_first { as_rows() } else { as_columns() };
    if validate_recovered(&second) {
        return Some(second);
    }
    None
}

fn read_binary_compressed(path: &Path, header: &PcdHeader, body: &[u8]) -> Result<Vec<Point>> {
    let limit = header.body_len().unwrap_or(usize::MAX).max(1);
    // PCL layout: uncompressed size and compressed size as u32, then the zlib payload.
    let pcl_payload = if body.len() >= 8 {
        let compressed_size = LittleEndian::read_u32(&body[4..]) as usize;
        if compressed_size > 0 && compressed_size <= body.len() - 8 {
            Some(&body[8..8 + compressed_size])
        } else {
            None
        }
    } else {
        None
    };
    let mut points = pcl_payload
        .and_then(|payload| decompress(payload, limit))
        .and_then(|data| decode_candidate(header, &data, true));
    if points.is_none() {
        points = decompress(body, limit).and_then(|data| decode_candidate(header, &data, false));
        if points.is_some() {
            tracing::warn!("{}: decoded a raw zlib stream", path.display());
        }
    }
    if points.is_none() {
        for &offset in PROBE_OFFSETS.iter().filter(|&&o| o < body.len()) {
            if let Some(data) = decompress(&body[offset..], limit) {
                points = decode_candidate(header, &data, false);
                if points.is_some() {
                    tracing::warn!(
                        "{}: recovered zlib stream at offset {}",
                        path.display(),
                        offset
                    );
                    break;
                }
            }
        }
    }
    if points.is_none() {
        points = decode_candidate(header, body, false);
        if points.is_some() {
            tracing::warn!(
                "{}: body is not compressed, decoded raw records",
                path.display()
            );
        }
    }

    match points {
        Some(points) => {
            let total = points.len();
            let finite: Vec<Point> = points.into_iter().filter(Point::is_finite).collect();
            if finite.len() < total {
                tracing::warn!(
                    "{}: dropped {} non-finite points",
                    path.display(),
                    total - finite.len()
                );
            }
            Ok(finite)
        }
        None => Err(decode_error(
            DecodeErrorKind::DecompressionFailed,
            path,
            Some(header.data_start as u64),
            "no decompression strategy produced a valid cloud",
        )),
    }
}

pub(crate) fn read_points(path: &Path, options: &mut ReadOptions) -> Result<Vec<Point>> {
    let bytes = fs::read(path)?;
    let header = PcdHeader::parse(path, &bytes)?;
    let body = &bytes[header.data_start..];
    tracing::debug!(
        "PCD {} with {} points, {} bytes per point",
        header.data.as_str(),
        header.points,
        header.point_size()
    );
    match header.data {
        DataMode::Ascii => read_ascii(path, &header, body, options),
        DataMode::Binary => read_binary(path, &header, body, options),
        DataMode::BinaryCompressed => {
            let points = read_binary_compressed(path, &header, body)?;
            options.update(path, header.points, header.points)?;
            Ok(points)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempdir::TempDir;

    fn header_text(fields: &str, sizes: &str, types: &str, points: usize, mode: &str) -> String {
        format!(
            "# .PCD v0.7 - Point Cloud Data file format\nVERSION 0.7\nFIELDS {}\nSIZE {}\nTYPE {}\nCOUNT {}\nWIDTH {}\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {}\nDATA {}\n",
            fields,
            sizes,
            types,
            vec!["1"; fields.split_whitespace().count()].join(" "),
            points,
            points,
            mode
        )
    }

    fn grid(n: usize) -> Vec<[f32; 3]> {
        (0..n)
            .map(|i| [(i % 10) as f32, (i / 10) as f32, (i % 7) as f32 * 0.5])
            .collect()
    }

    fn rows(points: &[[f32; 3]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in points {
            for v in p {
                out.write_f32::<LittleEndian>(*v).unwrap();
            }
        }
        out
    }

    fn columns(points: &[[f32; 3]]) -> Vec<u8> {
        let mut out = Vec::new();
        for axis in 0..3 {
            for p in points {
                out.write_f32::<LittleEndian>(p[axis]).unwrap();
            }
        }
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn write(dir: &TempDir, name: &str, header: &str, body: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(body);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn positions(points: &[Point]) -> Vec<[f32; 3]> {
        points
            .iter()
            .map(|p| [p.position.x, p.position.y, p.position.z])
            .collect()
    }

    #[test]
    fn test_ascii_with_intensity() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z intensity", "4 4 4 4", "F F F F", 3, "ascii");
        let path = write(&dir, "a.pcd", &header, b"1 2 3 10\nnan 0 0 5\n7 8 9 300.4\n");
        let points = read_points(&path, &mut ReadOptions::default()).unwrap();
        assert_eq!(vec![[1., 2., 3.], [7., 8., 9.]], positions(&points));
        assert_eq!(Some(300), points[1].intensity());
    }

    #[test]
    fn test_ascii_short_body_is_truncated() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z", "4 4 4", "F F F", 3, "ascii");
        let path = write(&dir, "short.pcd", &header, b"1 2 3\n");
        assert!(read_points(&path, &mut ReadOptions::default()).is_err());
    }

    #[test]
    fn test_binary_rows() {
        let dir = TempDir::new("pcd").unwrap();
        let cloud = grid(20);
        let header = header_text("x y z", "4 4 4", "F F F", cloud.len(), "binary");
        let path = write(&dir, "b.pcd", &header, &rows(&cloud));
        assert_eq!(Format::PcdBinary, detect(&path).unwrap());
        let points = read_points(&path, &mut ReadOptions::default()).unwrap();
        assert_eq!(cloud, positions(&points));
    }

    #[test]
    fn test_packed_rgb() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z rgb", "4 4 4 4", "F F F F", 1, "binary");
        let mut body = rows(&[[1., 2., 3.]]);
        body.write_u32::<LittleEndian>(0x00ff_8001).unwrap();
        let path = write(&dir, "rgb.pcd", &header, &body);
        let points = read_points(&path, &mut ReadOptions::default()).unwrap();
        assert_eq!(Some([255, 128, 1]), points[0].rgb());
    }

    #[test]
    fn test_pcl_compressed_layout() {
        let dir = TempDir::new("pcd").unwrap();
        let cloud = grid(150);
        let raw = columns(&cloud);
        let compressed = zlib(&raw);
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(raw.len() as u32).unwrap();
        body.write_u32::<LittleEndian>(compressed.len() as u32).unwrap();
        body.extend_from_slice(&compressed);
        let header = header_text("x y z", "4 4 4", "F F F", cloud.len(), "binary_compressed");
        let path = write(&dir, "c.pcd", &header, &body);
        assert_eq!(Format::PcdBinaryCompressed, detect(&path).unwrap());
        let points = read_points(&path, &mut ReadOptions::default()).unwrap();
        assert_eq!(cloud, positions(&points));
    }

    #[test]
    fn test_recovers_shifted_zlib_stream() {
        let dir = TempDir::new("pcd").unwrap();
        let cloud = grid(150);
        let mut body = vec![0xab; 12];
        body.extend_from_slice(&zlib(&rows(&cloud)));
        let header = header_text("x y z", "4 4 4", "F F F", cloud.len(), "binary_compressed");
        let path = write(&dir, "shifted.pcd", &header, &body);
        let points = read_points(&path, &mut ReadOptions::default()).unwrap();
        assert_eq!(cloud, positions(&points));
    }

    #[test]
    fn test_garbage_fails_validation() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z", "4 4 4", "F F F", 150, "binary_compressed");
        let body: Vec<u8> = (0..1800u32).map(|i| (i * 7919 % 251) as u8 | 0x70).collect();
        let path = write(&dir, "garbage.pcd", &header, &body);
        let err = read_points(&path, &mut ReadOptions::default()).unwrap_err();
        match err.kind() {
            ErrorKind::Decode(kind, ..) => {
                assert_eq!(DecodeErrorKind::DecompressionFailed, *kind)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_header_requires_xyz() {
        let header = header_text("x y intensity", "4 4 4", "F F F", 1, "ascii");
        assert!(PcdHeader::parse(Path::new("h.pcd"), header.as_bytes()).is_err());
    }

    fn decode_kind(path: &Path) -> DecodeErrorKind {
        match read_points(path, &mut ReadOptions::default()).unwrap_err().kind() {
            ErrorKind::Decode(kind, ..) => *kind,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_huge_point_counts_are_rejected() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z", "4 4 4", "F F F", 1, "ascii")
            .replace("POINTS 1", "POINTS 1000000000000000000");
        let path = write(&dir, "huge_ascii.pcd", &header, b"1 2 3\n");
        assert_eq!(DecodeErrorKind::TruncatedFile, decode_kind(&path));

        let header = header_text("x y z", "4 4 4", "F F F", 1, "binary")
            .replace("POINTS 1", "POINTS 2000000000000000000");
        let path = write(&dir, "huge_binary.pcd", &header, &rows(&grid(1)));
        assert_eq!(DecodeErrorKind::BadHeader, decode_kind(&path));

        let header = header_text("x y z", "4 4 4", "F F F", 1, "binary")
            .replace("WIDTH 1", "WIDTH 4294967296")
            .replace("HEIGHT 1", "HEIGHT 4294967296")
            .replace("POINTS 1\n", "");
        assert!(PcdHeader::parse(Path::new("wide.pcd"), header.as_bytes()).is_err());
    }

    #[test]
    fn test_malformed_ascii_record() {
        let dir = TempDir::new("pcd").unwrap();
        let header = header_text("x y z", "4 4 4", "F F F", 3, "ascii");
        let path = write(&dir, "bad.pcd", &header, b"1 2 3\nfour five six\n7 8 9\n");
        let err = read_points(&path, &mut ReadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("ascii record 1"));
        assert_eq!(DecodeErrorKind::BadHeader, decode_kind(&path));
    }
}
