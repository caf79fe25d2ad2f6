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

//! ASCII PLY. The header is parsed in full, but only ascii bodies are decoded.

use crate::errors::*;
use crate::read_write::{assign_attribute, known_attributes, DataType, Format, PointSource};
use crate::Point;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Copy, Clone, PartialEq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug)]
enum Property {
    Scalar { name: String, data_type: DataType },
    // List properties are skipped when decoding.
    List { name: String },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name } => name,
        }
    }
}

#[derive(Debug)]
struct Element {
    name: String,
    count: u64,
    properties: Vec<Property>,
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
    offset: Vector3<f64>,
}

fn parse_data_type(input: &str) -> Option<DataType> {
    Some(match input {
        "float" | "float32" => DataType::Float32,
        "double" | "float64" => DataType::Float64,
        "char" | "int8" => DataType::Int8,
        "uchar" | "uint8" => DataType::Uint8,
        "short" | "int16" => DataType::Int16,
        "ushort" | "uint16" => DataType::Uint16,
        "int" | "int32" => DataType::Int32,
        "uint" | "uint32" => DataType::Uint32,
        _ => return None,
    })
}

fn parse_header<R: BufRead>(path: &Path, reader: &mut R) -> Result<Header> {
    let invalid = |detail: String| decode_error(DecodeErrorKind::BadHeader, path, None, detail);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(invalid("not a PLY file".to_string()));
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    let mut offset = Vector3::zeros();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(decode_error(
                DecodeErrorKind::TruncatedFile,
                path,
                None,
                "PLY header has no end_header",
            ));
        }
        let entries: Vec<&str> = line.split_whitespace().collect();
        match entries.as_slice() {
            [] => continue,
            ["format", kind, version] => {
                if *version != "1.0" {
                    return Err(invalid(format!("invalid version: {}", version)));
                }
                encoding = Some(match *kind {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::BinaryLittleEndian,
                    "binary_big_endian" => Encoding::BinaryBigEndian,
                    _ => return Err(invalid(format!("invalid format: {}", kind))),
                });
            }
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| invalid(format!("invalid count: {}", count)))?,
                properties: Vec::new(),
            }),
            ["property", "list", _, _, name] => match elements.last_mut() {
                Some(element) => element.properties.push(Property::List {
                    name: name.to_string(),
                }),
                None => return Err(invalid(format!("property outside of element: {}", name))),
            },
            ["property", data_type, name] => {
                let data_type = parse_data_type(data_type)
                    .ok_or_else(|| invalid(format!("invalid data type: {}", data_type)))?;
                match elements.last_mut() {
                    Some(element) => element.properties.push(Property::Scalar {
                        name: name.to_string(),
                        data_type,
                    }),
                    None => {
                        return Err(invalid(format!("property outside of element: {}", name)))
                    }
                }
            }
            ["comment", "offset:", x, y, z] => {
                let parse = |v: &str| {
                    v.parse::<f64>()
                        .map_err(|_| invalid(format!("invalid offset: {}", v)))
                };
                offset = Vector3::new(parse(*x)?, parse(*y)?, parse(*z)?);
            }
            ["comment", ..] | ["obj_info", ..] => {}
            ["end_header"] => break,
            _ => return Err(invalid(format!("invalid line: {}", line.trim()))),
        }
    }

    let encoding = encoding.ok_or_else(|| invalid("no format specified".to_string()))?;
    Ok(Header {
        encoding,
        elements,
        offset,
    })
}

pub(crate) fn detect(path: &Path, magic: &[u8]) -> Result<Format> {
    let text = String::from_utf8_lossy(magic);
    if text.contains("format ascii") {
        Ok(Format::PlyAscii)
    } else if text.contains("format binary") {
        Ok(Format::PlyBinary)
    } else {
        Err(decode_error(
            DecodeErrorKind::BadHeader,
            path,
            None,
            "PLY header has no format line",
        ))
    }
}

/// Streams the vertices of an ascii PLY file.
pub struct PlyReader {
    path: PathBuf,
    reader: BufReader<File>,
    vertex: Element,
    offset: Vector3<f64>,
    index: u64,
    dropped: u64,
}

impl PlyReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = parse_header(path, &mut reader)?;
        if header.encoding != Encoding::Ascii {
            return Err(decode_error(
                DecodeErrorKind::UnsupportedFormat,
                path,
                None,
                format!("{:?} PLY is not supported", header.encoding),
            ));
        }

        let mut line = String::new();
        let mut vertex = None;
        for element in header.elements {
            if element.name == "vertex" {
                vertex = Some(element);
                break;
            }
            // Elements ahead of the vertices take one line per entry.
            for _ in 0..element.count {
                line.clear();
                reader.read_line(&mut line)?;
            }
        }
        let vertex = vertex.ok_or_else(|| {
            decode_error(
                DecodeErrorKind::BadHeader,
                path,
                None,
                "PLY has no 'vertex' element",
            )
        })?;
        for axis in &["x", "y", "z"] {
            if !vertex.properties.iter().any(|p| p.name() == *axis) {
                return Err(decode_error(
                    DecodeErrorKind::BadHeader,
                    path,
                    None,
                    format!("PLY vertex has no property '{}'", axis),
                ));
            }
        }

        Ok(PlyReader {
            path: path.to_path_buf(),
            reader,
            vertex,
            offset: header.offset,
            index: 0,
            dropped: 0,
        })
    }

    pub fn num_total_points(&self) -> u64 {
        self.vertex.count
    }

    pub fn attributes_present(&self) -> Vec<String> {
        known_attributes(self.vertex.properties.iter().map(Property::name))
    }

    fn parse_vertex(&self, line: &str) -> Option<Point> {
        let mut tokens = line.split_whitespace();
        let mut position = self.offset;
        let mut point = Point::new(0., 0., 0.);
        for property in &self.vertex.properties {
            match property {
                Property::List { .. } => {
                    let len: usize = tokens.next()?.parse().ok()?;
                    for _ in 0..len {
                        tokens.next()?;
                    }
                }
                Property::Scalar { name, data_type } => {
                    let value: f64 = tokens.next()?.parse().ok()?;
                    match name.as_str() {
                        "x" => position.x += value,
                        "y" => position.y += value,
                        "z" => position.z += value,
                        other => assign_attribute(&mut point, other, value, *data_type),
                    }
                }
            }
        }
        point.position.x = position.x as f32;
        point.position.y = position.y as f32;
        point.position.z = position.z as f32;
        Some(point)
    }
}

impl Iterator for PlyReader {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        while self.index < self.vertex.count {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    let detail = format!(
                        "PLY body ends after {} of {} vertices",
                        self.index, self.vertex.count
                    );
                    self.index = self.vertex.count;
                    return Some(Err(decode_error(
                        DecodeErrorKind::TruncatedFile,
                        &self.path,
                        None,
                        detail,
                    )));
                }
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
            if line.trim().is_empty() {
                continue;
            }
            self.index += 1;
            match self.parse_vertex(&line) {
                Some(point) if point.is_finite() => return Some(Ok(point)),
                Some(_) => self.dropped += 1,
                None => {
                    let detail = format!(
                        "PLY vertex {} does not match the header: '{}'",
                        self.index - 1,
                        line.trim()
                    );
                    self.index = self.vertex.count;
                    return Some(Err(decode_error(
                        DecodeErrorKind::BadHeader,
                        &self.path,
                        None,
                        detail,
                    )));
                }
            }
        }
        if self.dropped > 0 {
            tracing::warn!(
                "{}: dropped {} non-finite vertices",
                self.path.display(),
                self.dropped
            );
            self.dropped = 0;
        }
        None
    }
}

impl PointSource for PlyReader {
    fn progress(&self) -> (u64, u64) {
        (self.index, self.vertex.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    const HEADER: &str = "ply\nformat ascii 1.0\ncomment made by hand\nelement camera 1\nproperty float fov\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nproperty list uchar int tags\nend_header\n";

    #[test]
    fn test_ascii_vertices() {
        let dir = TempDir::new("ply").unwrap();
        let path = dir.path().join("cloud.ply");
        fs::write(
            &path,
            format!(
                "{}60\n1 2 3 255 0 0 2 7 8\n4 5 6 0 255 0 0\n7 8 9 0 0 255 1 4\n",
                HEADER
            ),
        )
        .unwrap();
        let reader = PlyReader::open(&path).unwrap();
        assert_eq!(3, reader.num_total_points());
        assert_eq!(
            vec!["red", "green", "blue"],
            reader.attributes_present()
        );
        let points: Vec<Point> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(3, points.len());
        assert_eq!(nalgebra::Point3::new(4., 5., 6.), points[1].position);
        assert_eq!(Some([0, 0, 255]), points[2].rgb());
    }

    #[test]
    fn test_missing_vertices() {
        let dir = TempDir::new("ply").unwrap();
        let path = dir.path().join("short.ply");
        fs::write(&path, format!("{}60\n1 2 3 255 0 0 0\n", HEADER)).unwrap();
        let result: Result<Vec<Point>> = PlyReader::open(&path).unwrap().collect();
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_is_rejected() {
        let dir = TempDir::new("ply").unwrap();
        let path = dir.path().join("binary.ply");
        fs::write(
            &path,
            "ply\nformat binary_little_endian 1.0\nelement vertex 0\nproperty float x\nend_header\n",
        )
        .unwrap();
        assert!(PlyReader::open(&path).is_err());
        assert_eq!(
            Format::PlyBinary,
            detect(&path, &fs::read(&path).unwrap()).unwrap()
        );
    }

    #[test]
    fn test_malformed_vertex() {
        let dir = TempDir::new("ply").unwrap();
        let path = dir.path().join("garbled.ply");
        fs::write(
            &path,
            format!("{}60\n1 2 3 255 0 0 0\nnot a vertex\n7 8 9 0 0 255 0\n", HEADER),
        )
        .unwrap();
        let result: Result<Vec<Point>> = PlyReader::open(&path).unwrap().collect();
        match result.unwrap_err().kind() {
            ErrorKind::Decode(DecodeErrorKind::BadHeader, _, _, detail) => {
                assert!(detail.contains("vertex 1"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
