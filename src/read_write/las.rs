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

//! LAS 1.2 - 1.4. Only the public header block and the fixed part of the point records are
//! interpreted; variable length records are only scanned for a coordinate system hint.

use crate::errors::*;
use crate::math::Aabb;
use crate::read_write::{CoordinateSystem, Format, Metadata, PointSource};
use crate::{AttributeValue, Point, BLUE, CLASSIFICATION, GREEN, INTENSITY, RED};
use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const SIGNATURE: &[u8] = b"LASF";

/// The public header block of LAS 1.2; later versions only append to it.
const MIN_HEADER_SIZE: usize = 227;
const LAS_14_HEADER_SIZE: usize = 375;
const MAX_VLR_SCAN: u64 = 64 * 1024;

/// Minimum record length per point data record format 0 - 10.
const MIN_RECORD_LENGTH: [u16; 11] = [20, 28, 26, 34, 57, 63, 30, 36, 38, 59, 67];

#[derive(Debug, Clone, PartialEq)]
pub struct LasHeader {
    pub version: (u8, u8),
    pub header_size: u16,
    pub point_data_offset: u32,
    pub point_format: u8,
    pub compressed: bool,
    pub record_length: u16,
    pub point_count: u64,
    pub scale: Vector3<f64>,
    pub offset: Vector3<f64>,
    pub min: Point3<f64>,
    pub max: Point3<f64>,
    pub coord_system: CoordinateSystem,
}

fn bad_header(path: &Path, offset: u64, detail: String) -> Error {
    decode_error(DecodeErrorKind::BadHeader, path, Some(offset), detail)
}

impl LasHeader {
    pub fn read(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::with_capacity(LAS_14_HEADER_SIZE);
        (&mut file)
            .take(LAS_14_HEADER_SIZE as u64)
            .read_to_end(&mut bytes)?;
        let mut header = LasHeader::parse(path, &bytes)?;

        let vlr_start = u64::from(header.header_size);
        let vlr_end = u64::from(header.point_data_offset);
        if vlr_end > vlr_start {
            let mut vlrs = Vec::new();
            file.seek(SeekFrom::Start(vlr_start))?;
            file.take((vlr_end - vlr_start).min(MAX_VLR_SCAN))
                .read_to_end(&mut vlrs)?;
            header.coord_system = CoordinateSystem::from_wkt(&String::from_utf8_lossy(&vlrs));
        }
        Ok(header)
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_HEADER_SIZE {
            return Err(decode_error(
                DecodeErrorKind::TruncatedFile,
                path,
                Some(bytes.len() as u64),
                format!(
                    "LAS header is {} bytes, need at least {}",
                    bytes.len(),
                    MIN_HEADER_SIZE
                ),
            ));
        }
        if &bytes[0..4] != SIGNATURE {
            return Err(bad_header(path, 0, "missing LASF signature".to_string()));
        }
        let version = (bytes[24], bytes[25]);
        if version.0 != 1 || !(2..=4).contains(&version.1) {
            return Err(bad_header(
                path,
                24,
                format!("unsupported LAS version {}.{}", version.0, version.1),
            ));
        }

        let raw_format = bytes[104];
        let point_format = raw_format & 0x3f;
        if point_format > 10 {
            return Err(bad_header(
                path,
                104,
                format!("unsupported point record format {}", point_format),
            ));
        }
        let record_length = LittleEndian::read_u16(&bytes[105..]);
        let min_length = MIN_RECORD_LENGTH[point_format as usize];
        if record_length < min_length {
            return Err(bad_header(
                path,
                105,
                format!(
                    "record length {} is too short for point format {} (need {})",
                    record_length, point_format, min_length
                ),
            ));
        }

        let mut point_count = u64::from(LittleEndian::read_u32(&bytes[107..]));
        if point_count == 0 && version.1 == 4 && bytes.len() >= 255 {
            point_count = LittleEndian::read_u64(&bytes[247..]);
        }

        let read_f64s = |start: usize| {
            Vector3::new(
                LittleEndian::read_f64(&bytes[start..]),
                LittleEndian::read_f64(&bytes[start + 8..]),
                LittleEndian::read_f64(&bytes[start + 16..]),
            )
        };
        let scale = read_f64s(131);
        let offset = read_f64s(155);
        if scale.iter().any(|s| !s.is_finite() || *s == 0.) || offset.iter().any(|o| !o.is_finite())
        {
            return Err(bad_header(
                path,
                131,
                format!("invalid scale {:?} or offset {:?}", scale, offset),
            ));
        }

        Ok(LasHeader {
            version,
            header_size: LittleEndian::read_u16(&bytes[94..]),
            point_data_offset: LittleEndian::read_u32(&bytes[96..]),
            point_format,
            compressed: raw_format & 0x80 != 0,
            record_length,
            point_count,
            scale,
            offset,
            max: Point3::new(
                LittleEndian::read_f64(&bytes[179..]),
                LittleEndian::read_f64(&bytes[195..]),
                LittleEndian::read_f64(&bytes[211..]),
            ),
            min: Point3::new(
                LittleEndian::read_f64(&bytes[187..]),
                LittleEndian::read_f64(&bytes[203..]),
                LittleEndian::read_f64(&bytes[219..]),
            ),
            coord_system: CoordinateSystem::Unknown,
        })
    }

    /// Byte offset of the red channel inside a record, if the format carries colour.
    pub fn rgb_offset(&self) -> Option<usize> {
        match self.point_format {
            2 => Some(20),
            3 | 5 => Some(28),
            7 | 8 | 10 => Some(30),
            _ => None,
        }
    }

    fn classification_offset(&self) -> usize {
        if self.point_format >= 6 {
            16
        } else {
            15
        }
    }

    pub fn attributes_present(&self) -> Vec<String> {
        let mut attributes = vec![INTENSITY.to_string(), CLASSIFICATION.to_string()];
        if self.rgb_offset().is_some() {
            attributes.extend([RED, GREEN, BLUE].iter().map(|s| s.to_string()));
        }
        attributes
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        if self.point_count == 0 {
            return None;
        }
        Some(Aabb::new(
            Point3::new(self.min.x as f32, self.min.y as f32, self.min.z as f32),
            Point3::new(self.max.x as f32, self.max.y as f32, self.max.z as f32),
        ))
    }

    fn decode_record(&self, record: &[u8]) -> Point {
        let coordinate = |axis: usize| {
            let raw = LittleEndian::read_i32(&record[axis * 4..]);
            (f64::from(raw) * self.scale[axis] + self.offset[axis]) as f32
        };
        let mut point = Point::new(coordinate(0), coordinate(1), coordinate(2));
        point.attributes.insert(
            INTENSITY.to_string(),
            AttributeValue::U16(LittleEndian::read_u16(&record[12..])),
        );
        let classification = record[self.classification_offset()];
        // Formats 0 - 5 pack the synthetic/key-point/withheld flags into the top bits.
        let classification = if self.point_format < 6 {
            classification & 0x1f
        } else {
            classification
        };
        point.attributes.insert(
            CLASSIFICATION.to_string(),
            AttributeValue::U8(classification),
        );
        if let Some(offset) = self.rgb_offset() {
            for (i, key) in [RED, GREEN, BLUE].iter().enumerate() {
                point.attributes.insert(
                    key.to_string(),
                    AttributeValue::U16(LittleEndian::read_u16(&record[offset + 2 * i..])),
                );
            }
        }
        point
    }
}

pub(crate) fn detect(path: &Path, magic: &[u8]) -> Result<Format> {
    let compressed = magic.len() > 104 && magic[104] & 0x80 != 0;
    let laz_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("laz"));
    if compressed || laz_extension {
        Ok(Format::Laz)
    } else {
        Ok(Format::Las)
    }
}

pub(crate) fn read_metadata(path: &Path, format: Format) -> Result<Metadata> {
    let header = LasHeader::read(path)?;
    tracing::debug!(
        "LAS {}.{} format {} with {} points",
        header.version.0,
        header.version.1,
        header.point_format,
        header.point_count
    );
    Ok(Metadata::new(
        format,
        header.point_count,
        header.bounding_box(),
        header.attributes_present(),
        header.coord_system,
    ))
}

/// Streams the point records of an uncompressed LAS file.
pub struct LasReader {
    path: PathBuf,
    header: LasHeader,
    reader: BufReader<File>,
    record: Vec<u8>,
    index: u64,
}

impl LasReader {
    pub fn open(path: &Path) -> Result<Self> {
        let header = LasHeader::read(path)?;
        if header.compressed {
            return Err(decode_error(
                DecodeErrorKind::UnsupportedFormat,
                path,
                Some(104),
                "LAZ decompression backend is not available",
            ));
        }
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(u64::from(header.point_data_offset)))?;
        Ok(LasReader {
            path: path.to_path_buf(),
            record: vec![0; header.record_length as usize],
            header,
            reader,
            index: 0,
        })
    }

    pub fn header(&self) -> &LasHeader {
        &self.header
    }

    fn record_offset(&self) -> u64 {
        u64::from(self.header.point_data_offset)
            + self.index * u64::from(self.header.record_length)
    }
}

impl Iterator for LasReader {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.header.point_count {
            return None;
        }
        if let Err(err) = self.reader.read_exact(&mut self.record) {
            let index = self.index;
            let offset = self.record_offset();
            self.index = self.header.point_count;
            return Some(Err(match err.kind() {
                io::ErrorKind::UnexpectedEof => decode_error(
                    DecodeErrorKind::TruncatedFile,
                    &self.path,
                    Some(offset),
                    format!("truncated LAS at record {}", index),
                ),
                _ => err.into(),
            }));
        }
        let point = self.header.decode_record(&self.record);
        if !point.is_finite() {
            let detail = format!("record {} decodes to a non-finite position", self.index);
            let offset = self.record_offset();
            self.index = self.header.point_count;
            return Some(Err(bad_header(&self.path, offset, detail)));
        }
        self.index += 1;
        Some(Ok(point))
    }
}

impl PointSource for LasReader {
    fn progress(&self) -> (u64, u64) {
        (self.index, self.header.point_count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::fs;
    use std::io::Write;
    use tempdir::TempDir;

    /// A LAS 1.2 file with 'declared' points in the header and the given records after it.
    pub(crate) fn las_bytes(format: u8, declared: u32, points: &[(i32, i32, i32, u16)]) -> Vec<u8> {
        let record_length = MIN_RECORD_LENGTH[format as usize];
        let mut out = vec![0u8; MIN_HEADER_SIZE];
        out[0..4].copy_from_slice(SIGNATURE);
        out[24] = 1;
        out[25] = 2;
        LittleEndian::write_u16(&mut out[94..], MIN_HEADER_SIZE as u16);
        LittleEndian::write_u32(&mut out[96..], MIN_HEADER_SIZE as u32);
        out[104] = format;
        LittleEndian::write_u16(&mut out[105..], record_length);
        LittleEndian::write_u32(&mut out[107..], declared);
        for (i, scale) in [0.01, 0.01, 0.001].iter().enumerate() {
            LittleEndian::write_f64(&mut out[131 + 8 * i..], *scale);
        }
        LittleEndian::write_f64(&mut out[155..], 1000.);
        for (i, &(x, y, z, intensity)) in points.iter().enumerate() {
            let mut record = Vec::new();
            record.write_i32::<LittleEndian>(x).unwrap();
            record.write_i32::<LittleEndian>(y).unwrap();
            record.write_i32::<LittleEndian>(z).unwrap();
            record.write_u16::<LittleEndian>(intensity).unwrap();
            record.resize(record_length as usize, 0);
            record[15] = 0x80 | 2;
            if let Some(rgb) = match format {
                2 => Some(20),
                3 => Some(28),
                _ => None,
            } {
                LittleEndian::write_u16(&mut record[rgb..], 65535);
                LittleEndian::write_u16(&mut record[rgb + 2..], i as u16);
                LittleEndian::write_u16(&mut record[rgb + 4..], 0);
            }
            out.write_all(&record).unwrap();
        }
        out
    }

    #[test]
    fn test_scale_and_offset() {
        let dir = TempDir::new("las").unwrap();
        let path = dir.path().join("cloud.las");
        fs::write(&path, las_bytes(3, 2, &[(150, -200, 1500, 7), (0, 0, 0, 9)])).unwrap();

        let points: Vec<Point> = LasReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(2, points.len());
        approx::assert_abs_diff_eq!(1001.5, points[0].position.x, epsilon = 1e-4);
        approx::assert_abs_diff_eq!(-2., points[0].position.y, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(1.5, points[0].position.z, epsilon = 1e-6);
        assert_eq!(Some(7), points[0].intensity());
        assert_eq!(Some(2), points[0].classification());
        assert_eq!(Some([65535, 1, 0]), points[1].rgb());
    }

    #[test]
    fn test_truncated_records() {
        let dir = TempDir::new("las").unwrap();
        let path = dir.path().join("short.las");
        let points: Vec<_> = (0..3).map(|i| (i, i, i, 0)).collect();
        fs::write(&path, las_bytes(0, 5, &points)).unwrap();

        let result: Result<Vec<Point>> = LasReader::open(&path).unwrap().collect();
        let err = result.unwrap_err();
        match err.kind() {
            ErrorKind::Decode(kind, _, offset, detail) => {
                assert_eq!(DecodeErrorKind::TruncatedFile, *kind);
                assert_eq!(Some(227 + 3 * 20), *offset);
                assert_eq!("truncated LAS at record 3", detail.as_str());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_header_validation() {
        let dir = TempDir::new("las").unwrap();
        let path = dir.path().join("bad.las");
        let mut bytes = las_bytes(3, 0, &[]);
        bytes[25] = 9;
        fs::write(&path, &bytes).unwrap();
        assert!(LasHeader::read(&path).is_err());

        bytes[25] = 2;
        bytes[104] = 0x83;
        fs::write(&path, &bytes).unwrap();
        let header = LasHeader::read(&path).unwrap();
        assert!(header.compressed);
        assert!(LasReader::open(&path).is_err());
        assert_eq!(
            vec!["intensity", "classification", "red", "green", "blue"],
            header.attributes_present()
        );
    }
}
