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

use crate::errors::*;
use crate::read_write::{assign_attribute, DataType, PointSource};
use crate::Point;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Line oriented 'x y z [extra...]' text. Extra columns are read as 'intensity' (4 columns),
/// 'r g b' (6 columns) or 'intensity r g b' (7 columns, the PTS layout); anything else beyond
/// the position is ignored. Blank lines and '#' or '//' comments are skipped.
pub struct XyzReader {
    path: PathBuf,
    reader: BufReader<File>,
    bytes_read: u64,
    file_len: u64,
    line_number: u64,
    emitted: u64,
    skipped: u64,
}

impl XyzReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(XyzReader {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            bytes_read: 0,
            file_len,
            line_number: 0,
            emitted: 0,
            skipped: 0,
        })
    }
}

fn parse_line(line: &str) -> Option<Point> {
    let values: Vec<f64> = line
        .split_whitespace()
        .map(|token| token.parse::<f64>().ok())
        .collect::<Option<_>>()?;
    if values.len() < 3 {
        return None;
    }
    let mut point = Point::new(values[0] as f32, values[1] as f32, values[2] as f32);
    let extra: &[&str] = match values.len() {
        4 => &["intensity"],
        6 => &["red", "green", "blue"],
        7 => &["intensity", "red", "green", "blue"],
        _ => &[],
    };
    for (name, value) in extra.iter().zip(&values[3..]) {
        assign_attribute(&mut point, name, *value, DataType::Float64);
    }
    Some(point)
}

impl Iterator for XyzReader {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = match self.reader.read_line(&mut line) {
                Ok(read) => read,
                Err(err) => return Some(Err(err.into())),
            };
            if read == 0 {
                if self.emitted == 0 && self.skipped > 0 {
                    let detail = format!("none of {} data lines holds 'x y z'", self.skipped);
                    self.skipped = 0;
                    return Some(Err(decode_error(
                        DecodeErrorKind::BadHeader,
                        &self.path,
                        None,
                        detail,
                    )));
                }
                if self.skipped > 0 {
                    tracing::warn!(
                        "{}: skipped {} malformed or non-finite lines",
                        self.path.display(),
                        self.skipped
                    );
                    self.skipped = 0;
                }
                return None;
            }
            self.bytes_read += read as u64;
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            match parse_line(trimmed) {
                Some(point) if point.is_finite() => {
                    self.emitted += 1;
                    return Some(Ok(point));
                }
                _ => {
                    tracing::debug!("{}:{}: skipping line", self.path.display(), self.line_number);
                    self.skipped += 1;
                }
            }
        }
    }
}

impl PointSource for XyzReader {
    fn progress(&self) -> (u64, u64) {
        (self.bytes_read, self.file_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn test_comments_and_columns() {
        let dir = TempDir::new("xyz").unwrap();
        let path = dir.path().join("cloud.txt");
        fs::write(
            &path,
            "# header\n// another\n\n1 2 3\n4.5\t5 6 120\nbroken line\n7 8 9 255 128 0\n",
        )
        .unwrap();
        let points: Vec<Point> = XyzReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(3, points.len());
        assert_eq!(nalgebra::Point3::new(4.5, 5., 6.), points[1].position);
        assert_eq!(Some(120), points[1].intensity());
        assert_eq!(Some([255, 128, 0]), points[2].rgb());
        assert_eq!(None, points[0].intensity());
    }

    #[test]
    fn test_nothing_parses() {
        let dir = TempDir::new("xyz").unwrap();
        let path = dir.path().join("notes.xyz");
        fs::write(&path, "# survey
this is
not a point cloud
").unwrap();
        let result: Result<Vec<Point>> = XyzReader::open(&path).unwrap().collect();
        match result.unwrap_err().kind() {
            ErrorKind::Decode(kind, ..) => assert_eq!(DecodeErrorKind::BadHeader, *kind),
            other => panic!("unexpected error {:?}", other),
        }

        // Comments alone make an empty cloud, not an error.
        fs::write(&path, "# nothing scanned yet
").unwrap();
        let points: Vec<Point> = XyzReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert!(points.is_empty());
    }
}
