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

use error_chain::error_chain;
use std::fmt;
use std::path::PathBuf;

/// Why a point cloud file could not be decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    UnsupportedFormat,
    BadHeader,
    TruncatedFile,
    ChecksumFailure,
    DecompressionFailed,
    Cancelled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryErrorKind {
    DegenerateSegment,
    DisconnectedMerge,
    InvalidViewState,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    SchemaMismatch,
    IoFailure,
    DanglingReference,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceErrorKind {
    TooManyPoints,
    OutOfMemory,
}

macro_rules! display_as_debug {
    ($($kind:ty),*) => {
        $(
            impl fmt::Display for $kind {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    fmt::Debug::fmt(self, f)
                }
            }
        )*
    };
}

display_as_debug!(
    DecodeErrorKind,
    GeometryErrorKind,
    PersistenceErrorKind,
    ResourceErrorKind
);

fn at_offset(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" at byte {}", offset),
        None => String::new(),
    }
}

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Image(::image::ImageError);
    }

    errors {
        Decode(kind: DecodeErrorKind, path: PathBuf, offset: Option<u64>, detail: String) {
            description("point cloud could not be decoded")
            display("decode: {} in '{}'{}: {}", kind, path.display(), at_offset(offset), detail)
        }
        Geometry(kind: GeometryErrorKind, detail: String) {
            description("invalid geometry")
            display("geometry: {}: {}", kind, detail)
        }
        Persistence(kind: PersistenceErrorKind, detail: String) {
            description("annotations could not be persisted")
            display("persistence: {}: {}", kind, detail)
        }
        ResourceExhausted(kind: ResourceErrorKind, detail: String) {
            description("resource exhausted")
            display("resource: {}: {}", kind, detail)
        }
        InvalidConfig(detail: String) {
            description("invalid configuration")
            display("config: {}", detail)
        }
    }
}

impl ErrorKind {
    /// The pipeline stage that failed. Used as the prefix of every display string.
    pub fn stage(&self) -> &'static str {
        match self {
            ErrorKind::Decode(..) => "decode",
            ErrorKind::Geometry(..) => "geometry",
            ErrorKind::Persistence(..) => "persistence",
            ErrorKind::ResourceExhausted(..) => "resource",
            ErrorKind::InvalidConfig(..) => "config",
            ErrorKind::Io(..) => "io",
            ErrorKind::Json(..) => "persistence",
            ErrorKind::Image(..) => "render",
            _ => "unknown",
        }
    }
}

pub fn decode_error(
    kind: DecodeErrorKind,
    path: impl Into<PathBuf>,
    offset: Option<u64>,
    detail: impl Into<String>,
) -> Error {
    ErrorKind::Decode(kind, path.into(), offset, detail.into()).into()
}

pub fn geometry_error(kind: GeometryErrorKind, detail: impl Into<String>) -> Error {
    ErrorKind::Geometry(kind, detail.into()).into()
}

pub fn persistence_error(kind: PersistenceErrorKind, detail: impl Into<String>) -> Error {
    ErrorKind::Persistence(kind, detail.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_stage() {
        let err = decode_error(
            DecodeErrorKind::TruncatedFile,
            "cloud.las",
            Some(427),
            "truncated LAS at record 12345",
        );
        assert_eq!(
            "decode: TruncatedFile in 'cloud.las' at byte 427: truncated LAS at record 12345",
            err.to_string()
        );
        assert_eq!("decode", err.kind().stage());
    }

    #[test]
    fn test_geometry_display() {
        let err = geometry_error(GeometryErrorKind::InvalidViewState, "viewport is 0x0");
        assert_eq!("geometry: InvalidViewState: viewport is 0x0", err.to_string());
        assert_eq!("geometry", err.kind().stage());
    }
}
