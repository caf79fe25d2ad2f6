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

//! The small, closed set of coordinate systems a cloud can be tagged with, and conversions
//! between them. Geographic coordinates are (longitude°, latitude°, height); UTM coordinates are
//! (easting, northing, height) in metres on the WGS84 ellipsoid.

use nalgebra::Point3;
use serde_derive::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    Unknown,
    Wgs84,
    UtmZone33N,
    UtmZone34N,
}

impl CoordinateSystem {
    pub fn epsg_code(self) -> Option<u32> {
        match self {
            CoordinateSystem::Unknown => None,
            CoordinateSystem::Wgs84 => Some(4326),
            CoordinateSystem::UtmZone33N => Some(32633),
            CoordinateSystem::UtmZone34N => Some(32634),
        }
    }

    /// Best-effort classification of a WKT string.
    pub fn from_wkt(wkt: &str) -> Self {
        let wkt = wkt.to_ascii_uppercase();
        if wkt.contains("UTM") {
            if wkt.contains("33N") {
                return CoordinateSystem::UtmZone33N;
            }
            if wkt.contains("34N") {
                return CoordinateSystem::UtmZone34N;
            }
        }
        if wkt.contains("WGS84") || wkt.contains("WGS 84") {
            return CoordinateSystem::Wgs84;
        }
        CoordinateSystem::Unknown
    }

    fn utm_zone(self) -> Option<u32> {
        match self {
            CoordinateSystem::UtmZone33N => Some(33),
            CoordinateSystem::UtmZone34N => Some(34),
            _ => None,
        }
    }
}

/// A converted position. 'exact' is true only when no numerical approximation was involved;
/// a series expansion or a conversion that could not be performed leaves it false.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transformed {
    pub pos: Point3<f64>,
    pub exact: bool,
}

pub fn transform(pos: Point3<f64>, src: CoordinateSystem, dst: CoordinateSystem) -> Transformed {
    if src == dst {
        return Transformed { pos, exact: true };
    }
    let geographic = match (src, src.utm_zone()) {
        (CoordinateSystem::Wgs84, _) => Some(pos),
        (_, Some(zone)) => Some(utm_to_geographic(pos, zone)),
        _ => None,
    };
    let result = match (geographic, dst, dst.utm_zone()) {
        (Some(geographic), CoordinateSystem::Wgs84, _) => Some(geographic),
        (Some(geographic), _, Some(zone)) => Some(geographic_to_utm(geographic, zone)),
        _ => None,
    };
    match result {
        Some(pos) => Transformed { pos, exact: false },
        None => {
            tracing::debug!("no conversion from {:?} to {:?}", src, dst);
            Transformed { pos, exact: false }
        }
    }
}

const SEMI_MAJOR_AXIS: f64 = 6_378_137.;
const FLATTENING: f64 = 1. / 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.;

fn eccentricity_squared() -> f64 {
    FLATTENING * (2. - FLATTENING)
}

fn central_meridian(zone: u32) -> f64 {
    (f64::from(zone) * 6. - 183.).to_radians()
}

fn meridian_arc(phi: f64) -> f64 {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    SEMI_MAJOR_AXIS
        * ((1. - e2 / 4. - 3. * e4 / 64. - 5. * e6 / 256.) * phi
            - (3. * e2 / 8. + 3. * e4 / 32. + 45. * e6 / 1024.) * (2. * phi).sin()
            + (15. * e4 / 256. + 45. * e6 / 1024.) * (4. * phi).sin()
            - (35. * e6 / 3072.) * (6. * phi).sin())
}

fn geographic_to_utm(pos: Point3<f64>, zone: u32) -> Point3<f64> {
    let e2 = eccentricity_squared();
    let ep2 = e2 / (1. - e2);
    let phi = pos.y.to_radians();
    let lambda = pos.x.to_radians();

    let n = SEMI_MAJOR_AXIS / (1. - e2 * phi.sin().powi(2)).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * phi.cos().powi(2);
    let a = phi.cos() * (lambda - central_meridian(zone));

    let easting = SCALE_FACTOR
        * n
        * (a + (1. - t + c) * a.powi(3) / 6.
            + (5. - 18. * t + t * t + 72. * c - 58. * ep2) * a.powi(5) / 120.)
        + FALSE_EASTING;
    let northing = SCALE_FACTOR
        * (meridian_arc(phi)
            + n * phi.tan()
                * (a * a / 2.
                    + (5. - t + 9. * c + 4. * c * c) * a.powi(4) / 24.
                    + (61. - 58. * t + t * t + 600. * c - 330. * ep2) * a.powi(6) / 720.));
    Point3::new(easting, northing, pos.z)
}

fn utm_to_geographic(pos: Point3<f64>, zone: u32) -> Point3<f64> {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1. - e2);
    let e1 = (1. - (1. - e2).sqrt()) / (1. + (1. - e2).sqrt());

    let mu = pos.y / SCALE_FACTOR
        / (SEMI_MAJOR_AXIS * (1. - e2 / 4. - 3. * e4 / 64. - 5. * e6 / 256.));
    let phi1 = mu
        + (3. * e1 / 2. - 27. * e1.powi(3) / 32.) * (2. * mu).sin()
        + (21. * e1 * e1 / 16. - 55. * e1.powi(4) / 32.) * (4. * mu).sin()
        + (151. * e1.powi(3) / 96.) * (6. * mu).sin()
        + (1097. * e1.powi(4) / 512.) * (8. * mu).sin();

    let sin_phi1 = phi1.sin();
    let n1 = SEMI_MAJOR_AXIS / (1. - e2 * sin_phi1 * sin_phi1).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * phi1.cos().powi(2);
    let r1 = SEMI_MAJOR_AXIS * (1. - e2) / (1. - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (pos.x - FALSE_EASTING) / (n1 * SCALE_FACTOR);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.
                - (5. + 3. * t1 + 10. * c1 - 4. * c1 * c1 - 9. * ep2) * d.powi(4) / 24.
                + (61. + 90. * t1 + 298. * c1 + 45. * t1 * t1 - 252. * ep2 - 3. * c1 * c1)
                    * d.powi(6)
                    / 720.);
    let lambda = central_meridian(zone)
        + (d - (1. + 2. * t1 + c1) * d.powi(3) / 6.
            + (5. - 2. * c1 + 28. * t1 - 3. * c1 * c1 + 8. * ep2 + 24. * t1 * t1) * d.powi(5)
                / 120.)
            / phi1.cos();
    Point3::new(lambda * 180. / PI, phi * 180. / PI, pos.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_is_exact() {
        let p = Point3::new(412_345.25, 5_312_000.5, 12.);
        let t = transform(p, CoordinateSystem::UtmZone33N, CoordinateSystem::UtmZone33N);
        assert!(t.exact);
        assert_eq!(p, t.pos);
    }

    #[test]
    fn test_central_meridian_on_equator() {
        let t = transform(
            Point3::new(15., 0., 3.),
            CoordinateSystem::Wgs84,
            CoordinateSystem::UtmZone33N,
        );
        assert!(!t.exact);
        assert_abs_diff_eq!(500_000., t.pos.x, epsilon = 1e-6);
        assert_abs_diff_eq!(0., t.pos.y, epsilon = 1e-6);
        assert_eq!(3., t.pos.z);
    }

    #[test]
    fn test_utm_round_trip() {
        let geographic = Point3::new(16.3725, 48.2082, 171.);
        let utm = transform(
            geographic,
            CoordinateSystem::Wgs84,
            CoordinateSystem::UtmZone33N,
        );
        let back = transform(utm.pos, CoordinateSystem::UtmZone33N, CoordinateSystem::Wgs84);
        assert_abs_diff_eq!(geographic.x, back.pos.x, epsilon = 1e-6);
        assert_abs_diff_eq!(geographic.y, back.pos.y, epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_is_not_exact() {
        let p = Point3::new(1., 2., 3.);
        let t = transform(p, CoordinateSystem::Unknown, CoordinateSystem::Wgs84);
        assert!(!t.exact);
        assert_eq!(p, t.pos);
    }

    #[test]
    fn test_from_wkt() {
        assert_eq!(
            CoordinateSystem::UtmZone33N,
            CoordinateSystem::from_wkt("PROJCS[\"WGS 84 / UTM zone 33N\",GEOGCS[\"WGS 84\"]]")
        );
        assert_eq!(
            CoordinateSystem::Wgs84,
            CoordinateSystem::from_wkt("GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\"]]")
        );
        assert_eq!(CoordinateSystem::Unknown, CoordinateSystem::from_wkt("LOCAL_CS"));
    }
}
