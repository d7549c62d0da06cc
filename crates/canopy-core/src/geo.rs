//! Georeferencing handed to the engine by the raster collaborator:
//! coordinate reference system plus the affine pixel transform.
//!
//! Nothing here reprojects. The engine only needs to know whether the CRS is
//! projected (pixel sizes in metres) and how large a pixel is.

use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::CanopyResult;

/// Whether coordinates are angular (degrees) or planar (metres).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsKind {
    Geographic,
    Projected,
}

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
    pub kind: CrsKind,
}

const GEOGRAPHIC_CODES: [u32; 6] = [4326, 4269, 4258, 4283, 4617, 4674];
const PROJECTED_CODES: [u32; 7] = [3857, 3395, 5070, 27700, 2154, 3035, 3577];

impl Crs {
    /// WGS84 geographic (EPSG:4326).
    pub fn wgs84() -> Self {
        Self::geographic(4326)
    }

    pub fn geographic(epsg: u32) -> Self {
        Self { epsg, kind: CrsKind::Geographic }
    }

    pub fn projected(epsg: u32) -> Self {
        Self { epsg, kind: CrsKind::Projected }
    }

    /// Classify a well-known EPSG code. Codes outside the table must be
    /// built explicitly with [`Crs::projected`] or [`Crs::geographic`].
    pub fn from_epsg(epsg: u32) -> CanopyResult<Self> {
        if GEOGRAPHIC_CODES.contains(&epsg) {
            return Ok(Self::geographic(epsg));
        }
        let utm = (32601..=32660).contains(&epsg) || (32701..=32760).contains(&epsg);
        if utm || PROJECTED_CODES.contains(&epsg) {
            return Ok(Self::projected(epsg));
        }
        Err(CanopyError::Configuration(format!(
            "EPSG:{epsg} is not a recognised code; declare it projected or geographic explicitly"
        )))
    }

    /// UTM zone containing an AOI centroid given in WGS84 degrees.
    ///
    /// zone = floor((lon + 180) / 6) + 1, clamped to 1..=60;
    /// EPSG 326zz in the northern hemisphere, 327zz in the southern.
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u32;
        let base = if lat >= 0.0 { 32600 } else { 32700 };
        Self::projected(base + zone)
    }

    pub fn is_projected(&self) -> bool {
        self.kind == CrsKind::Projected
    }

    /// UTM zone number and hemisphere, when this is a WGS84 UTM code.
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        match self.epsg {
            32601..=32660 => Some((self.epsg - 32600, true)),
            32701..=32760 => Some((self.epsg - 32700, false)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Pixel → CRS affine transform.
///
/// ```text
///   x = a·col + b·row + c
///   y = d·col + e·row + f
/// ```
/// `a` is the pixel width and `e` the (usually negative) pixel height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// North-up transform with square-ish pixels anchored at `(origin_x, origin_y)`.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height.abs(),
            f: origin_y,
        }
    }

    pub fn pixel_width(&self) -> f64 {
        self.a.abs()
    }

    pub fn pixel_height(&self) -> f64 {
        self.e.abs()
    }

    /// CRS coordinates of the pixel corner `(col, row)`.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }
}

/// Everything the engine needs to turn pixel counts into hectares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub crs: Crs,
    pub transform: AffineTransform,
}

impl GeoReference {
    pub fn new(crs: Crs, transform: AffineTransform) -> Self {
        Self { crs, transform }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wgs84_is_geographic() {
        assert!(!Crs::wgs84().is_projected());
        assert!(!Crs::from_epsg(4326).unwrap().is_projected());
    }

    #[test]
    fn utm_codes_are_projected() {
        let north = Crs::from_epsg(32650).unwrap();
        assert!(north.is_projected());
        assert_eq!(north.utm_zone(), Some((50, true)));
        let south = Crs::from_epsg(32736).unwrap();
        assert_eq!(south.utm_zone(), Some((36, false)));
    }

    #[test]
    fn unknown_code_is_configuration_error() {
        assert!(matches!(Crs::from_epsg(9999), Err(CanopyError::Configuration(_))));
    }

    #[test]
    fn utm_for_centroid() {
        // Nairobi: 36.8°E, 1.3°S → zone 37 south.
        assert_eq!(Crs::utm_for(36.8, -1.3).epsg, 32737);
        // Beijing: 116.4°E, 39.9°N → zone 50 north.
        assert_eq!(Crs::utm_for(116.4, 39.9).epsg, 32650);
        // Antimeridian clamps into zone 60.
        assert_eq!(Crs::utm_for(180.0, 10.0).epsg, 32660);
    }

    #[test]
    fn north_up_pixel_sizes_are_absolute() {
        let t = AffineTransform::north_up(500_000.0, 9_000_000.0, 10.0, 10.0);
        assert_eq!(t.pixel_width(), 10.0);
        assert_eq!(t.pixel_height(), 10.0);
        assert_eq!(t.apply(1.0, 1.0), (500_010.0, 8_999_990.0));
    }
}
