//! Coordinate reference system handling for zone polygons.
//!
//! Zone datasets arrive in whatever CRS the publisher used. The NYC taxi zone
//! layer, for instance, is in EPSG:2263 (NAD83 / New York Long Island, US
//! survey feet). Every vertex is converted to WGS84 longitude/latitude before
//! centroids are computed.
//!
//! Built in:
//! - [`Wgs84`] identity (EPSG:4326, OGC:CRS84, and NAD83 geographic EPSG:4269,
//!   which differs from WGS84 by well under a meter)
//! - [`LambertConformalConic`], ellipsoidal 2SP inverse, with an EPSG:2263 preset
//!
//! With the `proj` feature any other CRS known to PROJ is accepted.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use crate::error::{Result, TripflowError};

/// Converts source-CRS coordinates to WGS84 `(longitude, latitude)` degrees.
pub trait Reprojection {
    fn to_lon_lat(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    /// Human readable name for logs.
    fn name(&self) -> &str;
}

/// Identity transform for data already in geographic degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84;

impl Reprojection for Wgs84 {
    #[inline]
    fn to_lon_lat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok((x, y))
    }

    fn name(&self) -> &str {
        "EPSG:4326"
    }
}

// ============================================================================
// Lambert Conformal Conic (2SP)
// ============================================================================

/// Definition of a two-standard-parallel Lambert Conformal Conic projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LccParams {
    /// Ellipsoid semi-major axis in meters
    pub semi_major: f64,
    /// Ellipsoid inverse flattening
    pub inverse_flattening: f64,
    /// First standard parallel (degrees)
    pub standard_parallel_1: f64,
    /// Second standard parallel (degrees)
    pub standard_parallel_2: f64,
    /// Latitude of origin (degrees)
    pub latitude_of_origin: f64,
    /// Central meridian (degrees)
    pub central_meridian: f64,
    /// False easting in meters
    pub false_easting: f64,
    /// False northing in meters
    pub false_northing: f64,
    /// Size of one projected unit in meters
    pub unit_to_meter: f64,
}

/// Ellipsoidal Lambert Conformal Conic projection (Snyder, USGS PP 1395, §15).
#[derive(Debug, Clone)]
pub struct LambertConformalConic {
    label: String,
    params: LccParams,
    e: f64,
    n: f64,
    big_f: f64,
    rho0: f64,
    lon0: f64,
}

impl LambertConformalConic {
    pub fn new(label: impl Into<String>, params: LccParams) -> Self {
        let f = 1.0 / params.inverse_flattening;
        let e = (2.0 * f - f * f).sqrt();
        let a = params.semi_major;

        let phi1 = params.standard_parallel_1.to_radians();
        let phi2 = params.standard_parallel_2.to_radians();
        let phi0 = params.latitude_of_origin.to_radians();

        let m1 = msfn(phi1, e);
        let m2 = msfn(phi2, e);
        let t0 = tsfn(phi0, e);
        let t1 = tsfn(phi1, e);
        let t2 = tsfn(phi2, e);

        let n = if (phi1 - phi2).abs() < 1e-12 {
            phi1.sin()
        } else {
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        };
        let big_f = m1 / (n * t1.powf(n));
        let rho0 = a * big_f * t0.powf(n);

        Self {
            label: label.into(),
            params,
            e,
            n,
            big_f,
            rho0,
            lon0: params.central_meridian.to_radians(),
        }
    }

    /// EPSG:2263, NAD83 / New York Long Island (ftUS).
    pub fn ny_long_island_ftus() -> Self {
        Self::new(
            "EPSG:2263",
            LccParams {
                semi_major: 6_378_137.0,
                inverse_flattening: 298.257_222_101,
                standard_parallel_1: 41.0 + 2.0 / 60.0,
                standard_parallel_2: 40.0 + 40.0 / 60.0,
                latitude_of_origin: 40.0 + 10.0 / 60.0,
                central_meridian: -74.0,
                false_easting: 300_000.0,
                false_northing: 0.0,
                unit_to_meter: 1200.0 / 3937.0,
            },
        )
    }

    /// Forward projection from degrees to projected units.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let a = self.params.semi_major;
        let rho = a * self.big_f * tsfn(lat.to_radians(), self.e).powf(self.n);
        let theta = self.n * (lon.to_radians() - self.lon0);

        let x = self.params.false_easting + rho * theta.sin();
        let y = self.params.false_northing + self.rho0 - rho * theta.cos();
        (x / self.params.unit_to_meter, y / self.params.unit_to_meter)
    }
}

impl Reprojection for LambertConformalConic {
    fn to_lon_lat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(TripflowError::Internal {
                message: format!("non-finite coordinate ({x}, {y})"),
            });
        }
        let a = self.params.semi_major;
        let dx = x * self.params.unit_to_meter - self.params.false_easting;
        let dy = self.rho0 - (y * self.params.unit_to_meter - self.params.false_northing);

        let sign = self.n.signum();
        let rho = sign * (dx * dx + dy * dy).sqrt();
        let theta = (sign * dx).atan2(sign * dy);
        let lon = theta / self.n + self.lon0;

        let lat = if rho == 0.0 {
            sign * FRAC_PI_2
        } else {
            let t = (rho / (a * self.big_f)).powf(1.0 / self.n);
            phi_from_ts(t, self.e)?
        };

        Ok((lon.to_degrees(), lat.to_degrees()))
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Snyder eq. 14-15: `m = cos φ / sqrt(1 - e² sin² φ)`.
fn msfn(phi: f64, e: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e * e * s * s).sqrt()
}

/// Snyder eq. 15-9: `t = tan(π/4 - φ/2) / ((1 - e sin φ) / (1 + e sin φ))^(e/2)`.
fn tsfn(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// Invert [`tsfn`] by fixed-point iteration (Snyder eq. 7-9).
fn phi_from_ts(t: f64, e: f64) -> Result<f64> {
    let mut phi = FRAC_PI_2 - 2.0 * t.atan();
    for _ in 0..15 {
        let es = e * phi.sin();
        let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(e / 2.0)).atan();
        if (next - phi).abs() < 1e-12 {
            return Ok(next);
        }
        phi = next;
    }
    Err(TripflowError::Internal {
        message: "latitude iteration did not converge".to_string(),
    })
}

// ============================================================================
// PROJ backed transform
// ============================================================================

/// Any CRS PROJ knows about, converted to WGS84 lon/lat.
#[cfg(feature = "proj")]
pub struct ProjTransform {
    label: String,
    inner: proj::Proj,
}

#[cfg(feature = "proj")]
impl ProjTransform {
    pub fn new(from_crs: &str) -> Result<Self> {
        // new_known_crs normalizes the output axis order to (lon, lat)
        let inner = proj::Proj::new_known_crs(from_crs, "EPSG:4326", None).map_err(|e| {
            TripflowError::data_source(from_crs, format!("PROJ cannot build a transform: {e}"))
        })?;
        Ok(Self {
            label: from_crs.to_string(),
            inner,
        })
    }
}

#[cfg(feature = "proj")]
impl Reprojection for ProjTransform {
    fn to_lon_lat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.inner
            .convert((x, y))
            .map_err(|e| TripflowError::Internal {
                message: format!("PROJ conversion of ({x}, {y}) failed: {e}"),
            })
    }

    fn name(&self) -> &str {
        &self.label
    }
}

// ============================================================================
// CRS resolution
// ============================================================================

/// Source CRS of a zone dataset, resolved from a CRS name.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCrs {
    Wgs84,
    NyLongIsland,
    /// Handed to PROJ (only constructible with the `proj` feature)
    Other(String),
}

impl SourceCrs {
    /// Resolve a CRS name such as `EPSG:2263`,
    /// `urn:ogc:def:crs:EPSG::2263` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(SourceCrs::Wgs84);
        }

        let code = upper
            .contains("EPSG")
            .then(|| upper.rsplit(':').next())
            .flatten()
            .and_then(|tail| tail.trim().parse::<u32>().ok());

        match code {
            Some(4326) | Some(4269) => Ok(SourceCrs::Wgs84),
            Some(2263) => Ok(SourceCrs::NyLongIsland),
            Some(other) if cfg!(feature = "proj") => Ok(SourceCrs::Other(format!("EPSG:{other}"))),
            None if cfg!(feature = "proj") && !trimmed.is_empty() => {
                Ok(SourceCrs::Other(trimmed.to_string()))
            }
            _ => Err(TripflowError::data_source(
                trimmed,
                "unsupported CRS (built in: EPSG:4326, EPSG:4269, EPSG:2263; \
                 enable the `proj` feature for others)",
            )),
        }
    }

    /// Build the transform for this CRS.
    pub fn reprojection(&self) -> Result<Box<dyn Reprojection>> {
        match self {
            SourceCrs::Wgs84 => Ok(Box::new(Wgs84)),
            SourceCrs::NyLongIsland => Ok(Box::new(LambertConformalConic::ny_long_island_ftus())),
            #[cfg(feature = "proj")]
            SourceCrs::Other(name) => Ok(Box::new(ProjTransform::new(name)?)),
            #[cfg(not(feature = "proj"))]
            SourceCrs::Other(name) => Err(TripflowError::data_source(
                name.as_str(),
                "unsupported CRS (enable the `proj` feature)",
            )),
        }
    }
}
