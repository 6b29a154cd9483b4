//! Geographic <-> rectangular coordinate transforms of the grid format.
//!
//! The transform types form a closed set, so they are a tagged enum and the
//! conversion is selected on the tag; no dynamic dispatch since transforms
//! run inside the interpolation hot loop.

use crate::constants::{
    Degree, Kilometer, C111, DEG2RAD, ERAD, FLATTENING, MAP_TRANS_SDC_DRLT, RAD2DEG,
};
use crate::seisdd_errors::SeisddError;

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Rectangular coordinates are taken verbatim: x = lon, y = lat.
    None,
    /// Equirectangular approximation about an origin, with optional
    /// clockwise rotation.
    Simple {
        orig_lat: Degree,
        orig_lon: Degree,
        rot_deg: Degree,
        cosang: f64,
        sinang: f64,
    },
    /// Short Distance Conversion: per-degree scale factors computed once
    /// at the origin latitude on the WGS-72 ellipsoid.
    Sdc {
        orig_lat: Degree,
        orig_lon: Degree,
        rot_deg: Degree,
        cosang: f64,
        sinang: f64,
        xltkm: f64, // km per degree of latitude
        xlnkm: f64, // km per degree of longitude
    },
}

fn wrap_lon(mut dlon: Degree) -> Degree {
    if dlon > 180.0 {
        dlon -= 360.0;
    } else if dlon < -180.0 {
        dlon += 360.0;
    }
    dlon
}

impl Transform {
    /// Build a transform from the trailing header tokens, e.g.
    /// `TRANSFORM SIMPLE LatOrig 46.2 LongOrig 7.4 RotCW 0.0`.
    pub fn parse(tokens: &[&str]) -> Result<Self, SeisddError> {
        let err = |what: &str| {
            SeisddError::GridFormat("TRANSFORM".into(), format!("{what}: {tokens:?}"))
        };
        let mut it = tokens.iter();
        if it.next().map(|t| *t != "TRANSFORM").unwrap_or(true) {
            return Err(err("missing TRANSFORM keyword"));
        }
        let ttype = *it.next().ok_or_else(|| err("missing transform type"))?;
        if ttype == "NONE" {
            return Ok(Transform::None);
        }

        // remaining tokens are `key value` pairs
        let mut orig_lat = None;
        let mut orig_lon = None;
        let mut rot_deg = 0.0;
        while let Some(key) = it.next() {
            let value: f64 = it
                .next()
                .ok_or_else(|| err("missing value"))?
                .parse()
                .map_err(|_| err("bad numeric value"))?;
            match *key {
                "LatOrig" => orig_lat = Some(value),
                "LongOrig" => orig_lon = Some(value),
                "RotCW" => rot_deg = value,
                _ => {} // tolerate unknown keys
            }
        }
        let orig_lat = orig_lat.ok_or_else(|| err("missing LatOrig"))?;
        let orig_lon = orig_lon.ok_or_else(|| err("missing LongOrig"))?;
        let angle = -rot_deg * DEG2RAD;
        let (sinang, cosang) = angle.sin_cos();

        match ttype {
            "SIMPLE" => Ok(Transform::Simple {
                orig_lat,
                orig_lon,
                rot_deg,
                cosang,
                sinang,
            }),
            "SDC" => {
                let dlt1 = (MAP_TRANS_SDC_DRLT * (orig_lat * DEG2RAD).tan()).atan();
                let dlt2 = (MAP_TRANS_SDC_DRLT * ((orig_lat + 1.0) * DEG2RAD).tan()).atan();
                let del = dlt2 - dlt1;
                let r = ERAD * (1.0 - dlt1.sin().powi(2) * FLATTENING);
                Ok(Transform::Sdc {
                    orig_lat,
                    orig_lon,
                    rot_deg,
                    cosang,
                    sinang,
                    xltkm: r * del,
                    xlnkm: r * dlt1.cos() * DEG2RAD,
                })
            }
            other => Err(SeisddError::GridFormat(
                "TRANSFORM".into(),
                format!("unknown transform type '{other}'"),
            )),
        }
    }

    pub fn from_lat_lon(&self, lat: Degree, lon: Degree) -> (Kilometer, Kilometer) {
        match self {
            Transform::None => (lon, lat),
            Transform::Simple {
                orig_lat,
                orig_lon,
                cosang,
                sinang,
                ..
            } => {
                let xtemp = wrap_lon(lon - orig_lon) * C111 * (lat * DEG2RAD).cos();
                let ytemp = (lat - orig_lat) * C111;
                (
                    xtemp * cosang - ytemp * sinang,
                    ytemp * cosang + xtemp * sinang,
                )
            }
            Transform::Sdc {
                orig_lat,
                orig_lon,
                cosang,
                sinang,
                xltkm,
                xlnkm,
                ..
            } => {
                let xtemp = wrap_lon(lon - orig_lon) * xlnkm;
                let ytemp = (lat - orig_lat) * xltkm;
                (
                    xtemp * cosang - ytemp * sinang,
                    ytemp * cosang + xtemp * sinang,
                )
            }
        }
    }

    pub fn to_lat_lon(&self, x: Kilometer, y: Kilometer) -> (Degree, Degree) {
        match self {
            Transform::None => (y, x),
            Transform::Simple {
                orig_lat,
                orig_lon,
                cosang,
                sinang,
                ..
            } => {
                let xtemp = x * cosang + y * sinang;
                let ytemp = y * cosang - x * sinang;
                let lat = orig_lat + ytemp / C111;
                let lon = orig_lon + xtemp / (C111 * (lat * DEG2RAD).cos());
                (lat, lon)
            }
            Transform::Sdc {
                orig_lat,
                orig_lon,
                cosang,
                sinang,
                xltkm,
                xlnkm,
                ..
            } => {
                let xtemp = x * cosang + y * sinang;
                let ytemp = y * cosang - x * sinang;
                (orig_lat + ytemp / xltkm, orig_lon + xtemp / xlnkm)
            }
        }
    }

    /// Convert an azimuth measured against geographic north into the
    /// rotated rectangular frame.
    pub fn from_lat_lon_angle(&self, latlon_angle: Degree) -> Degree {
        let rot = self.rotation();
        if rot == 0.0 {
            latlon_angle
        } else {
            normalize_deg(latlon_angle - rot)
        }
    }

    /// Convert an azimuth in the rectangular frame back to geographic.
    pub fn to_lat_lon_angle(&self, rect_angle: Degree) -> Degree {
        let rot = self.rotation();
        if rot == 0.0 {
            rect_angle
        } else {
            normalize_deg(rect_angle + rot)
        }
    }

    fn rotation(&self) -> Degree {
        match self {
            Transform::None => 0.0,
            Transform::Simple { rot_deg, .. } | Transform::Sdc { rot_deg, .. } => *rot_deg,
        }
    }

    pub fn distance(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> Kilometer {
        ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
    }

    pub fn distance_3d(&self, x1: f64, y1: f64, z1: f64, x2: f64, y2: f64, z2: f64) -> Kilometer {
        ((x2 - x1).powi(2) + (y2 - y1).powi(2) + (z2 - z1).powi(2)).sqrt()
    }
}

pub fn normalize_deg(mut angle: Degree) -> Degree {
    while angle < 0.0 {
        angle += 360.0;
    }
    while angle >= 360.0 {
        angle -= 360.0;
    }
    angle
}

/// Initial bearing from point 1 toward point 2, degrees east of north.
pub fn azimuth_deg(lat1: Degree, lon1: Degree, lat2: Degree, lon2: Degree) -> Degree {
    let phi1 = lat1 * DEG2RAD;
    let phi2 = lat2 * DEG2RAD;
    let dlambda = wrap_lon(lon2 - lon1) * DEG2RAD;
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    normalize_deg(y.atan2(x) * RAD2DEG)
}

/// Epicentral distance on the spherical Earth.
pub fn epicentral_distance_km(
    lat1: Degree,
    lon1: Degree,
    lat2: Degree,
    lon2: Degree,
) -> Kilometer {
    let phi1 = lat1 * DEG2RAD;
    let phi2 = lat2 * DEG2RAD;
    let dphi = (lat2 - lat1) * DEG2RAD;
    let dlambda = wrap_lon(lon2 - lon1) * DEG2RAD;
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * ERAD * a.sqrt().asin()
}

/// Hypocentral distance between two points given in geographic
/// coordinates and depth (km, positive down).
pub fn hypocentral_distance_km(
    lat1: Degree,
    lon1: Degree,
    depth1: Kilometer,
    lat2: Degree,
    lon2: Degree,
    depth2: Kilometer,
) -> Kilometer {
    let epi = epicentral_distance_km(lat1, lon1, lat2, lon2);
    (epi.powi(2) + (depth2 - depth1).powi(2)).sqrt()
}

/// Distance between an event hypocenter and a station, accounting for the
/// station elevation (meters above sea level).
pub fn event_station_distance_km(
    ev_lat: Degree,
    ev_lon: Degree,
    ev_depth: Kilometer,
    sta_lat: Degree,
    sta_lon: Degree,
    sta_elevation_m: f64,
) -> Kilometer {
    hypocentral_distance_km(
        ev_lat,
        ev_lon,
        ev_depth,
        sta_lat,
        sta_lon,
        -sta_elevation_m / 1000.0,
    )
}
