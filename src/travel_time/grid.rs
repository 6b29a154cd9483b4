//! Gridded travel-time, velocity and take-off-angle files.
//!
//! Each grid is a pair of files `<base>.<kind>.<station>.<phase>.{hdr,buf}`.
//! The header is an ASCII token stream with the geometry, the value type
//! and the geographic transform; the buffer is a row-major array (x
//! outermost, z innermost) of IEEE-754 floats or doubles. A grid with
//! `numx <= 2` is two-dimensional: values are replicated along x and the
//! y axis spans horizontal distance from the grid source.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::constants::{Degree, Kilometer, KmPerSec, Seconds};
use crate::seisdd_errors::SeisddError;
use crate::travel_time::transform::{normalize_deg, Transform};

/// Samples with interpolated quality below this value are unusable.
pub const QUALITY_CUTOFF: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    Time,
    Angle,
    Velocity,
}

impl GridKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridKind::Time => "time",
            GridKind::Angle => "angle",
            GridKind::Velocity => "vel",
        }
    }
}

/// Take-off angles packed in a 32-bit word:
/// bits 0-3 quality (0-10), bits 4-15 dip in tenths of degree (0 down,
/// 1800 up), bits 16-31 azimuth in tenths of degree (0-3600).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeOffAngles {
    pub quality: u16,
    pub dip_tenths: u16,
    pub azimuth_tenths: u16,
}

impl TakeOffAngles {
    pub fn decode(bits: u32) -> Self {
        TakeOffAngles {
            quality: (bits & 0xF) as u16,
            dip_tenths: ((bits >> 4) & 0xFFF) as u16,
            azimuth_tenths: ((bits >> 16) & 0xFFFF) as u16,
        }
    }

    pub fn encode(&self) -> u32 {
        (self.quality as u32 & 0xF)
            | ((self.dip_tenths as u32 & 0xFFF) << 4)
            | ((self.azimuth_tenths as u32) << 16)
    }
}

#[derive(Debug, Clone)]
pub struct GridInfo {
    pub hdr_path: Utf8PathBuf,
    pub buf_path: Utf8PathBuf,
    pub kind: GridKind,
    pub swap_bytes: bool,
    pub numx: usize,
    pub numy: usize,
    pub numz: usize,
    pub origx: Kilometer,
    pub origy: Kilometer,
    pub origz: Kilometer,
    pub dx: Kilometer,
    pub dy: Kilometer,
    pub dz: Kilometer,
    pub type_label: String,
    pub use_double: bool,
    pub label: String,
    pub srcex: Kilometer,
    pub srcey: Kilometer,
    pub srcez: Kilometer,
    pub transform: Transform,
}

enum GridValues {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

pub struct Grid {
    pub info: GridInfo,
    values: GridValues,
}

fn swap_f32(bytes: [u8; 4], swap: bool) -> f32 {
    let mut v = u32::from_ne_bytes(bytes);
    if swap {
        v = v.swap_bytes();
    }
    f32::from_bits(v)
}

fn swap_f64(bytes: [u8; 8], swap: bool) -> f64 {
    let mut v = u64::from_ne_bytes(bytes);
    if swap {
        v = v.swap_bytes();
    }
    f64::from_bits(v)
}

impl Grid {
    /// Header and buffer path of the grid for one (station, phase) pair.
    pub fn file_paths(
        base: &Utf8Path,
        kind: GridKind,
        station_code: &str,
        phase: char,
    ) -> (Utf8PathBuf, Utf8PathBuf) {
        let stem = format!("{base}.{}.{station_code}.{phase}", kind.as_str());
        (
            Utf8PathBuf::from(format!("{stem}.hdr")),
            Utf8PathBuf::from(format!("{stem}.buf")),
        )
    }

    pub fn load(
        base: &Utf8Path,
        kind: GridKind,
        station_code: &str,
        phase: char,
        swap_bytes: bool,
    ) -> Result<Grid, SeisddError> {
        let (hdr_path, buf_path) = Self::file_paths(base, kind, station_code, phase);
        let header = fs::read_to_string(&hdr_path)?;
        let info = Self::parse_header(&header, hdr_path, buf_path, kind, swap_bytes)?;
        let values = Self::read_buffer(&info)?;
        Ok(Grid { info, values })
    }

    fn parse_header(
        content: &str,
        hdr_path: Utf8PathBuf,
        buf_path: Utf8PathBuf,
        kind: GridKind,
        swap_bytes: bool,
    ) -> Result<GridInfo, SeisddError> {
        let bad = |what: &str| SeisddError::GridFormat(hdr_path.to_string(), what.to_string());

        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() < 11 {
            return Err(bad("truncated header"));
        }
        let num = |i: usize| -> Result<f64, SeisddError> {
            tokens[i]
                .parse()
                .map_err(|_| bad(&format!("bad numeric token '{}'", tokens[i])))
        };
        let numx = num(0)? as usize;
        let numy = num(1)? as usize;
        let numz = num(2)? as usize;
        if numx == 0 || numy < 2 || numz < 2 {
            return Err(bad("grid too small"));
        }
        let use_double = match tokens[10] {
            "FLOAT" => false,
            "DOUBLE" => true,
            other => return Err(bad(&format!("unknown value type '{other}'"))),
        };
        if kind == GridKind::Angle && use_double {
            return Err(bad("angle grids must store floats"));
        }

        // optional source line (time and angle grids), then the transform
        let mut next = 11;
        let (label, srcex, srcey, srcez) = if tokens.get(next).copied() != Some("TRANSFORM") {
            if tokens.len() < next + 4 {
                return Err(bad("truncated source line"));
            }
            let label = tokens[next].to_string();
            let src = (num(next + 1)?, num(next + 2)?, num(next + 3)?);
            next += 4;
            (label, src.0, src.1, src.2)
        } else {
            (String::new(), 0.0, 0.0, 0.0)
        };
        let transform = Transform::parse(&tokens[next..])?;

        let origx = num(3)?;
        let origy = num(4)?;
        let origz = num(5)?;
        let dx = num(6)?;
        let dy = num(7)?;
        let dz = num(8)?;
        let type_label = tokens[9].to_string();

        Ok(GridInfo {
            hdr_path,
            buf_path,
            kind,
            swap_bytes,
            numx,
            numy,
            numz,
            origx,
            origy,
            origz,
            dx,
            dy,
            dz,
            type_label,
            use_double,
            label,
            srcex,
            srcey,
            srcez,
            transform,
        })
    }

    fn read_buffer(info: &GridInfo) -> Result<GridValues, SeisddError> {
        let bytes = fs::read(&info.buf_path)?;
        let count = info.numx * info.numy * info.numz;
        let width = if info.use_double { 8 } else { 4 };
        if bytes.len() != count * width {
            return Err(SeisddError::GridFormat(
                info.buf_path.to_string(),
                format!("expected {} values, file holds {} bytes", count, bytes.len()),
            ));
        }
        if info.use_double {
            let values = bytes
                .chunks_exact(8)
                .map(|c| swap_f64(c.try_into().unwrap(), info.swap_bytes))
                .collect();
            Ok(GridValues::F64(values))
        } else {
            let values = bytes
                .chunks_exact(4)
                .map(|c| swap_f32(c.try_into().unwrap(), info.swap_bytes))
                .collect();
            Ok(GridValues::F32(values))
        }
    }

    pub fn is_3d(&self) -> bool {
        self.info.numx > 2
    }

    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.info.numy + iy) * self.info.numz + iz
    }

    fn value_f64(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        match &self.values {
            GridValues::F32(v) => v[self.index(ix, iy, iz)] as f64,
            GridValues::F64(v) => v[self.index(ix, iy, iz)],
        }
    }

    fn value_bits(&self, ix: usize, iy: usize, iz: usize) -> u32 {
        match &self.values {
            GridValues::F32(v) => v[self.index(ix, iy, iz)].to_bits(),
            GridValues::F64(_) => unreachable!("angle grids are float"),
        }
    }

    fn out_of_range(&self, lat: Degree, lon: Degree, depth: Kilometer) -> SeisddError {
        SeisddError::OutOfGridRange {
            grid: self.info.buf_path.to_string(),
            lat,
            lon,
            depth,
        }
    }

    /// Cell index and fractional offset along one axis, or None outside.
    fn axis_cell(pos: f64, orig: f64, delta: f64, num: usize) -> Option<(usize, f64)> {
        let span = (num - 1) as f64;
        let t = (pos - orig) / delta;
        if t < 0.0 || t > span {
            return None;
        }
        let i = (t.floor() as usize).min(num - 2);
        Some((i, t - i as f64))
    }

    /// Locate a geographic position in the grid. Returns per-axis cell
    /// index and fraction; x is pinned to the first cell for 2-D grids.
    fn locate(
        &self,
        lat: Degree,
        lon: Degree,
        depth: Kilometer,
    ) -> Result<[(usize, f64); 3], SeisddError> {
        let info = &self.info;
        let (xloc, yloc) = info.transform.from_lat_lon(lat, lon);
        if self.is_3d() {
            let cx = Self::axis_cell(xloc, info.origx, info.dx, info.numx);
            let cy = Self::axis_cell(yloc, info.origy, info.dy, info.numy);
            let cz = Self::axis_cell(depth, info.origz, info.dz, info.numz);
            match (cx, cy, cz) {
                (Some(cx), Some(cy), Some(cz)) => Ok([cx, cy, cz]),
                _ => Err(self.out_of_range(lat, lon, depth)),
            }
        } else {
            // 2-D grid: y axis is horizontal distance from the source
            let hdist = info
                .transform
                .distance(xloc, yloc, info.srcex, info.srcey);
            let cy = Self::axis_cell(hdist, info.origy, info.dy, info.numy);
            let cz = Self::axis_cell(depth, info.origz, info.dz, info.numz);
            match (cy, cz) {
                (Some(cy), Some(cz)) => Ok([(0, 0.0), cy, cz]),
                _ => Err(self.out_of_range(lat, lon, depth)),
            }
        }
    }

    /// Trilinear (3-D) or bilinear (2-D) interpolation of plain values.
    fn interpolate(&self, cell: [(usize, f64); 3]) -> f64 {
        let [(ix, fx), (iy, fy), (iz, fz)] = cell;
        if self.is_3d() {
            let mut acc = 0.0;
            for (cx, wx) in [(ix, 1.0 - fx), (ix + 1, fx)] {
                for (cy, wy) in [(iy, 1.0 - fy), (iy + 1, fy)] {
                    for (cz, wz) in [(iz, 1.0 - fz), (iz + 1, fz)] {
                        acc += wx * wy * wz * self.value_f64(cx, cy, cz);
                    }
                }
            }
            acc
        } else {
            let mut acc = 0.0;
            for (cy, wy) in [(iy, 1.0 - fy), (iy + 1, fy)] {
                for (cz, wz) in [(iz, 1.0 - fz), (iz + 1, fz)] {
                    acc += wy * wz * self.value_f64(ix, cy, cz);
                }
            }
            acc
        }
    }

    /// Travel time in seconds at a hypocentral position.
    pub fn time_at(
        &self,
        lat: Degree,
        lon: Degree,
        depth: Kilometer,
    ) -> Result<Seconds, SeisddError> {
        let cell = self.locate(lat, lon, depth)?;
        Ok(self.interpolate(cell))
    }

    /// Velocity in km/s at a position, converting from the stored unit.
    pub fn velocity_at(
        &self,
        lat: Degree,
        lon: Degree,
        depth: Kilometer,
    ) -> Result<KmPerSec, SeisddError> {
        let cell = self.locate(lat, lon, depth)?;
        let raw = self.interpolate(cell);
        match self.info.type_label.as_str() {
            "VELOCITY" => Ok(raw),
            "VELOCITY_METERS" => Ok(raw / 1000.0),
            "SLOWNESS" => Ok(1.0 / raw),
            "SLOW_LEN" => Ok(self.info.dx / raw),
            other => Err(SeisddError::GridFormat(
                self.info.hdr_path.to_string(),
                format!("unknown velocity unit '{other}'"),
            )),
        }
    }

    /// Interpolated take-off angles (azimuth, dip) in degrees, geographic
    /// frame. Fails when the interpolated cell quality is below
    /// `QUALITY_CUTOFF` or the position is outside the grid.
    pub fn angles_at(
        &self,
        lat: Degree,
        lon: Degree,
        depth: Kilometer,
    ) -> Result<(Degree, Degree), SeisddError> {
        let cell = self.locate(lat, lon, depth)?;
        let [(ix, fx), (iy, fy), (iz, fz)] = cell;

        let mut corners: Vec<(f64, TakeOffAngles)> = Vec::with_capacity(8);
        if self.is_3d() {
            for (cx, wx) in [(ix, 1.0 - fx), (ix + 1, fx)] {
                for (cy, wy) in [(iy, 1.0 - fy), (iy + 1, fy)] {
                    for (cz, wz) in [(iz, 1.0 - fz), (iz + 1, fz)] {
                        let a = TakeOffAngles::decode(self.value_bits(cx, cy, cz));
                        corners.push((wx * wy * wz, a));
                    }
                }
            }
        } else {
            for (cy, wy) in [(iy, 1.0 - fy), (iy + 1, fy)] {
                for (cz, wz) in [(iz, 1.0 - fz), (iz + 1, fz)] {
                    let a = TakeOffAngles::decode(self.value_bits(ix, cy, cz));
                    corners.push((wy * wz, a));
                }
            }
        }

        // quality is clamped to the worst corner of the cell
        let quality = corners.iter().map(|(_, a)| a.quality).min().unwrap_or(0);
        if quality < QUALITY_CUTOFF {
            return Err(self.out_of_range(lat, lon, depth));
        }

        let dip = corners
            .iter()
            .map(|(w, a)| w * a.dip_tenths as f64 / 10.0)
            .sum::<f64>();

        // interpolate azimuth in unwrapped form: move every corner to the
        // representative nearest the first one across the 360 deg seam
        let reference = corners[0].1.azimuth_tenths as f64 / 10.0;
        let azimuth = corners
            .iter()
            .map(|(w, a)| {
                let mut az = a.azimuth_tenths as f64 / 10.0;
                if az - reference > 180.0 {
                    az -= 360.0;
                } else if reference - az > 180.0 {
                    az += 360.0;
                }
                w * az
            })
            .sum::<f64>();

        let azimuth = self.info.transform.to_lat_lon_angle(normalize_deg(azimuth));
        Ok((azimuth, dip))
    }
}
