//! Travel-time computation backends.
//!
//! The solver only needs travel time, take-off angles and the velocity at
//! the source; the [`TravelTimeProvider`] trait is the seam between the
//! relocation core and the concrete model. Two backends are provided: the
//! gridded NLL-style tables and a homogeneous constant-velocity model.

pub mod grid;
pub mod transform;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::catalog::{PhaseType, Station};
use crate::constants::{Degree, FastMap, Kilometer, KmPerSec, Seconds};
use crate::seisdd_errors::SeisddError;
use crate::travel_time::grid::{Grid, GridKind};
use crate::travel_time::transform::{azimuth_deg, event_station_distance_km};

/// Result of one travel-time computation. Angles are in degrees: azimuth
/// east of north, dip from the downward vertical (0 down, 180 up). A
/// backend that cannot provide angles or velocity reports them as NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelTimeInfo {
    pub travel_time: Seconds,
    pub takeoff_azimuth: Degree,
    pub takeoff_dip: Degree,
    pub velocity_at_src: KmPerSec,
}

pub trait TravelTimeProvider {
    fn compute(
        &mut self,
        ev_lat: Degree,
        ev_lon: Degree,
        ev_depth: Kilometer,
        station: &Station,
        phase_type: PhaseType,
    ) -> Result<TravelTimeInfo, SeisddError>;
}

/// Straight-ray constant-velocity model.
///
/// Useful for synthetic scenarios and as a coarse fallback when no grids
/// are available: travel time is distance over velocity and the take-off
/// direction is the straight line from hypocenter to station.
#[derive(Debug, Clone)]
pub struct HomogeneousTravelTimeTable {
    pub p_velocity: KmPerSec,
    pub s_velocity: KmPerSec,
}

impl HomogeneousTravelTimeTable {
    pub fn new(p_velocity: KmPerSec, s_velocity: KmPerSec) -> Self {
        Self {
            p_velocity,
            s_velocity,
        }
    }
}

impl TravelTimeProvider for HomogeneousTravelTimeTable {
    fn compute(
        &mut self,
        ev_lat: Degree,
        ev_lon: Degree,
        ev_depth: Kilometer,
        station: &Station,
        phase_type: PhaseType,
    ) -> Result<TravelTimeInfo, SeisddError> {
        let velocity = match phase_type {
            PhaseType::P => self.p_velocity,
            PhaseType::S => self.s_velocity,
        };
        let distance = event_station_distance_km(
            ev_lat,
            ev_lon,
            ev_depth,
            station.latitude,
            station.longitude,
            station.elevation,
        );
        if distance <= 0.0 {
            return Err(SeisddError::OutOfGridRange {
                grid: "homogeneous".into(),
                lat: ev_lat,
                lon: ev_lon,
                depth: ev_depth,
            });
        }
        // z is positive down; the station sits at -elevation
        let dz = -station.elevation / 1000.0 - ev_depth;
        let dip = (dz / distance).clamp(-1.0, 1.0).acos().to_degrees();
        let azimuth = azimuth_deg(ev_lat, ev_lon, station.latitude, station.longitude);
        Ok(TravelTimeInfo {
            travel_time: distance / velocity,
            takeoff_azimuth: azimuth,
            takeoff_dip: dip,
            velocity_at_src: velocity,
        })
    }
}

type GridSlot = FastMap<(String, PhaseType), Grid>;

/// Gridded travel-time tables in the NLL format.
///
/// For every (station, phase) pair three grids are read lazily on first
/// use: velocity, travel time and take-off angles. A pair whose grids
/// cannot be loaded is remembered and every subsequent request for it
/// fails fast.
pub struct NllTravelTimeTable {
    base_path: Utf8PathBuf,
    swap_bytes: bool,
    vel_grids: GridSlot,
    time_grids: GridSlot,
    angle_grids: GridSlot,
    unloadable: std::collections::HashSet<(String, PhaseType), ahash::RandomState>,
}

impl NllTravelTimeTable {
    pub fn new(base_path: &Utf8Path, swap_bytes: bool) -> Self {
        Self {
            base_path: base_path.to_owned(),
            swap_bytes,
            vel_grids: FastMap::default(),
            time_grids: FastMap::default(),
            angle_grids: FastMap::default(),
            unloadable: Default::default(),
        }
    }

    fn ensure_loaded(
        &mut self,
        station: &Station,
        phase_type: PhaseType,
    ) -> Result<(), SeisddError> {
        let key = (station.id.clone(), phase_type);
        if self.unloadable.contains(&key) {
            return Err(SeisddError::GridFormat(
                station.id.clone(),
                "grids previously failed to load".into(),
            ));
        }
        if self.time_grids.contains_key(&key) {
            return Ok(());
        }
        let base_path = self.base_path.clone();
        let swap_bytes = self.swap_bytes;
        let load = move |kind| {
            Grid::load(
                &base_path,
                kind,
                &station.station,
                phase_type.as_char(),
                swap_bytes,
            )
        };
        match (
            load(GridKind::Velocity),
            load(GridKind::Time),
            load(GridKind::Angle),
        ) {
            (Ok(vel), Ok(time), Ok(angle)) => {
                self.vel_grids.insert(key.clone(), vel);
                self.time_grids.insert(key.clone(), time);
                self.angle_grids.insert(key, angle);
                Ok(())
            }
            (vel, time, angle) => {
                let error = [
                    vel.err().map(|e| e.to_string()),
                    time.err().map(|e| e.to_string()),
                    angle.err().map(|e| e.to_string()),
                ]
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_default();
                warn!(station = %station.id, phase = %phase_type, %error, "grid unloadable");
                self.unloadable.insert(key);
                Err(SeisddError::GridFormat(station.id.clone(), error))
            }
        }
    }
}

impl TravelTimeProvider for NllTravelTimeTable {
    fn compute(
        &mut self,
        ev_lat: Degree,
        ev_lon: Degree,
        ev_depth: Kilometer,
        station: &Station,
        phase_type: PhaseType,
    ) -> Result<TravelTimeInfo, SeisddError> {
        self.ensure_loaded(station, phase_type)?;
        let key = (station.id.clone(), phase_type);

        let time_grid = &self.time_grids[&key];
        let travel_time = time_grid.time_at(ev_lat, ev_lon, ev_depth)?;

        let velocity_at_src = self.vel_grids[&key]
            .velocity_at(ev_lat, ev_lon, ev_depth)
            .unwrap_or(f64::NAN);

        let angle_grid = &self.angle_grids[&key];
        let (takeoff_azimuth, takeoff_dip) = match angle_grid.angles_at(ev_lat, ev_lon, ev_depth) {
            Ok((azimuth, dip)) if angle_grid.is_3d() => (azimuth, dip),
            // 2-D angle grids only constrain the dip; the azimuth is the
            // bearing of the vertical plane through source and receiver
            Ok((_, dip)) => (
                azimuth_deg(ev_lat, ev_lon, station.latitude, station.longitude),
                dip,
            ),
            Err(_) => (f64::NAN, f64::NAN),
        };

        Ok(TravelTimeInfo {
            travel_time,
            takeoff_azimuth,
            takeoff_dip,
            velocity_at_src,
        })
    }
}
