//! Double-difference solver.
//!
//! Collects differential-time observations and per-(event, station-phase)
//! travel-time data, assembles the weighted sparse system `W G m = W d`
//! described in Waldhauser & Ellsworth 2000, solves it with LSMR or LSQR
//! and converts the Cartesian solution back to geographic deltas.

pub mod dd_system;
pub mod lsmr;
pub mod lsqr;

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::PhaseType;
use crate::constants::{
    Degree, EventId, FastMap, Kilometer, Seconds, C111, DEG2RAD, RAD2DEG, TT_CONSTRAINT_WEIGHT,
};
use crate::seisdd_errors::SeisddError;
use crate::solver::dd_system::{DDSystem, NO_EVENT};

/// Matrix-free access to the design matrix: the iterative kernels stay
/// oblivious to how G is stored.
pub trait SparseOperator {
    fn num_rows(&self) -> usize;
    fn num_cols(&self) -> usize;
    /// `y += A x`
    fn accumulate_ax(&self, x: &[f64], y: &mut [f64]);
    /// `x += A^T y`
    fn accumulate_aty(&self, y: &[f64], x: &mut [f64]);
}

impl SparseOperator for DDSystem {
    fn num_rows(&self) -> usize {
        self.num_rows_g
    }

    fn num_cols(&self) -> usize {
        self.num_cols_g
    }

    fn accumulate_ax(&self, x: &[f64], y: &mut [f64]) {
        DDSystem::accumulate_ax(self, x, y)
    }

    fn accumulate_aty(&self, y: &[f64], x: &mut [f64]) {
        DDSystem::accumulate_aty(self, y, x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverType {
    #[default]
    Lsmr,
    Lsqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// residual satisfied the tolerances
    Converged,
    /// no further progress possible at machine precision
    MachinePrecision,
    /// condition-number estimate exceeded the limit
    ConditionLimit,
    /// stopped on the iteration budget
    IterationLimit,
}

impl IterationOutcome {
    pub fn is_ill_conditioned(&self) -> bool {
        matches!(self, IterationOutcome::ConditionLimit)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SolveSummary {
    pub outcome: IterationOutcome,
    pub iterations: usize,
    pub rnorm: f64,
    pub arnorm: f64,
    pub anorm: f64,
    pub acond: f64,
    pub xnorm: f64,
}

/// Bidirectional id <-> dense index converter. Indices are assigned in
/// insertion order, which keeps row numbering a pure function of the
/// order observations are fed in.
pub(crate) struct IdToIndex<T> {
    map: FastMap<T, u32>,
    items: Vec<T>,
}

impl<T: Eq + Hash + Clone> Default for IdToIndex<T> {
    fn default() -> Self {
        Self {
            map: FastMap::default(),
            items: Vec::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> IdToIndex<T> {
    pub fn convert(&mut self, id: &T) -> u32 {
        if let Some(idx) = self.map.get(id) {
            return *idx;
        }
        let idx = self.items.len() as u32;
        self.map.insert(id.clone(), idx);
        self.items.push(id.clone());
        idx
    }

    pub fn get(&self, id: &T) -> Option<u32> {
        self.map.get(id).copied()
    }

    pub fn has(&self, id: &T) -> bool {
        self.map.contains_key(id)
    }

    pub fn item(&self, idx: u32) -> &T {
        &self.items[idx as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

struct Observation {
    ev1: u32,
    ev2: u32,
    ph_sta: u32,
    observed_diff_time: Seconds,
    apriori_weight: f64,
    is_xcorr: bool,
}

struct EventParams {
    lat: Degree,
    lon: Degree,
    depth: Kilometer,
    x: Kilometer,
    y: Kilometer,
    z: Kilometer,
    free: bool,
}

struct StationParams {
    lat: Degree,
    lon: Degree,
    elevation: f64,
    x: Kilometer,
    y: Kilometer,
    z: Kilometer,
}

struct ObservationParams {
    compute_ev_changes: bool,
    from_theoretical: bool,
    travel_time: Seconds,
    takeoff_azimuth: Degree,
    takeoff_dip: Degree,
    velocity_at_src: f64,
    dx: f64,
    dy: f64,
    dz: f64,
}

/// Per-(event, station, phase) statistics of the observations that used
/// this pairing, before and after weighting.
#[derive(Debug, Clone, Default)]
pub struct ParamStats {
    pub starting_tt_obs: u32,
    pub starting_cc_obs: u32,
    pub final_total_obs: u32,
    total_apriori_weight: f64,
    total_final_weight: f64,
    total_residuals: f64,
    pub peer_events: BTreeSet<EventId>,
}

impl ParamStats {
    pub fn mean_apriori_weight(&self) -> f64 {
        let n = self.starting_tt_obs + self.starting_cc_obs;
        if n == 0 {
            0.0
        } else {
            self.total_apriori_weight / n as f64
        }
    }

    pub fn mean_final_weight(&self) -> f64 {
        if self.final_total_obs == 0 {
            0.0
        } else {
            self.total_final_weight / self.final_total_obs as f64
        }
    }

    pub fn mean_residual(&self) -> f64 {
        if self.final_total_obs == 0 {
            0.0
        } else {
            self.total_residuals / self.final_total_obs as f64
        }
    }
}

/// Cumulative change of one event from the solved system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventDeltas {
    pub delta_lat: Degree,
    pub delta_lon: Degree,
    pub delta_depth: Kilometer,
    pub delta_tt: Seconds,
}

/// Per-event residual statistics of one solve.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRms {
    pub start_rms: Seconds,
    pub final_rms: Seconds,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Centroid {
    lat: Degree,
    lon: Degree,
    depth: Kilometer,
}

pub struct Solver {
    solver_type: SolverType,
    event_idx: IdToIndex<EventId>,
    ph_sta_idx: IdToIndex<(String, PhaseType)>,
    obs_idx: IdToIndex<(EventId, EventId, String, PhaseType)>,
    observations: FastMap<u32, Observation>,
    event_params: FastMap<u32, EventParams>,
    station_params: FastMap<u32, StationParams>,
    obs_params: FastMap<(u32, u32), ObservationParams>,
    param_stats: FastMap<(u32, u32), ParamStats>,
    centroid: Centroid,
    event_deltas: FastMap<u32, EventDeltas>,
    starting_residuals: Vec<f64>,
    final_residuals: Vec<f64>,
    final_weights: Vec<f64>,
}

impl Solver {
    pub fn new(solver_type: SolverType) -> Self {
        Solver {
            solver_type,
            event_idx: IdToIndex::default(),
            ph_sta_idx: IdToIndex::default(),
            obs_idx: IdToIndex::default(),
            observations: FastMap::default(),
            event_params: FastMap::default(),
            station_params: FastMap::default(),
            obs_params: FastMap::default(),
            param_stats: FastMap::default(),
            centroid: Centroid::default(),
            event_deltas: FastMap::default(),
            starting_residuals: Vec::new(),
            final_residuals: Vec::new(),
            final_weights: Vec::new(),
        }
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Register one double-difference equation between two events.
    ///
    /// The pair is canonicalised with the smaller event id first (the
    /// differential time flips sign when the events swap); a duplicate of
    /// an already registered (ev1, ev2, station, phase) tuple is ignored,
    /// so exactly one row exists per tuple.
    pub fn add_observation(
        &mut self,
        ev_id1: EventId,
        ev_id2: EventId,
        station_id: &str,
        phase_type: PhaseType,
        diff_time: Seconds,
        apriori_weight: f64,
        is_xcorr: bool,
    ) {
        let (ev_id1, ev_id2, diff_time) = if ev_id1 <= ev_id2 {
            (ev_id1, ev_id2, diff_time)
        } else {
            (ev_id2, ev_id1, -diff_time)
        };
        let key = (ev_id1, ev_id2, station_id.to_string(), phase_type);
        if self.obs_idx.has(&key) {
            return;
        }
        let row = self.obs_idx.convert(&key);

        let ev1 = self.event_idx.convert(&ev_id1);
        let ev2 = self.event_idx.convert(&ev_id2);
        let ph_sta = self.ph_sta_idx.convert(&(station_id.to_string(), phase_type));

        for (ev, peer) in [(ev1, ev_id2), (ev2, ev_id1)] {
            let stats = self.param_stats.entry((ev, ph_sta)).or_default();
            if is_xcorr {
                stats.starting_cc_obs += 1;
            } else {
                stats.starting_tt_obs += 1;
            }
            stats.total_apriori_weight += apriori_weight;
            stats.peer_events.insert(peer);
        }

        self.observations.insert(
            row,
            Observation {
                ev1,
                ev2,
                ph_sta,
                observed_diff_time: diff_time,
                apriori_weight,
                is_xcorr,
            },
        );
    }

    /// Register the travel-time data of one (event, station, phase)
    /// pairing referenced by observations. `compute_ev_changes` is false
    /// for fixed events: they keep no parameter columns in the system.
    #[allow(clippy::too_many_arguments)]
    pub fn add_observation_params(
        &mut self,
        ev_id: EventId,
        station_id: &str,
        phase_type: PhaseType,
        ev_lat: Degree,
        ev_lon: Degree,
        ev_depth: Kilometer,
        sta_lat: Degree,
        sta_lon: Degree,
        sta_elevation: f64,
        compute_ev_changes: bool,
        from_theoretical: bool,
        travel_time: Seconds,
        takeoff_azimuth: Degree,
        takeoff_dip: Degree,
        velocity_at_src: f64,
    ) {
        let ev = self.event_idx.convert(&ev_id);
        let ph_sta = self.ph_sta_idx.convert(&(station_id.to_string(), phase_type));

        let entry = self.event_params.entry(ev).or_insert(EventParams {
            lat: ev_lat,
            lon: ev_lon,
            depth: ev_depth,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            free: false,
        });
        entry.free |= compute_ev_changes;

        self.station_params.entry(ph_sta).or_insert(StationParams {
            lat: sta_lat,
            lon: sta_lon,
            elevation: sta_elevation,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        });

        self.obs_params.insert(
            (ev, ph_sta),
            ObservationParams {
                compute_ev_changes,
                from_theoretical,
                travel_time,
                takeoff_azimuth,
                takeoff_dip,
                velocity_at_src,
                dx: 0.0,
                dy: 0.0,
                dz: 0.0,
            },
        );
    }

    fn compute_centroid(&mut self) {
        let n = self.event_params.len() as f64;
        let mut c = Centroid::default();
        for params in self.event_params.values() {
            c.lat += params.lat;
            c.lon += params.lon;
            c.depth += params.depth;
        }
        c.lat /= n;
        c.lon /= n;
        c.depth /= n;
        self.centroid = c;
    }

    // Local Cartesian frame about the centroid: x east, y north, z down,
    // via the small-angle conversion with cos(centroid latitude). z stays
    // absolute (depth); only differences enter the system.
    fn compute_partial_derivatives(&mut self) {
        self.compute_centroid();

        let centroid = self.centroid;
        for params in self.event_params.values_mut() {
            let x = (params.lon - centroid.lon) * C111 * (centroid.lat * DEG2RAD).cos();
            let y = (params.lat - centroid.lat) * C111;
            params.x = x;
            params.y = y;
            params.z = params.depth;
        }
        for params in self.station_params.values_mut() {
            let x = (params.lon - centroid.lon) * C111 * (centroid.lat * DEG2RAD).cos();
            let y = (params.lat - centroid.lat) * C111;
            params.x = x;
            params.y = y;
            params.z = -params.elevation / 1000.0;
        }

        for ((ev, ph_sta), obs) in self.obs_params.iter_mut() {
            let event = &self.event_params[ev];
            let station = &self.station_params[ph_sta];

            let mut azimuth = obs.takeoff_azimuth;
            let mut dip = obs.takeoff_dip;
            let mut velocity = obs.velocity_at_src;

            // backends without angle information get a straight-ray
            // approximation from the event-station geometry
            if !azimuth.is_finite() || !dip.is_finite() || !velocity.is_finite() {
                let dx = station.x - event.x;
                let dy = station.y - event.y;
                let dz = station.z - event.z;
                let dist = (dx * dx + dy * dy + dz * dz).sqrt();
                if dist <= 0.0 || obs.travel_time <= 0.0 {
                    continue;
                }
                azimuth = dx.atan2(dy) * RAD2DEG;
                dip = (dz / dist).clamp(-1.0, 1.0).acos() * RAD2DEG;
                velocity = dist / obs.travel_time;
            }

            let slowness = 1.0 / velocity;
            let az = azimuth * DEG2RAD;
            let di = dip * DEG2RAD;
            obs.dx = -slowness * di.sin() * az.sin();
            obs.dy = -slowness * di.sin() * az.cos();
            obs.dz = -slowness * di.cos();
        }
    }

    /// Tukey bi-weight of a residual for cutoff `alpha` (seconds).
    fn biweight(residual: f64, alpha: f64) -> f64 {
        if residual.abs() >= alpha {
            0.0
        } else {
            let t = residual / alpha;
            (1.0 - t * t) * (1.0 - t * t)
        }
    }

    fn prepare_dd_system(
        &mut self,
        tt_constraint: bool,
        residual_down_weight: f64,
    ) -> Result<DDSystem, SeisddError> {
        let n_obs = self.observations.len();
        if n_obs == 0 {
            return Err(SeisddError::SolverDidNotConverge(
                "no observations in the system".into(),
            ));
        }
        let n_evts = self.event_idx.len();
        let n_ph_stas = self.ph_sta_idx.len();

        // travel-time-shift constraints: one row per free, observed
        // (event, station-phase) pairing; theoretical phases are excluded
        let mut constraints: Vec<(u32, u32)> = if tt_constraint {
            self.obs_params
                .iter()
                .filter(|(_, p)| p.compute_ev_changes && !p.from_theoretical)
                .map(|(key, _)| *key)
                .collect()
        } else {
            Vec::new()
        };
        constraints.sort_unstable();

        let mut dd = DDSystem::new(n_obs, n_evts, n_ph_stas, constraints.len());

        for ((ev, ph_sta), params) in self.obs_params.iter() {
            dd.g[*ev as usize * n_ph_stas + *ph_sta as usize] =
                [params.dx, params.dy, params.dz, 1.0];
        }

        for row in 0..n_obs {
            let obs = &self.observations[&(row as u32)];
            let p1 = self.obs_params.get(&(obs.ev1, obs.ph_sta));
            let p2 = self.obs_params.get(&(obs.ev2, obs.ph_sta));
            let (p1, p2) = match (p1, p2) {
                (Some(p1), Some(p2)) => (p1, p2),
                // travel-time data missing on one side: dead row
                _ => continue,
            };
            let side1 = if p1.compute_ev_changes { obs.ev1 as i32 } else { NO_EVENT };
            let side2 = if p2.compute_ev_changes { obs.ev2 as i32 } else { NO_EVENT };
            if side1 == NO_EVENT && side2 == NO_EVENT {
                continue;
            }
            dd.ev_by_obs[0][row] = side1;
            dd.ev_by_obs[1][row] = side2;
            dd.ph_sta_by_obs[row] = obs.ph_sta;
            dd.d[row] = obs.observed_diff_time - (p1.travel_time - p2.travel_time);
            dd.w[row] = obs.apriori_weight;
        }

        if residual_down_weight > 0.0 {
            for row in 0..n_obs {
                if dd.w[row] > 0.0 {
                    dd.w[row] *= Self::biweight(dd.d[row], residual_down_weight);
                }
            }
        }

        for (i, (ev, ph_sta)) in constraints.iter().enumerate() {
            let row = n_obs + i;
            dd.ev_by_obs[0][row] = *ev as i32;
            dd.ev_by_obs[1][row] = NO_EVENT;
            dd.ph_sta_by_obs[row] = *ph_sta;
            dd.d[row] = 0.0;
            dd.w[row] = TT_CONSTRAINT_WEIGHT;
        }

        Ok(dd)
    }

    /// Assemble and solve the system.
    ///
    /// `num_iterations` caps the inner iterations when > 0; otherwise the
    /// kernel stops on its own tolerances. The ill-conditioned outcome is
    /// reported in the summary, the last iterate is kept either way.
    pub fn solve(
        &mut self,
        num_iterations: u32,
        tt_constraint: bool,
        damping_factor: f64,
        residual_down_weight: f64,
        normalize_g: bool,
    ) -> Result<SolveSummary, SeisddError> {
        self.compute_partial_derivatives();
        let mut dd = self.prepare_dd_system(tt_constraint, residual_down_weight)?;

        self.starting_residuals = dd.d[..dd.n_obs].to_vec();

        if normalize_g {
            dd.normalize_columns();
        }

        let b: Vec<f64> = (0..dd.num_rows_g).map(|r| dd.w[r] * dd.d[r]).collect();

        let (atol, btol, conlim, itn_lim) = if num_iterations > 0 {
            (0.0, 0.0, 0.0, num_iterations as usize)
        } else {
            (1e-6, 1e-6, 1e8, 4 * dd.num_cols_g.max(10))
        };

        let (x, summary) = match self.solver_type {
            SolverType::Lsmr => lsmr::lsmr(&dd, &b, damping_factor, atol, btol, conlim, itn_lim),
            SolverType::Lsqr => lsqr::lsqr(&dd, &b, damping_factor, atol, btol, conlim, itn_lim),
        };
        debug!(
            iterations = summary.iterations,
            rnorm = summary.rnorm,
            acond = summary.acond,
            "inner solve done"
        );

        dd.m.copy_from_slice(x.as_slice());
        if normalize_g {
            dd.rescale_solution();
        }

        self.load_solutions(&dd);
        self.load_residual_stats(&dd);
        Ok(summary)
    }

    fn load_solutions(&mut self, dd: &DDSystem) {
        self.event_deltas.clear();
        let cos_lat = (self.centroid.lat * DEG2RAD).cos();
        for ev in 0..dd.n_evts as u32 {
            let free = self.event_params.get(&ev).map(|p| p.free).unwrap_or(false);
            if !free {
                continue;
            }
            let col = ev as usize * 4;
            let dx = dd.m[col];
            let dy = dd.m[col + 1];
            let dz = dd.m[col + 2];
            let dt = dd.m[col + 3];
            if !(dx.is_finite() && dy.is_finite() && dz.is_finite() && dt.is_finite()) {
                continue;
            }
            self.event_deltas.insert(
                ev,
                EventDeltas {
                    delta_lat: dy / C111,
                    delta_lon: dx / (C111 * cos_lat),
                    delta_depth: dz,
                    delta_tt: dt,
                },
            );
        }
    }

    fn load_residual_stats(&mut self, dd: &DDSystem) {
        self.final_residuals = (0..dd.n_obs).map(|row| dd.row_residual(row)).collect();
        self.final_weights = dd.w[..dd.n_obs].to_vec();
        for row in 0..dd.n_obs {
            let obs = &self.observations[&(row as u32)];
            let weight = dd.w[row];
            let residual = self.final_residuals[row];
            for ev in [obs.ev1, obs.ev2] {
                if let Some(stats) = self.param_stats.get_mut(&(ev, obs.ph_sta)) {
                    if weight > 0.0 {
                        stats.final_total_obs += 1;
                        stats.total_final_weight += weight;
                        stats.total_residuals += residual;
                    }
                }
            }
        }
    }

    /// Solved change of one event, None for fixed or unknown events.
    pub fn event_changes(&self, ev_id: EventId) -> Option<EventDeltas> {
        let ev = self.event_idx.get(&ev_id)?;
        self.event_deltas.get(&ev).copied()
    }

    /// Statistics of the observations using one (event, station, phase).
    pub fn observation_params_changes(
        &self,
        ev_id: EventId,
        station_id: &str,
        phase_type: PhaseType,
    ) -> Option<&ParamStats> {
        let ev = self.event_idx.get(&ev_id)?;
        let ph_sta = self.ph_sta_idx.get(&(station_id.to_string(), phase_type))?;
        self.param_stats.get(&(ev, ph_sta))
    }

    /// Per-event rms of the double-difference residuals, before and after
    /// the solve.
    pub fn event_residual_rms(&self) -> BTreeMap<EventId, EventRms> {
        let mut acc: BTreeMap<EventId, (f64, f64, u32)> = BTreeMap::new();
        for (row, obs) in (0..self.starting_residuals.len()).map(|r| (r, &self.observations[&(r as u32)])) {
            if self.final_weights.get(row).copied().unwrap_or(0.0) == 0.0 {
                continue;
            }
            let start = self.starting_residuals[row];
            let fin = self.final_residuals[row];
            for ev in [obs.ev1, obs.ev2] {
                let id = *self.event_idx.item(ev);
                let entry = acc.entry(id).or_default();
                entry.0 += start * start;
                entry.1 += fin * fin;
                entry.2 += 1;
            }
        }
        acc.into_iter()
            .map(|(id, (s, f, n))| {
                (
                    id,
                    EventRms {
                        start_rms: (s / n as f64).sqrt(),
                        final_rms: (f / n as f64).sqrt(),
                        count: n,
                    },
                )
            })
            .collect()
    }

    /// Total starting observation counts per event: (catalog, xcorr).
    pub fn event_observation_totals(&self) -> BTreeMap<EventId, (u32, u32)> {
        let mut totals = BTreeMap::new();
        for ((ev, _), stats) in &self.param_stats {
            let id = *self.event_idx.item(*ev);
            let entry = totals.entry(id).or_insert((0u32, 0u32));
            entry.0 += stats.starting_tt_obs;
            entry.1 += stats.starting_cc_obs;
        }
        totals
    }

    /// Final (down-weighted) weight of each observation row.
    pub fn final_observation_weights(&self) -> &[f64] {
        &self.final_weights
    }
}

/// Row-major dense matrix operator used by the kernel unit tests.
#[cfg(test)]
pub(crate) struct DenseOperator {
    rows: usize,
    cols: usize,
    entries: Vec<f64>,
}

#[cfg(test)]
impl DenseOperator {
    pub fn new(rows: usize, cols: usize, entries: Vec<f64>) -> Self {
        assert_eq!(entries.len(), rows * cols);
        Self { rows, cols, entries }
    }
}

#[cfg(test)]
impl SparseOperator for DenseOperator {
    fn num_rows(&self) -> usize {
        self.rows
    }

    fn num_cols(&self) -> usize {
        self.cols
    }

    fn accumulate_ax(&self, x: &[f64], y: &mut [f64]) {
        for r in 0..self.rows {
            for c in 0..self.cols {
                y[r] += self.entries[r * self.cols + c] * x[c];
            }
        }
    }

    fn accumulate_aty(&self, y: &[f64], x: &mut [f64]) {
        for r in 0..self.rows {
            for c in 0..self.cols {
                x[c] += self.entries[r * self.cols + c] * y[r];
            }
        }
    }
}

#[cfg(test)]
mod solver_test {
    use approx::assert_relative_eq;

    use super::*;

    use crate::travel_time::transform::event_station_distance_km;

    const STATIONS: [(f64, f64); 6] = [
        (46.05, 7.00),
        (45.95, 7.02),
        (46.02, 7.06),
        (46.00, 6.94),
        (45.96, 6.96),
        (46.06, 7.04),
    ];

    /// Two events 1 km apart at 5 km depth observed by six surface
    /// stations from a 6 km/s half space, with a synthetic 40 ms
    /// origin-time offset baked into the differentials of event 2.
    /// With the travel-time constraints on, all 8 parameter columns are
    /// determined.
    fn two_event_solver(solver_type: SolverType) -> Solver {
        let mut solver = Solver::new(solver_type);
        let (lat1, lon1, depth) = (46.0, 7.0, 5.0);
        let lat2 = 46.009;

        for (i, (sta_lat, sta_lon)) in STATIONS.iter().enumerate() {
            let station_id = format!("XX.ST{i}.00");
            let tt = |ev_lat: f64, ev_lon: f64| {
                event_station_distance_km(ev_lat, ev_lon, depth, *sta_lat, *sta_lon, 0.0) / 6.0
            };
            let tt1 = tt(lat1, lon1);
            let tt2 = tt(lat2, lon1);

            solver.add_observation(
                1, 2, &station_id, PhaseType::P, tt1 - tt2 - 0.040, 1.0, false,
            );
            solver.add_observation_params(
                1, &station_id, PhaseType::P, lat1, lon1, depth, *sta_lat, *sta_lon, 0.0,
                true, false, tt1, f64::NAN, f64::NAN, f64::NAN,
            );
            solver.add_observation_params(
                2, &station_id, PhaseType::P, lat2, lon1, depth, *sta_lat, *sta_lon, 0.0,
                true, false, tt2, f64::NAN, f64::NAN, f64::NAN,
            );
        }
        solver
    }

    #[test]
    fn recovers_time_shift() {
        let mut solver = two_event_solver(SolverType::Lsmr);
        solver.solve(0, true, 0.0, 0.0, true).unwrap();
        let d1 = solver.event_changes(1).unwrap();
        let d2 = solver.event_changes(2).unwrap();
        // the -40 ms double difference splits between the two events
        assert!(d1.delta_tt < 0.0);
        assert!(d2.delta_tt > 0.0);
        assert_relative_eq!(d1.delta_tt - d2.delta_tt, -0.040, epsilon = 5e-3);
    }

    #[test]
    fn normalized_and_plain_solutions_agree() {
        let mut plain = two_event_solver(SolverType::Lsmr);
        plain.solve(0, true, 0.0, 0.0, false).unwrap();
        let mut scaled = two_event_solver(SolverType::Lsmr);
        scaled.solve(0, true, 0.0, 0.0, true).unwrap();

        for ev in [1, 2] {
            let a = plain.event_changes(ev).unwrap();
            let b = scaled.event_changes(ev).unwrap();
            assert_relative_eq!(a.delta_tt, b.delta_tt, epsilon = 1e-5);
            assert_relative_eq!(a.delta_lat, b.delta_lat, epsilon = 1e-5);
            assert_relative_eq!(a.delta_lon, b.delta_lon, epsilon = 1e-5);
            assert_relative_eq!(a.delta_depth, b.delta_depth, epsilon = 1e-5);
        }
    }

    #[test]
    fn lsqr_and_lsmr_agree() {
        let mut a = two_event_solver(SolverType::Lsmr);
        a.solve(0, true, 0.0, 0.0, true).unwrap();
        let mut b = two_event_solver(SolverType::Lsqr);
        b.solve(0, true, 0.0, 0.0, true).unwrap();
        for ev in [1, 2] {
            let da = a.event_changes(ev).unwrap();
            let db = b.event_changes(ev).unwrap();
            assert_relative_eq!(da.delta_tt, db.delta_tt, epsilon = 1e-5);
            assert_relative_eq!(da.delta_depth, db.delta_depth, epsilon = 1e-5);
        }
    }

    #[test]
    fn fixed_event_gets_no_deltas() {
        let mut solver = Solver::new(SolverType::Lsmr);
        let tt = 1.2;
        solver.add_observation(1, 2, "XX.STA.00", PhaseType::P, -0.02, 1.0, false);
        solver.add_observation_params(
            1, "XX.STA.00", PhaseType::P, 46.0, 7.0, 5.0, 46.05, 7.05, 0.0,
            true, false, tt, f64::NAN, f64::NAN, f64::NAN,
        );
        solver.add_observation_params(
            2, "XX.STA.00", PhaseType::P, 46.009, 7.0, 5.0, 46.05, 7.05, 0.0,
            false, false, tt, f64::NAN, f64::NAN, f64::NAN,
        );
        solver.solve(0, false, 0.0, 0.0, true).unwrap();
        assert!(solver.event_changes(1).is_some());
        assert!(solver.event_changes(2).is_none());
    }

    #[test]
    fn duplicate_observation_rows_are_collapsed() {
        let mut solver = Solver::new(SolverType::Lsmr);
        solver.add_observation(1, 2, "XX.STA.00", PhaseType::P, 0.1, 1.0, false);
        solver.add_observation(2, 1, "XX.STA.00", PhaseType::P, -0.1, 1.0, false);
        assert_eq!(solver.num_observations(), 1);
    }

    #[test]
    fn biweight_cuts_off_at_alpha() {
        assert_eq!(Solver::biweight(3.0, 3.0), 0.0);
        assert_eq!(Solver::biweight(-4.0, 3.0), 0.0);
        assert_relative_eq!(Solver::biweight(0.0, 3.0), 1.0);
        let w = Solver::biweight(1.5, 3.0);
        assert_relative_eq!(w, (1.0 - 0.25) * (1.0 - 0.25), epsilon = 1e-12);
    }

    #[test]
    fn outlier_row_weight_drops_to_zero() {
        let mut solver = two_event_solver(SolverType::Lsmr);
        // extra, inconsistent observation with a huge residual
        solver.add_observation(1, 2, "XX.OUT.00", PhaseType::P, 5.0, 1.0, false);
        solver.add_observation_params(
            1, "XX.OUT.00", PhaseType::P, 46.0, 7.0, 5.0, 46.06, 6.95, 0.0,
            true, false, 1.3, f64::NAN, f64::NAN, f64::NAN,
        );
        solver.add_observation_params(
            2, "XX.OUT.00", PhaseType::P, 46.009, 7.0, 5.0, 46.06, 6.95, 0.0,
            true, false, 1.25, f64::NAN, f64::NAN, f64::NAN,
        );
        solver.solve(0, true, 0.0, 0.120, true).unwrap();
        let weights = solver.final_observation_weights();
        // the six consistent rows survive, the outlier is zeroed
        for w in &weights[..6] {
            assert!(*w > 0.0);
        }
        assert_eq!(weights[6], 0.0);
    }

    #[test]
    fn residual_rms_decreases() {
        let mut solver = two_event_solver(SolverType::Lsmr);
        solver.solve(0, true, 0.0, 0.0, true).unwrap();
        let rms = solver.event_residual_rms();
        for (_, stats) in rms {
            assert!(stats.count > 0);
            assert!(stats.final_rms <= stats.start_rms);
        }
    }

    #[test]
    fn observation_stats_track_pairings() {
        let mut solver = two_event_solver(SolverType::Lsmr);
        solver.solve(0, true, 0.0, 0.0, true).unwrap();

        let stats = solver
            .observation_params_changes(1, "XX.ST0.00", PhaseType::P)
            .unwrap();
        assert_eq!(stats.starting_tt_obs, 1);
        assert_eq!(stats.starting_cc_obs, 0);
        assert_eq!(stats.final_total_obs, 1);
        assert!(stats.peer_events.contains(&2));
        assert_relative_eq!(stats.mean_apriori_weight(), 1.0);
        assert_relative_eq!(stats.mean_final_weight(), 1.0);
        assert!(stats.mean_residual().abs() < 0.1);

        assert!(solver
            .observation_params_changes(1, "XX.NOPE.00", PhaseType::P)
            .is_none());

        let totals = solver.event_observation_totals();
        assert_eq!(totals[&1], (6, 0));
        assert_eq!(totals[&2], (6, 0));
    }
}
