//! Double-difference relocation engine.
//!
//! [`Seisdd`] ties the pipeline together: neighbour selection, optional
//! synthesis of theoretical phases, cross-correlation of phase pairs,
//! assembly of the double-difference system and the outer iteration loop
//! that applies the solved deltas back to the hypocentres. Relocation is
//! a batch transformation: the input catalog is never modified, a new
//! catalog is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Event, Phase, PhaseType, RelocInfo, Station};
use crate::clustering::{select_neighbours, ClusteringOptions, Neighbours};
use crate::constants::{
    EventId, Seconds, THEORETICAL_MIN_PEERS, THEORETICAL_WEIGHT_CAP,
};
use crate::seisdd_errors::SeisddError;
use crate::solver::{EventRms, Solver, SolverType};
use crate::time::{add_seconds, seconds_between};
use crate::travel_time::transform::event_station_distance_km;
use crate::travel_time::TravelTimeProvider;
use crate::xcorr::waveform::{SnrOptions, WaveformLoader, WfFilterOptions};
use crate::xcorr::{Counters, XCorrCache, XCorrEngine, XCorrOptions};

/// Static configuration of the engine (waveform and correlation side).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub xcorr_p: XCorrOptions,
    pub xcorr_s: XCorrOptions,
    pub wf_filter: WfFilterOptions,
    pub snr: SnrOptions,
}

/// Options of the double-difference inversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    pub solver_type: SolverType,
    pub l2_normalization: bool,
    /// inner iteration cap, 0 lets the kernel stop on its tolerances
    pub solver_iterations: u32,
    /// outer iterations; convergence is by count, not tolerance
    pub algo_iterations: u32,
    pub tt_constraint: bool,
    pub damping_factor_start: f64,
    pub damping_factor_end: f64,
    pub down_weighting_by_residual_start: Seconds,
    pub down_weighting_by_residual_end: Seconds,
    pub use_pick_uncertainty: bool,
    pub abs_tt_diff_obs_weight: f64,
    pub xcorr_obs_weight: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            solver_type: SolverType::Lsmr,
            l2_normalization: true,
            solver_iterations: 0,
            algo_iterations: 20,
            tt_constraint: true,
            damping_factor_start: 0.0,
            damping_factor_end: 0.0,
            down_weighting_by_residual_start: 0.0,
            down_weighting_by_residual_end: 0.0,
            use_pick_uncertainty: false,
            abs_tt_diff_obs_weight: 1.0,
            xcorr_obs_weight: 1.0,
        }
    }
}

/// Diagnostics of one relocation run.
#[derive(Debug, Default, Clone)]
pub struct RunDiagnostics {
    pub counters: Counters,
    pub events_without_neighbours: Vec<EventId>,
    pub dropped_observations: u32,
    pub solver_warnings: u32,
}

/// Travel-time data of the (event, station, phase) pairings referenced by
/// the observations of one outer iteration. A pairing whose computation
/// failed is remembered so the observation rows using it are dropped
/// without retrying.
#[derive(Default)]
struct ObservationParams {
    entries: BTreeMap<(EventId, String, PhaseType), ObservationParamsEntry>,
    failed: BTreeSet<(EventId, String, PhaseType)>,
}

struct ObservationParamsEntry {
    ev_lat: f64,
    ev_lon: f64,
    ev_depth: f64,
    sta_lat: f64,
    sta_lon: f64,
    sta_elevation: f64,
    compute_ev_changes: bool,
    theoretical: bool,
    travel_time: Seconds,
    takeoff_azimuth: f64,
    takeoff_dip: f64,
    velocity_at_src: f64,
}

impl ObservationParams {
    fn add(
        &mut self,
        ttt: &mut dyn TravelTimeProvider,
        event: &Event,
        station: &Station,
        phase: &Phase,
        compute_ev_changes: bool,
    ) -> bool {
        let key = (event.id, station.id.clone(), phase.phase_type);
        if self.failed.contains(&key) {
            return false;
        }
        if self.entries.contains_key(&key) {
            return true;
        }
        match ttt.compute(
            event.latitude,
            event.longitude,
            event.depth,
            station,
            phase.phase_type,
        ) {
            Ok(info) if info.travel_time.is_finite() && info.travel_time > 0.0 => {
                self.entries.insert(
                    key,
                    ObservationParamsEntry {
                        ev_lat: event.latitude,
                        ev_lon: event.longitude,
                        ev_depth: event.depth,
                        sta_lat: station.latitude,
                        sta_lon: station.longitude,
                        sta_elevation: station.elevation,
                        compute_ev_changes,
                        theoretical: phase.is_theoretical,
                        travel_time: info.travel_time,
                        takeoff_azimuth: info.takeoff_azimuth,
                        takeoff_dip: info.takeoff_dip,
                        velocity_at_src: info.velocity_at_src,
                    },
                );
                true
            }
            _ => {
                self.failed.insert(key);
                false
            }
        }
    }

    fn add_to_solver(&self, solver: &mut Solver) {
        for ((ev_id, station_id, phase_type), entry) in &self.entries {
            solver.add_observation_params(
                *ev_id,
                station_id,
                *phase_type,
                entry.ev_lat,
                entry.ev_lon,
                entry.ev_depth,
                entry.sta_lat,
                entry.sta_lon,
                entry.sta_elevation,
                entry.compute_ev_changes,
                entry.theoretical,
                entry.travel_time,
                entry.takeoff_azimuth,
                entry.takeoff_dip,
                entry.velocity_at_src,
            );
        }
    }
}

/// The relocation engine. Owns the source catalog, the travel-time
/// provider and the waveform loader chain feeding the cross-correlation
/// engine.
pub struct Seisdd {
    catalog: Catalog,
    xcorr_engine: XCorrEngine<Box<dyn WaveformLoader>>,
    ttt: Box<dyn TravelTimeProvider>,
    use_artificial_phases: bool,
    diagnostics: RunDiagnostics,
}

impl Seisdd {
    pub fn new(
        catalog: Catalog,
        config: Config,
        ttt: Box<dyn TravelTimeProvider>,
        wf_loader: Box<dyn WaveformLoader>,
    ) -> Result<Self, SeisddError> {
        catalog.validate()?;
        let xcorr_engine =
            XCorrEngine::new(wf_loader, config.xcorr_p.clone(), config.xcorr_s.clone());
        Ok(Seisdd {
            catalog,
            xcorr_engine,
            ttt,
            use_artificial_phases: true,
            diagnostics: RunDiagnostics::default(),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn set_use_artificial_phases(&mut self, use_artificial: bool) {
        self.use_artificial_phases = use_artificial;
    }

    /// Diagnostics of the last relocation run.
    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    /// Relocate every event of the catalog against its neighbours.
    ///
    /// Events failing the clustering thresholds stay at their original
    /// location and are listed in the diagnostics; the run only fails on
    /// structural errors.
    pub fn relocate_multi_events(
        &mut self,
        clust_opt: &ClusteringOptions,
        solver_opt: &SolverOptions,
    ) -> Result<Catalog, SeisddError> {
        self.diagnostics = RunDiagnostics::default();
        self.xcorr_engine.counters = Counters::default();
        info!(events = self.catalog.num_events(), "multi-event relocation");

        let mut working = self.catalog.clone();
        let event_ids: Vec<EventId> = working.events().map(|ev| ev.id).collect();

        let mut neighbours_list: Vec<Neighbours> = Vec::new();
        for id in &event_ids {
            let event = working.event(*id).expect("event listed above").clone();
            match select_neighbours(&working, &event, clust_opt) {
                Ok(neighbours) => neighbours_list.push(neighbours),
                Err(SeisddError::NotEnoughNeighbours { event, found, required }) => {
                    debug!(event, found, required, "skipped: not enough neighbours");
                    self.diagnostics.events_without_neighbours.push(event);
                }
                Err(other) => return Err(other),
            }
        }
        if neighbours_list.is_empty() {
            info!("no event has enough neighbours, catalog unchanged");
            return Ok(self.catalog.clone());
        }

        if self.use_artificial_phases {
            for neighbours in neighbours_list.iter_mut() {
                Self::add_missing_event_phases(&mut working, neighbours)?;
            }
        }

        let xcorr = self.build_xcorr_cache(&working, &neighbours_list, clust_opt);
        self.relocate(&working, &neighbours_list, solver_opt, false, &xcorr)
    }

    /// Relocate one event against the background catalog, which is held
    /// fixed. Step 1 uses catalog picks only; step 2 re-clusters from the
    /// improved location and adds cross-correlation (and, when enabled,
    /// theoretical phases). If step 2 cannot cluster, the step 1 result
    /// is returned.
    pub fn relocate_single_event(
        &mut self,
        event_catalog: &Catalog,
        clust_opt1: &ClusteringOptions,
        clust_opt2: &ClusteringOptions,
        solver_opt: &SolverOptions,
    ) -> Result<Catalog, SeisddError> {
        self.diagnostics = RunDiagnostics::default();
        self.xcorr_engine.counters = Counters::default();
        event_catalog.validate()?;
        let ids: Vec<EventId> = event_catalog.events().map(|ev| ev.id).collect();
        if ids.len() != 1 {
            return Err(SeisddError::InvalidCatalog(format!(
                "single-event relocation needs exactly one event, found {}",
                ids.len()
            )));
        }
        let ev_id = ids[0];
        if self.catalog.event(ev_id).is_some() {
            return Err(SeisddError::InvalidCatalog(format!(
                "event id {ev_id} collides with the background catalog"
            )));
        }
        info!(event = ev_id, "single-event relocation");

        // step 1: catalog differential times only
        let mut search = self.catalog.clone();
        search.merge(event_catalog)?;
        let ref_event = search.event(ev_id).expect("just merged").clone();
        let neighbours = select_neighbours(&search, &ref_event, clust_opt1)?;
        let step1 = self
            .relocate(&search, &[neighbours], solver_opt, true, &XCorrCache::new())?
            .extract_event(ev_id)?;

        // step 2: re-cluster from the improved location, with xcorr
        let mut search = self.catalog.clone();
        search.merge(&step1)?;
        let ref_event = search.event(ev_id).expect("just merged").clone();
        let mut neighbours = match select_neighbours(&search, &ref_event, clust_opt2) {
            Ok(neighbours) => neighbours,
            Err(SeisddError::NotEnoughNeighbours { .. }) => {
                warn!(event = ev_id, "step 2 clustering failed, keeping step 1 result");
                return Ok(step1);
            }
            Err(other) => return Err(other),
        };
        if self.use_artificial_phases {
            Self::add_missing_event_phases(&mut search, &mut neighbours)?;
        }
        let xcorr = self.build_xcorr_cache(&search, std::slice::from_ref(&neighbours), clust_opt2);
        self.relocate(&search, &[neighbours], solver_opt, true, &xcorr)?
            .extract_event(ev_id)
    }

    /// Linear schedule between the start and end value of an option
    /// across the outer iterations.
    fn interpolated(start: f64, end: f64, iteration: u32, total: u32) -> f64 {
        if total <= 1 {
            return start;
        }
        start + (end - start) * iteration as f64 / (total - 1) as f64
    }

    fn pick_weight(phase: &Phase, use_pick_uncertainty: bool) -> f64 {
        if use_pick_uncertainty {
            if let Some(uncertainty) = phase.uncertainty {
                if uncertainty > 0.0 {
                    return 1.0 / (uncertainty * uncertainty);
                }
            }
        }
        phase.weight
    }

    /// The outer iteration loop shared by both relocation modes.
    fn relocate(
        &mut self,
        base: &Catalog,
        neighbours_list: &[Neighbours],
        solver_opt: &SolverOptions,
        keep_neighbours_fixed: bool,
        xcorr: &XCorrCache,
    ) -> Result<Catalog, SeisddError> {
        let mut working = base.clone();
        let mut first_rms: BTreeMap<EventId, EventRms> = BTreeMap::new();
        let mut last_solver: Option<Solver> = None;

        for iteration in 0..solver_opt.algo_iterations {
            let damping = Self::interpolated(
                solver_opt.damping_factor_start,
                solver_opt.damping_factor_end,
                iteration,
                solver_opt.algo_iterations,
            );
            let down_weight = Self::interpolated(
                solver_opt.down_weighting_by_residual_start,
                solver_opt.down_weighting_by_residual_end,
                iteration,
                solver_opt.algo_iterations,
            );

            let mut solver = Solver::new(solver_opt.solver_type);
            let mut obs_params = ObservationParams::default();
            for neighbours in neighbours_list {
                self.add_observations(
                    &mut solver,
                    &mut obs_params,
                    &working,
                    neighbours,
                    keep_neighbours_fixed,
                    solver_opt,
                    xcorr,
                );
            }
            obs_params.add_to_solver(&mut solver);

            match solver.solve(
                solver_opt.solver_iterations,
                solver_opt.tt_constraint,
                damping,
                down_weight,
                solver_opt.l2_normalization,
            ) {
                Ok(summary) => {
                    debug!(
                        iteration,
                        inner_iterations = summary.iterations,
                        rnorm = summary.rnorm,
                        "outer iteration"
                    );
                    if summary.outcome.is_ill_conditioned() {
                        warn!(iteration, acond = summary.acond, "ill-conditioned system");
                        self.diagnostics.solver_warnings += 1;
                    }
                }
                Err(error) => {
                    warn!(iteration, %error, "solve failed, stopping outer loop");
                    self.diagnostics.solver_warnings += 1;
                    break;
                }
            }

            if iteration == 0 {
                first_rms = solver.event_residual_rms();
            }

            // apply the deltas to every non-fixed event
            let ids: Vec<EventId> = working.events().map(|ev| ev.id).collect();
            for id in ids {
                let Some(deltas) = solver.event_changes(id) else {
                    continue;
                };
                let mut event = working.event(id).expect("event listed above").clone();
                event.latitude += deltas.delta_lat;
                event.longitude += deltas.delta_lon;
                event.depth += deltas.delta_depth;
                event.time = add_seconds(event.time, deltas.delta_tt);
                working.replace_event(event)?;
            }
            last_solver = Some(solver);
        }

        let Some(solver) = last_solver else {
            return Ok(working);
        };
        let final_rms = solver.event_residual_rms();
        let totals = solver.event_observation_totals();
        let neighbour_counts: BTreeMap<EventId, u32> = neighbours_list
            .iter()
            .map(|nb| (nb.ref_event_id, nb.ids.len() as u32))
            .collect();

        let ids: Vec<EventId> = working.events().map(|ev| ev.id).collect();
        for id in ids {
            if solver.event_changes(id).is_none() {
                continue;
            }
            let original = base.event(id).expect("same event set");
            let mut event = working.event(id).expect("same event set").clone();
            let rms_start = first_rms.get(&id).copied().unwrap_or_default();
            let rms_final = final_rms.get(&id).copied().unwrap_or_default();
            let (num_tt_obs, num_cc_obs) = totals.get(&id).copied().unwrap_or((0, 0));
            event.reloc_info = Some(RelocInfo {
                start_rms: rms_start.start_rms,
                final_rms: rms_final.final_rms,
                num_tt_obs,
                num_cc_obs,
                num_neighbours: neighbour_counts.get(&id).copied().unwrap_or(0),
                delta_lat: event.latitude - original.latitude,
                delta_lon: event.longitude - original.longitude,
                delta_depth: event.depth - original.depth,
                delta_time: seconds_between(event.time, original.time),
            });
            working.replace_event(event)?;
        }
        Ok(working)
    }

    /// Emit the equation rows of one Neighbours record into the solver.
    #[allow(clippy::too_many_arguments)]
    fn add_observations(
        &mut self,
        solver: &mut Solver,
        obs_params: &mut ObservationParams,
        working: &Catalog,
        neighbours: &Neighbours,
        keep_neighbours_fixed: bool,
        solver_opt: &SolverOptions,
        xcorr: &XCorrCache,
    ) {
        let Some(ref_event) = working.event(neighbours.ref_event_id) else {
            return;
        };
        for (peer_id, stations) in &neighbours.phases {
            let Some(peer_event) = working.event(*peer_id) else {
                continue;
            };
            for (station_id, phase_types) in stations {
                for phase_type in phase_types {
                    let (Some(ref_phase), Some(peer_phase)) = (
                        working.phase(ref_event.id, station_id, *phase_type),
                        working.phase(*peer_id, station_id, *phase_type),
                    ) else {
                        continue;
                    };
                    let Some(station) = working.station(station_id) else {
                        continue;
                    };

                    let dt_cat = seconds_between(ref_phase.time, ref_event.time)
                        - seconds_between(peer_phase.time, peer_event.time);

                    let min_coef = self.xcorr_engine.options(*phase_type).min_coef;
                    let entry = xcorr
                        .get(ref_event.id, *phase_type, *peer_id, station_id)
                        .filter(|entry| entry.coefficient >= min_coef);

                    let theoretical = ref_phase.is_theoretical || peer_phase.is_theoretical;
                    let (diff_time, weight, is_xcorr) = match entry {
                        Some(entry) => (
                            dt_cat + entry.lag,
                            entry.coefficient * entry.coefficient * solver_opt.xcorr_obs_weight,
                            true,
                        ),
                        // theoretical phases never produce catalog-only rows
                        None if theoretical => continue,
                        None => {
                            let w_ref =
                                Self::pick_weight(ref_phase, solver_opt.use_pick_uncertainty);
                            let w_peer =
                                Self::pick_weight(peer_phase, solver_opt.use_pick_uncertainty);
                            (
                                dt_cat,
                                w_ref * w_peer * solver_opt.abs_tt_diff_obs_weight,
                                false,
                            )
                        }
                    };
                    if weight <= 0.0 {
                        continue;
                    }

                    let ref_ok = obs_params.add(&mut *self.ttt, ref_event, station, ref_phase, true);
                    let peer_ok = obs_params.add(
                        &mut *self.ttt,
                        peer_event,
                        station,
                        peer_phase,
                        !keep_neighbours_fixed,
                    );
                    if ref_ok && peer_ok {
                        solver.add_observation(
                            ref_event.id,
                            *peer_id,
                            station_id,
                            *phase_type,
                            diff_time,
                            weight,
                            is_xcorr,
                        );
                    } else {
                        self.diagnostics.dropped_observations += 1;
                    }
                }
            }
        }
    }

    /// Correlate the shared phase pairs of every Neighbours record,
    /// within the configured distance limits.
    fn build_xcorr_cache(
        &mut self,
        catalog: &Catalog,
        neighbours_list: &[Neighbours],
        clust_opt: &ClusteringOptions,
    ) -> XCorrCache {
        let mut cache = XCorrCache::new();
        for neighbours in neighbours_list {
            let Some(ref_event) = catalog.event(neighbours.ref_event_id) else {
                continue;
            };
            for (peer_id, stations) in &neighbours.phases {
                let Some(peer_event) = catalog.event(*peer_id) else {
                    continue;
                };
                if clust_opt.xcorr_max_inter_ev_dist >= 0.0 {
                    let distance = neighbours
                        .distances
                        .get(peer_id)
                        .copied()
                        .unwrap_or(f64::MAX);
                    if distance > clust_opt.xcorr_max_inter_ev_dist {
                        continue;
                    }
                }
                for (station_id, phase_types) in stations {
                    let Some(station) = catalog.station(station_id) else {
                        continue;
                    };
                    if clust_opt.xcorr_max_ev_sta_dist >= 0.0 {
                        let distance = event_station_distance_km(
                            ref_event.latitude,
                            ref_event.longitude,
                            ref_event.depth,
                            station.latitude,
                            station.longitude,
                            station.elevation,
                        );
                        if distance > clust_opt.xcorr_max_ev_sta_dist {
                            continue;
                        }
                    }
                    for phase_type in phase_types {
                        if cache.has(ref_event.id, *phase_type, *peer_id, station_id) {
                            continue;
                        }
                        let (Some(ref_phase), Some(peer_phase)) = (
                            catalog.phase(ref_event.id, station_id, *phase_type),
                            catalog.phase(*peer_id, station_id, *phase_type),
                        ) else {
                            continue;
                        };
                        if let Some(entry) = self.xcorr_engine.correlate_phases(
                            ref_event, ref_phase, peer_event, peer_phase,
                        ) {
                            cache.insert(
                                ref_event.id,
                                *phase_type,
                                *peer_id,
                                station_id,
                                entry,
                            );
                        }
                    }
                }
            }
        }
        self.diagnostics.counters = self.xcorr_engine.counters;
        info!(
            entries = cache.len(),
            performed = self.diagnostics.counters.xcorr_performed,
            good = self.diagnostics.counters.xcorr_good_cc,
            "cross-correlation cache built"
        );
        cache
    }

    /// Synthesise theoretical phases for (station, phase) pairs the
    /// reference event misses but enough neighbours observe: the pick is
    /// placed at the median of the peer-derived predicted arrivals and
    /// the shared-pair sets are extended accordingly.
    fn add_missing_event_phases(
        working: &mut Catalog,
        neighbours: &mut Neighbours,
    ) -> Result<(), SeisddError> {
        let ref_event = working
            .event(neighbours.ref_event_id)
            .ok_or_else(|| {
                SeisddError::InvalidCatalog(format!(
                    "unknown reference event {}",
                    neighbours.ref_event_id
                ))
            })?
            .clone();

        let mut peers_by_pair: BTreeMap<(String, PhaseType), Vec<(EventId, Phase)>> =
            BTreeMap::new();
        for peer_id in &neighbours.ids {
            for phase in working.phases_of(*peer_id) {
                if phase.is_theoretical {
                    continue;
                }
                peers_by_pair
                    .entry((phase.station_id.clone(), phase.phase_type))
                    .or_default()
                    .push((*peer_id, phase.clone()));
            }
        }

        let max_peers = neighbours.ids.len().max(1);
        let mut added = 0u32;
        for ((station_id, phase_type), peers) in peers_by_pair {
            if working.phase(ref_event.id, &station_id, phase_type).is_some() {
                continue;
            }
            if peers.len() < THEORETICAL_MIN_PEERS {
                continue;
            }
            // predicted arrival per peer: reference origin + peer travel time
            let mut arrivals: Vec<Seconds> = peers
                .iter()
                .filter_map(|(peer_id, phase)| {
                    working
                        .event(*peer_id)
                        .map(|peer| seconds_between(phase.time, peer.time))
                })
                .collect();
            arrivals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = arrivals[arrivals.len() / 2];

            let weight = (peers.len() as f64 / max_peers as f64).min(THEORETICAL_WEIGHT_CAP);
            working.add_phase(Phase {
                event_id: ref_event.id,
                station_id: station_id.clone(),
                phase_type,
                time: add_seconds(ref_event.time, median),
                weight,
                uncertainty: None,
                is_manual: false,
                component: peers[0].1.component.clone(),
                is_theoretical: true,
            })?;
            for (peer_id, _) in &peers {
                neighbours.add_phase(*peer_id, &station_id, phase_type);
            }
            added += 1;
        }
        if added > 0 {
            debug!(event = ref_event.id, added, "theoretical phases synthesised");
        }
        Ok(())
    }

    /// Deterministic textual summary of a relocated catalog.
    pub fn relocation_report(catalog: &Catalog) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>8} {:>10} {:>11} {:>8} {:>5} | {:>9} {:>9} {:>8} {:>8} | {:>8} {:>8} | {:>5} {:>5} {:>5}",
            "event", "latitude", "longitude", "depth", "mag",
            "dLat[km]", "dLon[km]", "dZ[km]", "dT[s]",
            "rms0[s]", "rms[s]", "nTT", "nCC", "neigh"
        );
        for event in catalog.events() {
            let Some(info) = &event.reloc_info else {
                continue;
            };
            let mag = event
                .magnitude
                .map(|m| format!("{m:5.2}"))
                .unwrap_or_else(|| "    -".to_string());
            let cos_lat = (event.latitude * crate::constants::DEG2RAD).cos();
            let _ = writeln!(
                out,
                "{:>8} {:>10.5} {:>11.5} {:>8.3} {} | {:>9.4} {:>9.4} {:>8.4} {:>8.4} | {:>8.4} {:>8.4} | {:>5} {:>5} {:>5}",
                event.id,
                event.latitude,
                event.longitude,
                event.depth,
                mag,
                info.delta_lat * crate::constants::C111,
                info.delta_lon * crate::constants::C111 * cos_lat,
                info.delta_depth,
                info.delta_time,
                info.start_rms,
                info.final_rms,
                info.num_tt_obs,
                info.num_cc_obs,
                info.num_neighbours,
            );
        }
        out
    }
}

#[cfg(test)]
mod seisdd_test {
    use super::*;

    #[test]
    fn interpolation_schedule() {
        assert_eq!(Seisdd::interpolated(1.0, 0.0, 0, 5), 1.0);
        assert_eq!(Seisdd::interpolated(1.0, 0.0, 4, 5), 0.0);
        assert_eq!(Seisdd::interpolated(1.0, 0.0, 2, 5), 0.5);
        // degenerate schedules stay at the start value
        assert_eq!(Seisdd::interpolated(0.3, 0.9, 0, 1), 0.3);
    }

    #[test]
    fn pick_weight_uses_uncertainty_when_asked() {
        let phase = Phase {
            event_id: 1,
            station_id: "XX.STA.00".into(),
            phase_type: PhaseType::P,
            time: crate::time::parse_timestamp("2021-01-01T00:00:00").unwrap(),
            weight: 0.8,
            uncertainty: Some(0.5),
            is_manual: true,
            component: "Z".into(),
            is_theoretical: false,
        };
        assert_eq!(Seisdd::pick_weight(&phase, false), 0.8);
        assert_eq!(Seisdd::pick_weight(&phase, true), 4.0);

        let mut no_unc = phase.clone();
        no_unc.uncertainty = None;
        assert_eq!(Seisdd::pick_weight(&no_unc, true), 0.8);
    }
}
