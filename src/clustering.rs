//! Neighbouring-event selection.
//!
//! For a reference event, candidate neighbours are ranked by inter-event
//! distance, filtered per phase, and finally subsampled over concentric,
//! vertically flattened ellipsoidal shells split into 8 quadrants
//! (Waldhauser 2009): homogeneous angular and depth coverage keeps the
//! double-difference system from being dominated by a dense sub-cluster
//! on one side of the reference event.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::catalog::{Catalog, Event, PhaseType};
use crate::constants::{EventId, Kilometer, C111, DEG2RAD};
use crate::seisdd_errors::SeisddError;
use crate::travel_time::transform::{event_station_distance_km, hypocentral_distance_km};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringOptions {
    /// min weight of phases required (0-1)
    pub min_weight: f64,
    /// min epi-sta to inter-event distance ratio required
    pub min_e_sta_to_ie_ratio: f64,
    /// min epi-sta distance required (km)
    pub min_e_sta_dist: f64,
    /// max epi-sta distance allowed (km), -1 disables
    pub max_e_sta_dist: f64,
    /// min neighbours required
    pub min_num_neigh: usize,
    /// max neighbours allowed (0 disables the cap)
    pub max_num_neigh: usize,
    /// min differential times per event pair required (P+S)
    pub min_dt_per_evt: usize,
    /// max differential times per event pair (0 disables)
    pub max_dt_per_evt: usize,
    pub num_ellipsoids: usize,
    /// semi-major axis of the outermost shell (km)
    pub max_ellipsoid_size: Kilometer,
    /// max event-station distance for cross-correlation (-1 disables)
    pub xcorr_max_ev_sta_dist: f64,
    /// max inter-event distance for cross-correlation (-1 disables)
    pub xcorr_max_inter_ev_dist: f64,
}

impl Default for ClusteringOptions {
    fn default() -> Self {
        ClusteringOptions {
            min_weight: 0.0,
            min_e_sta_to_ie_ratio: 0.0,
            min_e_sta_dist: 0.0,
            max_e_sta_dist: -1.0,
            min_num_neigh: 1,
            max_num_neigh: 0,
            min_dt_per_evt: 1,
            max_dt_per_evt: 0,
            num_ellipsoids: 5,
            max_ellipsoid_size: 10.0,
            xcorr_max_ev_sta_dist: -1.0,
            xcorr_max_inter_ev_dist: -1.0,
        }
    }
}

/// Phases one peer shares with the reference event.
pub type SharedPhases = BTreeMap<String, BTreeSet<PhaseType>>;

/// Neighbouring events of one reference event, together with the shared
/// (station, phase) pairs and the inter-event distances used for the
/// ordering and the ellipsoid-layer assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbours {
    pub ref_event_id: EventId,
    pub ids: BTreeSet<EventId>,
    pub phases: BTreeMap<EventId, SharedPhases>,
    pub distances: BTreeMap<EventId, Kilometer>,
}

impl Neighbours {
    pub fn has(&self, ev: EventId) -> bool {
        self.ids.contains(&ev)
    }

    pub fn has_phase(&self, ev: EventId, station_id: &str, phase_type: PhaseType) -> bool {
        self.phases
            .get(&ev)
            .and_then(|stations| stations.get(station_id))
            .map(|types| types.contains(&phase_type))
            .unwrap_or(false)
    }

    /// Register a shared pairing (used when theoretical phases extend the
    /// reference event's pick set after clustering).
    pub fn add_phase(&mut self, ev: EventId, station_id: &str, phase_type: PhaseType) {
        self.phases
            .entry(ev)
            .or_default()
            .entry(station_id.to_string())
            .or_default()
            .insert(phase_type);
    }
}

struct Candidate {
    id: EventId,
    distance: Kilometer,
    // local offsets from the reference event
    east: Kilometer,
    north: Kilometer,
    down: Kilometer,
    shared: SharedPhases,
}

fn local_offsets(reference: &Event, event: &Event) -> (Kilometer, Kilometer, Kilometer) {
    let east =
        (event.longitude - reference.longitude) * C111 * (reference.latitude * DEG2RAD).cos();
    let north = (event.latitude - reference.latitude) * C111;
    let down = event.depth - reference.depth;
    (east, north, down)
}

/// Innermost shell containing the offset; events beyond the outermost
/// shell are assigned to it.
fn shell_of(
    east: Kilometer,
    north: Kilometer,
    down: Kilometer,
    num_ellipsoids: usize,
    max_size: Kilometer,
) -> usize {
    for k in 1..num_ellipsoids {
        let a = max_size * k as f64 / num_ellipsoids as f64;
        let b = a / 2.0; // vertical semi-axis
        if (east * east + north * north) / (a * a) + (down * down) / (b * b) <= 1.0 {
            return k - 1;
        }
    }
    num_ellipsoids - 1
}

/// Quadrant index packs the sign bits of (north, east, down).
fn quadrant_of(east: Kilometer, north: Kilometer, down: Kilometer) -> usize {
    let mut q = 0;
    if north < 0.0 {
        q |= 4;
    }
    if east < 0.0 {
        q |= 2;
    }
    if down < 0.0 {
        q |= 1;
    }
    q
}

/// Select the neighbours of `ref_event` inside `catalog`.
///
/// Candidates are examined by ascending inter-event distance; each phase
/// the reference event shares with a candidate must pass the weight and
/// station-distance filters. Candidates providing fewer than
/// `min_dt_per_evt` differential times are dropped, and each kept pair
/// contributes at most `max_dt_per_evt` phases (highest weight first,
/// ties by station id, P before S).
///
/// When `max_num_neigh` is set, the accepted candidates are subsampled by
/// filling the 8 quadrants of the ellipsoidal shells round-robin (shell
/// ascending, quadrant index ascending, nearest candidate first) until
/// the cap is reached; with every quadrant populated this admits about
/// `ceil(max_num_neigh / (8 num_ellipsoids))` events per quadrant.
pub fn select_neighbours(
    catalog: &Catalog,
    ref_event: &Event,
    options: &ClusteringOptions,
) -> Result<Neighbours, SeisddError> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for event in catalog.events() {
        if event.id == ref_event.id {
            continue;
        }
        let distance = hypocentral_distance_km(
            ref_event.latitude,
            ref_event.longitude,
            ref_event.depth,
            event.latitude,
            event.longitude,
            event.depth,
        );

        // phases shared with the reference event, filtered
        let mut kept: SmallVec<[(NotNan<f64>, String, PhaseType); 16]> = SmallVec::new();
        for ref_phase in catalog.phases_of(ref_event.id) {
            let peer_phase =
                match catalog.phase(event.id, &ref_phase.station_id, ref_phase.phase_type) {
                    Some(phase) => phase,
                    None => continue,
                };
            if ref_phase.weight < options.min_weight || peer_phase.weight < options.min_weight {
                continue;
            }
            let station = match catalog.station(&ref_phase.station_id) {
                Some(station) => station,
                None => continue,
            };
            let sta_dist = event_station_distance_km(
                ref_event.latitude,
                ref_event.longitude,
                ref_event.depth,
                station.latitude,
                station.longitude,
                station.elevation,
            );
            if sta_dist < options.min_e_sta_dist {
                continue;
            }
            if options.max_e_sta_dist >= 0.0 && sta_dist > options.max_e_sta_dist {
                continue;
            }
            if distance > 0.0 && sta_dist / distance < options.min_e_sta_to_ie_ratio {
                continue;
            }
            let weight = NotNan::new(ref_phase.weight * peer_phase.weight)
                .unwrap_or_else(|_| NotNan::new(0.0).unwrap());
            kept.push((weight, ref_phase.station_id.clone(), ref_phase.phase_type));
        }

        if kept.len() < options.min_dt_per_evt {
            continue;
        }
        // strongest picks first, deterministic tie-break
        kept.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        if options.max_dt_per_evt > 0 {
            kept.truncate(options.max_dt_per_evt);
        }

        let mut shared: SharedPhases = BTreeMap::new();
        for (_, station_id, phase_type) in kept {
            shared.entry(station_id).or_default().insert(phase_type);
        }
        let (east, north, down) = local_offsets(ref_event, event);
        candidates.push(Candidate {
            id: event.id,
            distance,
            east,
            north,
            down,
            shared,
        });
    }

    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .sorted_by_key(|c| {
            (
                NotNan::new(c.distance).unwrap_or_else(|_| NotNan::new(f64::MAX).unwrap()),
                c.id,
            )
        })
        .collect();

    let selected: Vec<Candidate> = if options.max_num_neigh == 0 {
        candidates
    } else {
        stratify(candidates, options)
    };

    if selected.len() < options.min_num_neigh {
        return Err(SeisddError::NotEnoughNeighbours {
            event: ref_event.id,
            found: selected.len(),
            required: options.min_num_neigh,
        });
    }

    let mut neighbours = Neighbours {
        ref_event_id: ref_event.id,
        ids: BTreeSet::new(),
        phases: BTreeMap::new(),
        distances: BTreeMap::new(),
    };
    for candidate in selected {
        neighbours.ids.insert(candidate.id);
        neighbours.phases.insert(candidate.id, candidate.shared);
        neighbours.distances.insert(candidate.id, candidate.distance);
    }
    Ok(neighbours)
}

/// Round-robin subsampling over (shell, quadrant) cells: every round
/// takes the nearest not-yet-selected candidate of each populated cell,
/// in (shell ascending, quadrant index ascending) order, until
/// `max_num_neigh` is reached or the candidates run out. With all cells
/// populated this admits at most `ceil(max_num_neigh / (8 shells))`
/// events per quadrant; sparse cells hand their share to the following
/// rounds instead of leaving the selection underfull.
fn stratify(candidates: Vec<Candidate>, options: &ClusteringOptions) -> Vec<Candidate> {
    let num_shells = options.num_ellipsoids.max(1);
    let num_cells = num_shells * 8;

    let mut cells: Vec<std::collections::VecDeque<Candidate>> =
        (0..num_cells).map(|_| Default::default()).collect();
    for candidate in candidates {
        let shell = shell_of(
            candidate.east,
            candidate.north,
            candidate.down,
            num_shells,
            options.max_ellipsoid_size,
        );
        let quadrant = quadrant_of(candidate.east, candidate.north, candidate.down);
        cells[shell * 8 + quadrant].push_back(candidate);
    }

    let mut selected = Vec::new();
    loop {
        let mut took_any = false;
        for cell in cells.iter_mut() {
            if selected.len() >= options.max_num_neigh {
                return selected;
            }
            if let Some(candidate) = cell.pop_front() {
                selected.push(candidate);
                took_any = true;
            }
        }
        if !took_any {
            return selected;
        }
    }
}
