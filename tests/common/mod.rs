//! Shared builders for the synthetic relocation scenarios.
#![allow(dead_code)] // each test binary uses a different subset

use hifitime::Epoch;
use seisdd::catalog::{Catalog, Event, Phase, PhaseType, Station};
use seisdd::constants::{EventId, KmPerSec, Seconds};
use seisdd::seisdd_errors::SeisddError;
use seisdd::time::{add_seconds, parse_timestamp};
use seisdd::travel_time::transform::event_station_distance_km;
use seisdd::xcorr::waveform::{TimeWindow, Trace, WaveformLoader};

pub const P_VELOCITY: KmPerSec = 6.0;

pub fn base_time() -> Epoch {
    parse_timestamp("2021-06-01T12:00:00").unwrap()
}

pub fn station(id: &str, lat: f64, lon: f64) -> Station {
    let mut parts = id.split('.');
    let network = parts.next().unwrap_or("XX").to_string();
    let code = parts.next().unwrap_or("STA").to_string();
    let location = parts.next().unwrap_or("").to_string();
    Station {
        id: id.to_string(),
        latitude: lat,
        longitude: lon,
        elevation: 0.0,
        network,
        station: code,
        location,
    }
}

/// Build a catalog of events with P picks generated from a constant
/// velocity model, with a per-event perturbation added to the pick times.
///
/// Each entry of `events` is (id, lat, lon, depth); origin times are one
/// minute apart starting at `base_time()`.
pub fn synthetic_catalog(
    events: &[(EventId, f64, f64, f64)],
    stations: &[Station],
    pick_perturbation: &[Seconds],
) -> Catalog {
    let mut catalog = Catalog::new();
    for sta in stations {
        catalog.add_station(sta.clone());
    }
    for (index, (id, lat, lon, depth)) in events.iter().enumerate() {
        let origin = add_seconds(base_time(), 60.0 * index as f64);
        catalog.add_event(Event {
            id: *id,
            time: origin,
            latitude: *lat,
            longitude: *lon,
            depth: *depth,
            magnitude: Some(1.5),
            reloc_info: None,
        });
        for sta in stations {
            let travel_time = event_station_distance_km(
                *lat,
                *lon,
                *depth,
                sta.latitude,
                sta.longitude,
                sta.elevation,
            ) / P_VELOCITY;
            let perturbation = pick_perturbation.get(index).copied().unwrap_or(0.0);
            catalog
                .add_phase(Phase {
                    event_id: *id,
                    station_id: sta.id.clone(),
                    phase_type: PhaseType::P,
                    time: add_seconds(origin, travel_time + perturbation),
                    weight: 1.0,
                    uncertainty: Some(0.05),
                    is_manual: true,
                    component: "Z".into(),
                    is_theoretical: false,
                })
                .unwrap();
        }
    }
    catalog
}

/// Waveform loader for runs that exercise the catalog-only path: every
/// request fails, so no cross-correlation observation is ever produced.
pub struct NoWaveforms;

impl WaveformLoader for NoWaveforms {
    fn load(
        &mut self,
        stream_id: &str,
        _window: &TimeWindow,
        _pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        Err(SeisddError::WaveformUnavailable(stream_id.to_string()))
    }
}
