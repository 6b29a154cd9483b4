//! Relocation runs that exercise the cross-correlation path with
//! synthetic waveforms: every stream carries a Gaussian pulse at the true
//! arrival time, so correlations succeed and the lags stay small.

mod common;

use hifitime::Epoch;
use seisdd::catalog::{Catalog, PhaseType};
use seisdd::clustering::ClusteringOptions;
use seisdd::constants::EventId;
use seisdd::seisdd::{Config, Seisdd, SolverOptions};
use seisdd::seisdd_errors::SeisddError;
use seisdd::time::{add_seconds, seconds_between};
use seisdd::travel_time::transform::event_station_distance_km;
use seisdd::travel_time::HomogeneousTravelTimeTable;
use seisdd::xcorr::waveform::{TimeWindow, Trace, WaveformLoader};

use crate::common::{station, synthetic_catalog, P_VELOCITY};

const SAMPLING_RATE: f64 = 100.0;

/// Synthesises a pulse at each true arrival of the stream.
struct PulseLoader {
    arrivals: Vec<(String, Epoch)>,
}

impl PulseLoader {
    fn from_catalog(catalog: &Catalog) -> Self {
        let mut arrivals = Vec::new();
        for event in catalog.events() {
            for sta in catalog.stations() {
                let travel_time = event_station_distance_km(
                    event.latitude,
                    event.longitude,
                    event.depth,
                    sta.latitude,
                    sta.longitude,
                    sta.elevation,
                ) / P_VELOCITY;
                arrivals.push((
                    format!("{}.Z", sta.id),
                    add_seconds(event.time, travel_time),
                ));
            }
        }
        Self { arrivals }
    }
}

impl WaveformLoader for PulseLoader {
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        _pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        let n = (window.length() * SAMPLING_RATE).round() as usize;
        let mut data = vec![0.0; n];
        let mut any = false;
        for (stream, arrival) in &self.arrivals {
            if stream != stream_id {
                continue;
            }
            any = true;
            let offset = seconds_between(*arrival, window.start);
            for (i, value) in data.iter_mut().enumerate() {
                let t = (i as f64 / SAMPLING_RATE - offset) / 0.1;
                *value += (-t * t).exp();
            }
        }
        if !any {
            return Err(SeisddError::WaveformUnavailable(stream_id.to_string()));
        }
        Ok(Trace {
            stream_id: stream_id.to_string(),
            start: window.start,
            sampling_rate: SAMPLING_RATE,
            data,
        })
    }
}

fn stations() -> Vec<seisdd::catalog::Station> {
    vec![
        station("XX.ALFA.00", 0.04, 0.00),
        station("XX.BRAV.00", -0.03, 0.03),
        station("XX.CHAR.00", 0.01, -0.05),
        station("XX.DELT.00", -0.02, -0.03),
    ]
}

const EVENTS: [(EventId, f64, f64, f64); 4] = [
    (1, 0.000, 0.000, 5.0),
    (2, 0.003, 0.000, 5.1),
    (3, 0.000, 0.003, 4.9),
    (4, 0.003, 0.003, 5.0),
];

#[test]
fn xcorr_rows_replace_catalog_rows() {
    let catalog = synthetic_catalog(&EVENTS, &stations(), &[0.0; 4]);
    let loader = PulseLoader::from_catalog(&catalog);
    let mut engine = Seisdd::new(
        catalog.clone(),
        Config::default(),
        Box::new(HomogeneousTravelTimeTable::new(P_VELOCITY, P_VELOCITY / 1.73)),
        Box::new(loader),
    )
    .unwrap();

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &SolverOptions::default())
        .unwrap();

    let counters = &engine.diagnostics().counters;
    assert!(counters.xcorr_performed > 0);
    assert!(counters.xcorr_good_cc > 0);
    assert!(counters.wf_downloaded > 0);

    for (id, lat, lon, depth) in EVENTS {
        let after = relocated.event(id).unwrap();
        let info = after.reloc_info.as_ref().expect("relocated event");
        assert!(info.num_cc_obs > 0, "event {id} has no xcorr rows");
        // consistent picks and waveforms: nothing should move far
        assert!((after.latitude - lat).abs() * 111_000.0 < 30.0);
        assert!((after.longitude - lon).abs() * 111_000.0 < 30.0);
        assert!((after.depth - depth).abs() * 1000.0 < 30.0);
    }
}

#[test]
fn theoretical_phase_is_synthesised_and_correlated() {
    let mut catalog = synthetic_catalog(&EVENTS, &stations(), &[0.0; 4]);
    // event 1 loses its pick at station DELT: three peers keep theirs
    let removed = catalog.phase(1, "XX.DELT.00", PhaseType::P).cloned().unwrap();
    let mut trimmed = Catalog::new();
    for sta in catalog.stations() {
        trimmed.add_station(sta.clone());
    }
    for ev in catalog.events() {
        trimmed.add_event(ev.clone());
    }
    for phase in catalog.phases() {
        if phase.event_id == removed.event_id
            && phase.station_id == removed.station_id
            && phase.phase_type == removed.phase_type
        {
            continue;
        }
        trimmed.add_phase(phase.clone()).unwrap();
    }

    let loader = PulseLoader::from_catalog(&trimmed);
    let mut engine = Seisdd::new(
        trimmed,
        Config::default(),
        Box::new(HomogeneousTravelTimeTable::new(P_VELOCITY, P_VELOCITY / 1.73)),
        Box::new(loader),
    )
    .unwrap();

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &SolverOptions::default())
        .unwrap();

    let synthesised = relocated
        .phase(1, "XX.DELT.00", PhaseType::P)
        .expect("theoretical phase in the output catalog");
    assert!(synthesised.is_theoretical);
    assert!(!synthesised.is_manual);
    assert!(synthesised.weight <= 0.5);

    // the synthesised pick sits near the true arrival
    let event = relocated.event(1).unwrap();
    let sta = stations().into_iter().find(|s| s.id == "XX.DELT.00").unwrap();
    let travel_time = event_station_distance_km(
        event.latitude,
        event.longitude,
        event.depth,
        sta.latitude,
        sta.longitude,
        sta.elevation,
    ) / P_VELOCITY;
    let predicted = add_seconds(event.time, travel_time);
    assert!(seconds_between(synthesised.time, predicted).abs() < 0.2);

    assert!(engine.diagnostics().counters.xcorr_performed_theo > 0);
}
