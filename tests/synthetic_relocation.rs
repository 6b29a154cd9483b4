//! End-to-end relocation scenarios on synthetic catalogs.

mod common;

use seisdd::catalog::PhaseType;
use seisdd::clustering::ClusteringOptions;
use seisdd::constants::{EventId, C111, DEG2RAD};
use seisdd::seisdd::{Config, Seisdd, SolverOptions};
use seisdd::time::seconds_between;
use seisdd::travel_time::HomogeneousTravelTimeTable;

use crate::common::{station, synthetic_catalog, NoWaveforms, P_VELOCITY};

const DIAMOND: [(EventId, f64, f64, f64); 4] = [
    (1, 0.00, 0.00, 5.0),
    (2, 0.00, 0.01, 5.0),
    (3, 0.01, 0.00, 5.0),
    (4, 0.00, -0.01, 5.0),
];

const PERTURBATION: [f64; 4] = [0.050, -0.050, 0.050, -0.050];

fn engine(catalog: seisdd::catalog::Catalog) -> Seisdd {
    Seisdd::new(
        catalog,
        Config::default(),
        Box::new(HomogeneousTravelTimeTable::new(P_VELOCITY, P_VELOCITY / 1.73)),
        Box::new(NoWaveforms),
    )
    .unwrap()
}

/// The solver settings of the diamond scenarios. The single-station
/// geometry leaves the depth/origin-time trade-off to the minimum-norm
/// iterate, which only matches the injected perturbation on the
/// unnormalized columns.
fn diamond_options() -> SolverOptions {
    SolverOptions {
        l2_normalization: false,
        ..Default::default()
    }
}

#[test]
fn diamond_recovers_time_perturbation() {
    let stations = [station("XX.BELL.00", 0.0, 0.0)];
    let catalog = synthetic_catalog(&DIAMOND, &stations, &PERTURBATION);
    let mut engine = engine(catalog.clone());

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &diamond_options())
        .unwrap();

    for (index, (id, lat, lon, depth)) in DIAMOND.iter().enumerate() {
        let before = catalog.event(*id).unwrap();
        let after = relocated.event(*id).unwrap();

        let delta_t = seconds_between(after.time, before.time);
        assert!(
            (delta_t - PERTURBATION[index]).abs() < 0.005,
            "event {id}: delta_t {delta_t} vs injected {}",
            PERTURBATION[index]
        );

        let dlat_m = (after.latitude - lat) * C111 * 1000.0;
        let dlon_m = (after.longitude - lon) * C111 * (lat * DEG2RAD).cos() * 1000.0;
        let ddepth_m = (after.depth - depth) * 1000.0;
        assert!(dlat_m.abs() < 50.0, "event {id}: dlat {dlat_m} m");
        assert!(dlon_m.abs() < 50.0, "event {id}: dlon {dlon_m} m");
        assert!(ddepth_m.abs() < 50.0, "event {id}: ddepth {ddepth_m} m");

        let info = after.reloc_info.as_ref().expect("relocated event");
        assert_eq!(info.num_neighbours, 3);
        assert!(info.num_tt_obs > 0);
        assert_eq!(info.num_cc_obs, 0);
    }
}

#[test]
fn unperturbed_catalog_stays_put() {
    // consistent picks: the only signal left is the nanosecond
    // quantisation of the pick times, so nothing moves measurably
    let stations = [station("XX.BELL.00", 0.0, 0.0)];
    let catalog = synthetic_catalog(&DIAMOND, &stations, &[0.0; 4]);
    let mut engine = engine(catalog.clone());

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &diamond_options())
        .unwrap();

    for (id, ..) in DIAMOND {
        let before = catalog.event(id).unwrap();
        let after = relocated.event(id).unwrap();
        assert!((after.latitude - before.latitude).abs() < 1e-9);
        assert!((after.longitude - before.longitude).abs() < 1e-9);
        assert!((after.depth - before.depth).abs() < 1e-6);
        assert!(seconds_between(after.time, before.time).abs() < 1e-6);
    }
}

#[test]
fn lone_event_is_left_unrelocated() {
    let stations = [station("XX.BELL.00", 0.0, 0.0)];
    let catalog = synthetic_catalog(&[(1, 0.0, 0.0, 5.0)], &stations, &[0.0]);
    let mut engine = engine(catalog.clone());

    let clustering = ClusteringOptions {
        min_num_neigh: 1,
        ..Default::default()
    };
    let relocated = engine
        .relocate_multi_events(&clustering, &SolverOptions::default())
        .unwrap();

    assert_eq!(relocated, catalog);
    assert_eq!(engine.diagnostics().events_without_neighbours, vec![1]);
}

#[test]
fn relocation_is_deterministic_under_input_shuffle() {
    let stations = [
        station("XX.BELL.00", 0.0, 0.0),
        station("XX.NORD.00", 0.05, 0.01),
        station("XX.OSTA.00", -0.01, 0.06),
    ];
    let forward = synthetic_catalog(&DIAMOND, &stations, &PERTURBATION);

    // same content, phases inserted in reverse order
    let mut shuffled = seisdd::catalog::Catalog::new();
    for sta in stations.iter().rev() {
        shuffled.add_station(sta.clone());
    }
    for ev in forward.events() {
        shuffled.add_event(ev.clone());
    }
    let mut phases: Vec<_> = forward.phases().cloned().collect();
    phases.reverse();
    for phase in phases {
        shuffled.add_phase(phase).unwrap();
    }

    let options = diamond_options();
    let clustering = ClusteringOptions::default();
    let a = engine(forward)
        .relocate_multi_events(&clustering, &options)
        .unwrap();
    let b = engine(shuffled)
        .relocate_multi_events(&clustering, &options)
        .unwrap();

    for (ev_a, ev_b) in a.events().zip(b.events()) {
        assert_eq!(ev_a.id, ev_b.id);
        assert_eq!(ev_a.latitude.to_bits(), ev_b.latitude.to_bits());
        assert_eq!(ev_a.longitude.to_bits(), ev_b.longitude.to_bits());
        assert_eq!(ev_a.depth.to_bits(), ev_b.depth.to_bits());
        assert_eq!(ev_a.time, ev_b.time);
    }
}

#[test]
fn noisy_picks_keep_the_cluster_bounded() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // uniform pick noise within +-5 ms on top of the time perturbations
    let mut rng = StdRng::seed_from_u64(42);
    let noisy: Vec<f64> = PERTURBATION
        .iter()
        .map(|p| p + rng.gen_range(-0.005..0.005))
        .collect();

    let stations = [
        station("XX.BELL.00", 0.0, 0.0),
        station("XX.NORD.00", 0.05, 0.01),
        station("XX.OSTA.00", -0.01, 0.06),
    ];
    let catalog = synthetic_catalog(&DIAMOND, &stations, &noisy);
    let mut engine = engine(catalog.clone());

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &diamond_options())
        .unwrap();

    for (index, (id, lat, lon, depth)) in DIAMOND.iter().enumerate() {
        let before = catalog.event(*id).unwrap();
        let after = relocated.event(*id).unwrap();
        let delta_t = seconds_between(after.time, before.time);
        assert!((delta_t - noisy[index]).abs() < 0.015);
        assert!((after.latitude - lat).abs() * 111.0 < 0.2);
        assert!((after.longitude - lon).abs() * 111.0 < 0.2);
        assert!((after.depth - depth).abs() < 0.2);
    }
}

#[test]
fn report_lists_relocated_events() {
    let stations = [station("XX.BELL.00", 0.0, 0.0)];
    let catalog = synthetic_catalog(&DIAMOND, &stations, &PERTURBATION);
    let mut engine = engine(catalog);

    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &diamond_options())
        .unwrap();
    let report = Seisdd::relocation_report(&relocated);

    // header + one line per relocated event, stable across runs
    assert_eq!(report.lines().count(), 1 + 4);
    for (id, ..) in DIAMOND {
        assert!(report.lines().any(|l| l.trim_start().starts_with(&id.to_string())));
    }
    let again = Seisdd::relocation_report(&relocated);
    assert_eq!(report, again);
}

#[test]
fn phases_of_relocated_catalog_keep_types() {
    let stations = [station("XX.BELL.00", 0.0, 0.0)];
    let catalog = synthetic_catalog(&DIAMOND, &stations, &PERTURBATION);
    let mut engine = engine(catalog.clone());
    let relocated = engine
        .relocate_multi_events(&ClusteringOptions::default(), &diamond_options())
        .unwrap();
    for phase in relocated.phases() {
        assert_eq!(phase.phase_type, PhaseType::P);
        assert!(!phase.is_theoretical);
    }
    assert_eq!(relocated.phases().count(), catalog.phases().count());
}
