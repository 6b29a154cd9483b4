use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use seisdd::catalog::PhaseType;
use seisdd::solver::{Solver, SolverType};
use seisdd::travel_time::transform::event_station_distance_km;

/// A ring of events around a small cluster, observed by a handful of
/// stations, with every pair contributing one P differential time.
fn build_solver(num_events: u32, solver_type: SolverType) -> Solver {
    let stations: Vec<(String, f64, f64)> = (0..8)
        .map(|i| {
            let angle = i as f64 * std::f64::consts::TAU / 8.0;
            (
                format!("XX.S{i:02}.00"),
                46.0 + 0.08 * angle.cos(),
                7.0 + 0.08 * angle.sin(),
            )
        })
        .collect();

    let event = |id: u32| {
        let angle = id as f64 * 0.7;
        (
            46.0 + 0.004 * angle.cos(),
            7.0 + 0.004 * angle.sin(),
            5.0 + 0.1 * (id % 7) as f64,
        )
    };

    let mut solver = Solver::new(solver_type);
    for ev1 in 0..num_events {
        let (lat1, lon1, depth1) = event(ev1);
        for ev2 in (ev1 + 1)..num_events {
            let (lat2, lon2, depth2) = event(ev2);
            for (sta_id, sta_lat, sta_lon) in &stations {
                let tt1 =
                    event_station_distance_km(lat1, lon1, depth1, *sta_lat, *sta_lon, 0.0) / 6.0;
                let tt2 =
                    event_station_distance_km(lat2, lon2, depth2, *sta_lat, *sta_lon, 0.0) / 6.0;
                // a small synthetic inconsistency keeps the system non-trivial
                let noise = 0.001 * ((ev1 + ev2) % 5) as f64;
                solver.add_observation(
                    ev1,
                    ev2,
                    sta_id,
                    PhaseType::P,
                    tt1 - tt2 + noise,
                    1.0,
                    false,
                );
                for (ev, lat, lon, depth, tt) in [
                    (ev1, lat1, lon1, depth1, tt1),
                    (ev2, lat2, lon2, depth2, tt2),
                ] {
                    solver.add_observation_params(
                        ev,
                        sta_id,
                        PhaseType::P,
                        lat,
                        lon,
                        depth,
                        *sta_lat,
                        *sta_lon,
                        0.0,
                        true,
                        false,
                        tt,
                        f64::NAN,
                        f64::NAN,
                        f64::NAN,
                    );
                }
            }
        }
    }
    solver
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("dd_solve");
    for num_events in [10u32, 30] {
        group.bench_function(format!("lsmr_{num_events}_events"), |b| {
            b.iter_batched(
                || build_solver(num_events, SolverType::Lsmr),
                |mut solver| solver.solve(0, true, 0.0, 0.0, true).unwrap(),
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("lsqr_{num_events}_events"), |b| {
            b.iter_batched(
                || build_solver(num_events, SolverType::Lsqr),
                |mut solver| solver.solve(0, true, 0.0, 0.0, true).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
