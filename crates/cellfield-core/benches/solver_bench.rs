use cellfield_core::{
    Agent, ArrayType, Body, CompartmentConfig, ExplicitSolver, GridTopology, KineticFactor,
    MAX_DIMS, NoUpdate, ParallelSettings, Reaction, SimulationConfig, SimulationContext,
    SpatialGrid, Compartment, GridMethodRegistry,
};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_list(name: &str, default: &[usize]) -> Vec<usize> {
    std::env::var(name)
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_vec())
}

fn configure(c: &mut Criterion, name: &str) -> criterion::BenchmarkGroup<'_, criterion::measurement::WallTime> {
    let mut group = c.benchmark_group(name);
    group.sample_size(env_usize("CF_BENCH_SAMPLES", 20));
    group.warm_up_time(Duration::from_secs(env_usize("CF_BENCH_WARMUP_SECS", 2) as u64));
    group.measurement_time(Duration::from_secs(env_usize("CF_BENCH_MEASURE_SECS", 8) as u64));
    group
}

fn bench_diffusion(c: &mut Criterion) {
    let mut group = configure(c, "diffusion");
    for side in env_list("CF_BENCH_SIDES", &[32, 64, 128]) {
        group.bench_function(format!("side{side}_tfinal1"), |b| {
            b.iter_batched(
                || {
                    let topology = GridTopology::new(&[side, side], 1.0, &[]).expect("topology");
                    let mut grid = SpatialGrid::new("solute", topology);
                    grid.new_array(ArrayType::Concn, 0.0);
                    grid.new_array(ArrayType::Diffusivity, 1.0);
                    grid.new_array(ArrayType::Domain, 1.0);
                    let mut rng = SmallRng::seed_from_u64(0xC311);
                    for value in grid.array_mut(ArrayType::Concn).expect("concn") {
                        *value = rng.random_range(0.0..1.0);
                    }
                    vec![grid]
                },
                |mut grids| {
                    ExplicitSolver::default()
                        .solve(&mut grids, 1.0, &mut NoUpdate)
                        .expect("solve")
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_compartment_steps(c: &mut Criterion) {
    let mut group = configure(c, "compartment_step");
    let steps = env_usize("CF_BENCH_STEPS", 4);
    for agents in env_list("CF_BENCH_AGENTS", &[200, 1000]) {
        group.bench_function(format!("steps{steps}_agents{agents}"), |b| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        compartment: CompartmentConfig {
                            n_dim: 2,
                            lengths: vec![64.0, 64.0],
                            resolution: 1.0,
                            cyclic: Vec::new(),
                        },
                        parallel: ParallelSettings {
                            threads: env_usize("CF_BENCH_THREADS", 8),
                            work_threshold: 6,
                        },
                        ..SimulationConfig::default()
                    };
                    let mut compartment =
                        Compartment::from_config(&config, &GridMethodRegistry::with_builtin())
                            .expect("compartment");
                    let mut rng = SmallRng::seed_from_u64(0xBEEF);
                    for _ in 0..agents {
                        let mut center = [0.0; MAX_DIMS];
                        center[0] = rng.random_range(1.0..63.0);
                        center[1] = rng.random_range(1.0..63.0);
                        let reaction = Reaction::new(
                            "uptake",
                            [("glucose".to_owned(), -1.0), ("cell".to_owned(), 0.5)],
                            vec![
                                KineticFactor::Constant { k: 0.1 },
                                KineticFactor::Monod {
                                    variable: "glucose".to_owned(),
                                    half_saturation: 0.5,
                                },
                                KineticFactor::FirstOrder {
                                    variable: "mass".to_owned(),
                                },
                            ],
                        );
                        compartment.spawn(
                            Agent::new("cell", Body::new(center, 0.5))
                                .with_aspect("mass", 1.0)
                                .with_reaction(reaction),
                        );
                    }
                    (compartment, SimulationContext::from_config(&config).expect("context"))
                },
                |(mut compartment, mut ctx)| {
                    for _ in 0..steps {
                        compartment.step(&mut ctx).expect("step");
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_diffusion, bench_compartment_steps);
criterion_main!(benches);
