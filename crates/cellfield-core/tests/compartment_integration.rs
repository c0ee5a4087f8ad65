use cellfield_core::{
    Agent, ArrayType, Body, BoundarySpec, Compartment, CompartmentConfig, Face, GridMethodRegistry,
    KineticFactor, MAX_DIMS, ParallelSettings, Reaction, Side, SimulationConfig, SimulationContext,
    SoluteConfig, StepSummary, Voxel,
};
use cellfield_index::{BoundingBox, EpithelialGrid, LayerLayout, NeighborhoodIndex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn solute(name: &str, initial: f64, diffusivity: f64) -> SoluteConfig {
    SoluteConfig {
        name: name.to_owned(),
        initial_concentration: initial,
        diffusivity,
        boundaries: Vec::new(),
    }
}

fn plane_config(threads: usize) -> SimulationConfig {
    SimulationConfig {
        compartment: CompartmentConfig {
            n_dim: 2,
            lengths: vec![16.0, 16.0],
            resolution: 1.0,
            cyclic: Vec::new(),
        },
        solutes: vec![solute("glucose", 2.0, 1.0), solute("waste", 0.0, 0.5)],
        parallel: ParallelSettings {
            threads,
            work_threshold: 4,
        },
        rng_seed: Some(0x5EED),
        ..SimulationConfig::default()
    }
}

fn uptake() -> Reaction {
    Reaction::new(
        "uptake",
        [
            ("glucose".to_owned(), -1.0),
            ("waste".to_owned(), 0.4),
            ("cell".to_owned(), 0.5),
        ],
        vec![
            KineticFactor::Constant { k: 0.3 },
            KineticFactor::Monod {
                variable: "glucose".to_owned(),
                half_saturation: 0.5,
            },
            KineticFactor::FirstOrder {
                variable: "mass".to_owned(),
            },
        ],
    )
}

fn run(threads: usize, steps: usize) -> (Vec<StepSummary>, Vec<f64>) {
    let config = plane_config(threads);
    let mut compartment =
        Compartment::from_config(&config, &GridMethodRegistry::with_builtin()).expect("compartment");
    let mut rng = SmallRng::seed_from_u64(config.rng_seed.expect("seed"));
    for _ in 0..24 {
        let mut center = [0.0; MAX_DIMS];
        center[0] = rng.random_range(2.0..14.0);
        center[1] = rng.random_range(2.0..14.0);
        compartment.spawn(
            Agent::new("cell", Body::new(center, 0.6))
                .with_aspect("mass", 1.0)
                .with_aspect("density", 1.0)
                .with_reaction(uptake()),
        );
    }
    let mut ctx = SimulationContext::from_config(&config).expect("context");
    let summaries = (0..steps)
        .map(|_| compartment.step(&mut ctx).expect("step"))
        .collect();
    let glucose = compartment
        .grid("glucose")
        .expect("glucose")
        .array(ArrayType::Concn)
        .expect("concn")
        .to_vec();
    (summaries, glucose)
}

#[test]
fn seeded_population_is_deterministic_across_thread_counts() {
    let (single, single_field) = run(1, 3);
    let (pooled, pooled_field) = run(4, 3);
    assert_eq!(single, pooled);
    assert_eq!(single_field, pooled_field);
    assert_eq!(single.len(), 3);
    assert_eq!(single[2].iteration, 3);
}

#[test]
fn consumption_moves_mass_from_glucose_to_waste_and_biomass() {
    let (summaries, _) = run(2, 2);
    let first = &summaries[0];
    let last = &summaries[1];
    let glucose = |summary: &StepSummary| summary.solutes[0].total_amount;
    let waste = |summary: &StepSummary| summary.solutes[1].total_amount;
    assert!(glucose(last) < glucose(first));
    assert!(waste(last) > waste(first));
    assert!(first.coupling.is_clean(), "{:?}", first.coupling);
    assert!(last.agent_count == 24);
}

#[test]
fn uniform_line_stays_uniform_through_compartment_steps() {
    let config = SimulationConfig {
        compartment: CompartmentConfig {
            n_dim: 1,
            lengths: vec![40.0],
            resolution: 1.0,
            cyclic: Vec::new(),
        },
        solutes: vec![solute("glucose", 1.0, 1.0)],
        ..SimulationConfig::default()
    };
    let mut compartment =
        Compartment::from_config(&config, &GridMethodRegistry::with_builtin()).expect("compartment");
    let mut ctx = SimulationContext::from_config(&config).expect("context");
    let summary = compartment.step(&mut ctx).expect("step");
    assert_eq!(summary.sub_steps, 10);
    let grid = compartment.grid("glucose").expect("grid");
    assert!(grid
        .iter_voxels()
        .all(|voxel| (grid.value_at(ArrayType::Concn, voxel).expect("value") - 1.0).abs() < 1e-12));
}

#[test]
fn single_agent_in_one_voxel_sets_production_rate() {
    let config = SimulationConfig {
        compartment: CompartmentConfig {
            n_dim: 1,
            lengths: vec![5.0],
            resolution: 1.0,
            cyclic: Vec::new(),
        },
        solutes: vec![solute("A", 1.0, 0.0), solute("B", 0.0, 0.0)],
        ..SimulationConfig::default()
    };
    let mut compartment =
        Compartment::from_config(&config, &GridMethodRegistry::with_builtin()).expect("compartment");
    let reaction = Reaction::new(
        "a_to_b",
        [("A".to_owned(), -1.0), ("B".to_owned(), 1.0)],
        vec![KineticFactor::Constant { k: 2.0 }],
    );
    compartment.spawn(Agent::new("cell", Body::new([2.5, 0.0, 0.0], 0.5)).with_reaction(reaction));
    let mut ctx = SimulationContext::from_config(&config).expect("context");
    let summary = compartment.step(&mut ctx).expect("step");
    assert_eq!(summary.sub_steps, 1);
    let b = compartment.grid("B").expect("B");
    assert_eq!(b.value_at(ArrayType::ProductionRate, Voxel::line(2)), Ok(2.0));
    assert_eq!(b.value_at(ArrayType::Concn, Voxel::line(2)), Ok(2.0));
    assert_eq!(b.value_at(ArrayType::ProductionRate, Voxel::line(1)), Ok(0.0));
}

#[test]
fn fixed_concentration_face_fills_an_empty_line() {
    let mut feed = solute("oxygen", 0.0, 1.0);
    feed.boundaries = vec![BoundarySpec::new(
        Face::new(0, Side::Min),
        "fixed_concentration",
        Some(1.0),
    )];
    let config = SimulationConfig {
        compartment: CompartmentConfig {
            n_dim: 1,
            lengths: vec![6.0],
            resolution: 1.0,
            cyclic: Vec::new(),
        },
        solutes: vec![feed],
        ..SimulationConfig::default()
    };
    let mut compartment =
        Compartment::from_config(&config, &GridMethodRegistry::with_builtin()).expect("compartment");
    let mut ctx = SimulationContext::from_config(&config).expect("context");
    let mut previous = 0.0;
    for _ in 0..5 {
        let summary = compartment.step(&mut ctx).expect("step");
        let total = summary.solutes[0].total_amount;
        assert!(total > previous);
        assert!(total < 6.0);
        previous = total;
    }
}

#[test]
fn epithelial_full_extent_query_returns_every_agent_once() {
    let layout = LayerLayout {
        origin: vec![0.0, 0.0, 0.0],
        layer_lengths: vec![6.0, 4.0, 1.0],
        cell_lengths: vec![1.0, 1.0, 1.0],
        compartment_lengths: vec![6.0, 4.0, 10.0],
    };
    let mut index = EpithelialGrid::new(&layout).expect("layout");
    let bounds = vec![BoundingBox::default(); 20];
    index.rebuild(&bounds).expect("rebuild");
    let mut hits = index.collect(&BoundingBox::new([0.0, 0.0, 0.0], [6.0, 4.0, 10.0]));
    hits.sort_unstable();
    assert_eq!(hits, (0..20).collect::<Vec<_>>());
}
