//! Demo populations: random free-living cells or a static epithelial sheet.

use cellfield_core::{
    Agent, AgentId, Body, Compartment, IndexChoice, KineticFactor, MAX_DIMS, Reaction,
    SimulationConfig,
};
use cellfield_index::EpithelialGrid;
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Species name given to seeded agents; reactions route growth to it.
pub const SPECIES: &str = "biomass";

/// Parameters of the seeded population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeedSettings {
    pub agents: usize,
    pub radius: f64,
    pub mass: f64,
    pub density: f64,
    /// Maximum specific uptake rate of the first solute.
    pub max_uptake: f64,
    pub half_saturation: f64,
    /// Biomass formed per unit of solute consumed.
    pub yield_coefficient: f64,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            agents: 32,
            radius: 0.5,
            mass: 1.0,
            density: 1.0,
            max_uptake: 0.5,
            half_saturation: 0.2,
            yield_coefficient: 0.4,
        }
    }
}

impl SeedSettings {
    /// Monod uptake of `substrate` feeding biomass growth.
    #[must_use]
    pub fn uptake_reaction(&self, substrate: &str) -> Reaction {
        Reaction::new(
            "uptake",
            [
                (substrate.to_owned(), -1.0),
                (SPECIES.to_owned(), self.yield_coefficient),
            ],
            vec![
                KineticFactor::Constant { k: self.max_uptake },
                KineticFactor::Monod {
                    variable: substrate.to_owned(),
                    half_saturation: self.half_saturation,
                },
                KineticFactor::FirstOrder {
                    variable: "mass".to_owned(),
                },
            ],
        )
    }

    fn agent(&self, center: [f64; MAX_DIMS], substrate: Option<&str>) -> Agent {
        let agent = Agent::new(SPECIES, Body::new(center, self.radius))
            .with_aspect("mass", self.mass)
            .with_aspect("density", self.density);
        match substrate {
            Some(name) => agent.with_reaction(self.uptake_reaction(name)),
            None => agent,
        }
    }
}

/// Populate `compartment` according to the configured index.
pub fn seed_population(
    compartment: &mut Compartment,
    config: &SimulationConfig,
    settings: &SeedSettings,
    rng: &mut SmallRng,
) -> anyhow::Result<Vec<AgentId>> {
    let substrate = config.solutes.first().map(|solute| solute.name.as_str());
    if substrate.is_none() {
        warn!("no solutes configured; seeded agents carry no reactions");
    }
    let ids = match &config.collision.index {
        IndexChoice::LinearScan => scatter(compartment, settings, substrate, rng),
        IndexChoice::Epithelial { layout } => {
            let lattice = EpithelialGrid::new(layout)?;
            let count = settings.agents.min(lattice.cell_count());
            (0..count)
                .filter_map(|idx| lattice.cell_center(idx))
                .map(|center| compartment.spawn(settings.agent(center, substrate)))
                .collect()
        }
    };
    info!(agents = ids.len(), species = SPECIES, "seeded population");
    Ok(ids)
}

fn scatter(
    compartment: &mut Compartment,
    settings: &SeedSettings,
    substrate: Option<&str>,
    rng: &mut SmallRng,
) -> Vec<AgentId> {
    let topology = compartment.topology().clone();
    (0..settings.agents)
        .map(|_| {
            let mut center = [0.0; MAX_DIMS];
            for (dim, coord) in center.iter_mut().enumerate().take(topology.n_dim()) {
                let length = topology.length(dim);
                let margin = settings.radius.min(length / 2.0);
                *coord = if length - margin > margin {
                    rng.random_range(margin..length - margin)
                } else {
                    length / 2.0
                };
            }
            compartment.spawn(settings.agent(center, substrate))
        })
        .collect()
}
