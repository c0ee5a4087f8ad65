//! Agent reaction pass: distributes reaction rates onto solute grids on a worker pool.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::agent::{Agent, AgentEvent, AgentEvents};
use crate::config::ConfigError;
use crate::grid::{ArrayType, GridError, SpatialGrid};
use crate::reaction::VariableMap;

/// Diagnostics gathered over one reaction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CouplingReport {
    /// Agents whose reactions were evaluated.
    pub agents_processed: usize,
    /// Agents with reactions but no usable distribution map.
    pub agents_skipped: usize,
    /// Variables that were neither a solute nor an aspect; they read as zero.
    pub unresolved: BTreeSet<String>,
    /// Products with no solute, species or internal destination.
    pub unrouted: BTreeSet<String>,
}

impl CouplingReport {
    /// Whether the pass ran without any lookup or routing diagnostic.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.agents_skipped == 0 && self.unresolved.is_empty() && self.unrouted.is_empty()
    }

    pub fn merge(&mut self, other: CouplingReport) {
        self.agents_processed += other.agents_processed;
        self.agents_skipped += other.agents_skipped;
        self.unresolved.extend(other.unresolved);
        self.unrouted.extend(other.unrouted);
    }
}

/// Solute rate destined for one voxel: (grid slot, flat index, concentration rate).
type Contribution = (usize, usize, f64);

enum Outcome {
    Idle,
    Skipped,
    Processed {
        contributions: Vec<Contribution>,
        unresolved: BTreeSet<String>,
        unrouted: BTreeSet<String>,
    },
}

struct Pass<'a> {
    grids: &'a [SpatialGrid],
    solutes: HashMap<&'a str, usize>,
    events: &'a dyn AgentEvents,
    dt: f64,
    threshold: usize,
}

/// Fixed-size worker pool running the reaction pass by recursive halving.
pub struct ReactionPool {
    pool: ThreadPool,
    work_threshold: usize,
}

impl std::fmt::Debug for ReactionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionPool")
            .field("threads", &self.pool.current_num_threads())
            .field("work_threshold", &self.work_threshold)
            .finish()
    }
}

impl ReactionPool {
    pub fn new(threads: usize, work_threshold: usize) -> Result<Self, ConfigError> {
        if threads == 0 {
            return Err(ConfigError::InvalidConfig("thread count must be non-zero"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("cellfield-reactions-{idx}"))
            .build()
            .map_err(|err| ConfigError::ThreadPool(err.to_string()))?;
        Ok(Self {
            pool,
            work_threshold: work_threshold.max(1),
        })
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub const fn work_threshold(&self) -> usize {
        self.work_threshold
    }

    /// Reset every grid's production rate, evaluate agent reactions and add their rates.
    ///
    /// Contributions are merged in agent order after the workers join, so the
    /// result does not depend on the thread count.
    pub fn distribute(
        &self,
        grids: &mut [SpatialGrid],
        agents: &mut [&mut Agent],
        events: &dyn AgentEvents,
        dt: f64,
    ) -> Result<CouplingReport, GridError> {
        for grid in grids.iter_mut() {
            grid.new_array(ArrayType::ProductionRate, 0.0);
        }

        let outcomes = {
            let pass = Pass {
                grids: &*grids,
                solutes: grids
                    .iter()
                    .enumerate()
                    .map(|(slot, grid)| (grid.name(), slot))
                    .collect(),
                events,
                dt,
                threshold: self.work_threshold,
            };
            self.pool.install(|| split(agents, &pass))
        };

        let mut rates = grids
            .iter_mut()
            .map(|grid| grid.array_mut(ArrayType::ProductionRate))
            .collect::<Result<Vec<_>, _>>()?;
        let mut report = CouplingReport::default();
        for outcome in outcomes {
            match outcome? {
                Outcome::Idle => {}
                Outcome::Skipped => report.agents_skipped += 1,
                Outcome::Processed {
                    contributions,
                    unresolved,
                    unrouted,
                } => {
                    report.agents_processed += 1;
                    report.unresolved.extend(unresolved);
                    report.unrouted.extend(unrouted);
                    for (slot, idx, rate) in contributions {
                        rates[slot][idx] += rate;
                    }
                }
            }
        }
        Ok(report)
    }
}

fn split(agents: &mut [&mut Agent], pass: &Pass<'_>) -> Vec<Result<Outcome, GridError>> {
    if agents.len() > pass.threshold {
        let mid = agents.len() / 2;
        let (left, right) = agents.split_at_mut(mid);
        let (mut head, tail) = rayon::join(|| split(left, pass), || split(right, pass));
        head.extend(tail);
        head
    } else {
        agents.iter_mut().map(|agent| react(agent, pass)).collect()
    }
}

fn react(agent: &mut Agent, pass: &Pass<'_>) -> Result<Outcome, GridError> {
    if agent.reactions().is_empty() {
        return Ok(Outcome::Idle);
    }
    agent.reset_accumulators();
    let Some(map) = agent.distribution().filter(|map| map.total_vox_vol() > 0.0) else {
        return Ok(Outcome::Skipped);
    };
    let total_vox_vol = map.total_vox_vol();

    let mut contributions = Vec::new();
    let mut unresolved = BTreeSet::new();
    let mut unrouted = BTreeSet::new();
    let mut growth = 0.0;
    let mut internal: BTreeMap<String, f64> = BTreeMap::new();
    let mut variables = VariableMap::new();

    for (voxel, volume) in map.iter() {
        let share = volume / total_vox_vol;
        for reaction in agent.reactions() {
            variables.clear();
            for name in reaction.variables() {
                let value = if let Some(&slot) = pass.solutes.get(name.as_str()) {
                    pass.grids[slot].value_at(ArrayType::Concn, voxel)?
                } else if let Some(aspect) = agent.aspect(&name) {
                    aspect * share
                } else {
                    unresolved.insert(name.clone());
                    0.0
                };
                variables.insert(name, value);
            }

            let rate = reaction.rate(&variables);
            for (product, coefficient) in reaction.stoichiometry() {
                let flux = rate * coefficient;
                if let Some(&slot) = pass.solutes.get(product.as_str()) {
                    let grid = &pass.grids[slot];
                    contributions.push((slot, grid.flat_index(voxel)?, flux / grid.voxel_volume()));
                } else if product == agent.species() {
                    growth += flux;
                } else if agent.is_internal_product(product) {
                    *internal.entry(product.clone()).or_insert(0.0) += flux;
                } else {
                    unrouted.insert(product.clone());
                }
            }
        }
    }

    agent.accumulate(growth, internal);
    pass.events.on_event(agent, AgentEvent::Growth, pass.dt);
    pass.events.on_event(agent, AgentEvent::Produce, pass.dt);
    Ok(Outcome::Processed {
        contributions,
        unresolved,
        unrouted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_DIMS;
    use crate::agent::{BiomassEvents, Body, DistributionMap};
    use crate::grid::{GridTopology, Voxel};
    use crate::reaction::{KineticFactor, Reaction};

    fn grids(names: &[&str], counts: &[usize]) -> Vec<SpatialGrid> {
        let topology = GridTopology::new(counts, 1.0, &[]).expect("topology");
        names
            .iter()
            .map(|name| {
                let mut grid = SpatialGrid::new(*name, topology.clone());
                grid.new_array(ArrayType::Concn, 1.0);
                grid
            })
            .collect()
    }

    fn a_to_b(k: f64) -> Reaction {
        Reaction::new(
            "a_to_b",
            [("A".to_owned(), -1.0), ("B".to_owned(), 1.0)],
            vec![KineticFactor::Constant { k }],
        )
    }

    fn placed(agent: Agent, map: DistributionMap) -> Agent {
        let mut agent = agent;
        agent.set_distribution(map);
        agent
    }

    #[test]
    fn single_agent_in_full_voxel_produces_rate() {
        let mut grids = grids(&["A", "B"], &[3]);
        let mut agent = placed(
            Agent::new("cell", Body::new([1.5, 0.0, 0.0], 0.5)).with_reaction(a_to_b(2.0)),
            [(Voxel::line(1), 1.0)].into_iter().collect(),
        );
        let pool = ReactionPool::new(2, 6).expect("pool");
        let report = pool
            .distribute(&mut grids, &mut [&mut agent], &BiomassEvents::new(1), 0.1)
            .expect("distribute");
        assert_eq!(report.agents_processed, 1);
        assert!(report.is_clean());
        assert_eq!(grids[1].value_at(ArrayType::ProductionRate, Voxel::line(1)), Ok(2.0));
        assert_eq!(grids[0].value_at(ArrayType::ProductionRate, Voxel::line(1)), Ok(-2.0));
        assert_eq!(grids[1].value_at(ArrayType::ProductionRate, Voxel::line(0)), Ok(0.0));
    }

    #[test]
    fn aspects_are_scaled_by_voxel_share_and_growth_is_routed() {
        let mut grids = grids(&["glucose"], &[2]);
        let uptake = Reaction::new(
            "uptake",
            [("glucose".to_owned(), -1.0), ("cell".to_owned(), 0.5)],
            vec![KineticFactor::FirstOrder {
                variable: "mass".to_owned(),
            }],
        );
        let mut agent = placed(
            Agent::new("cell", Body::new([1.0, 0.0, 0.0], 0.5))
                .with_aspect("mass", 4.0)
                .with_reaction(uptake),
            [(Voxel::line(0), 0.25), (Voxel::line(1), 0.75)].into_iter().collect(),
        );
        let pool = ReactionPool::new(1, 6).expect("pool");
        pool.distribute(&mut grids, &mut [&mut agent], &BiomassEvents::new(1), 1.0)
            .expect("distribute");
        assert_eq!(grids[0].value_at(ArrayType::ProductionRate, Voxel::line(0)), Ok(-1.0));
        assert_eq!(grids[0].value_at(ArrayType::ProductionRate, Voxel::line(1)), Ok(-3.0));
        assert_eq!(agent.growth_rate(), 2.0);
        assert_eq!(agent.aspect("mass"), Some(6.0));
    }

    #[test]
    fn unresolved_and_unrouted_names_are_reported() {
        let mut grids = grids(&["A"], &[2]);
        let reaction = Reaction::new(
            "mystery",
            [("A".to_owned(), 1.0), ("Z".to_owned(), 1.0)],
            vec![
                KineticFactor::Constant { k: 1.0 },
                KineticFactor::FirstOrder {
                    variable: "ghost".to_owned(),
                },
            ],
        );
        let mut agent = placed(
            Agent::new("cell", Body::new([0.5, 0.0, 0.0], 0.5)).with_reaction(reaction),
            [(Voxel::line(0), 1.0)].into_iter().collect(),
        );
        let mut stale = Agent::new("cell", Body::new([0.5, 0.0, 0.0], 0.5)).with_reaction(a_to_b(1.0));
        let mut inert = Agent::new("cell", Body::new([0.5, 0.0, 0.0], 0.5));
        let pool = ReactionPool::new(1, 6).expect("pool");
        let report = pool
            .distribute(
                &mut grids,
                &mut [&mut agent, &mut stale, &mut inert],
                &BiomassEvents::new(1),
                1.0,
            )
            .expect("distribute");
        assert_eq!(report.agents_processed, 1);
        assert_eq!(report.agents_skipped, 1);
        assert!(report.unresolved.contains("ghost"));
        assert!(report.unrouted.contains("Z"));
        assert_eq!(grids[0].value_at(ArrayType::ProductionRate, Voxel::line(0)), Ok(0.0));
    }

    #[test]
    fn result_is_independent_of_thread_count() {
        let population: Vec<Agent> = (0..50)
            .map(|idx| {
                let x = (idx % 10) as f64 + 0.5;
                let y = (idx / 10) as f64 + 0.5;
                let mut center = [0.0; MAX_DIMS];
                center[0] = x;
                center[1] = y;
                let reaction = Reaction::new(
                    "uptake",
                    [("A".to_owned(), -1.0 - idx as f64 * 0.01)],
                    vec![
                        KineticFactor::Constant { k: 0.3 },
                        KineticFactor::Monod {
                            variable: "A".to_owned(),
                            half_saturation: 0.7,
                        },
                    ],
                );
                placed(
                    Agent::new("cell", Body::new(center, 0.6)).with_reaction(reaction),
                    [(Voxel::plane(idx % 10, idx / 10), 0.6), (Voxel::plane(0, 0), 0.1)]
                        .into_iter()
                        .collect(),
                )
            })
            .collect();

        let run = |threads: usize| {
            let mut grids = grids(&["A"], &[10, 5]);
            let mut agents = population.clone();
            let mut refs: Vec<&mut Agent> = agents.iter_mut().collect();
            ReactionPool::new(threads, 3)
                .expect("pool")
                .distribute(&mut grids, &mut refs, &BiomassEvents::new(2), 0.5)
                .expect("distribute");
            grids[0]
                .array(ArrayType::ProductionRate)
                .expect("rates")
                .to_vec()
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn zero_threads_is_a_configuration_error() {
        assert!(matches!(
            ReactionPool::new(0, 6),
            Err(ConfigError::InvalidConfig(_))
        ));
    }
}
