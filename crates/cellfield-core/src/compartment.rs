//! Compartment: solute grids plus the agent population, advanced one step at a time.

use cellfield_index::{EpithelialGrid, IndexError, LinearScanIndex, NeighborhoodIndex};
use serde::Serialize;
use slotmap::SlotMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentEvents, AgentId, BiomassEvents};
use crate::boundary::GridMethodRegistry;
use crate::collision::{CollisionReport, CollisionResolver, PullFunction, PushFunction};
use crate::config::{ConfigError, IndexChoice, SimulationConfig, UnresolvedPolicy};
use crate::coupling::{CouplingReport, ReactionPool};
use crate::grid::{ArrayType, GridError, GridTopology, SpatialGrid};
use crate::solver::{ExplicitSolver, PdeUpdater, SolverError};

/// Errors surfaced by [`Compartment::step`] and construction.
#[derive(Debug, Error)]
pub enum CompartmentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Reactions read variables that resolve to nothing and the policy forbids it.
    #[error("unresolved reaction variables: {}", .0.join(", "))]
    UnresolvedVariables(Vec<String>),
    /// Agents on an epithelial lattice cannot be removed.
    #[error("agents cannot be removed from a static epithelial lattice")]
    StaticLattice,
}

/// Simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timer {
    pub now: f64,
    pub step_size: f64,
    pub iteration: u64,
}

impl Timer {
    #[must_use]
    pub const fn new(step_size: f64) -> Self {
        Self {
            now: 0.0,
            step_size,
            iteration: 0,
        }
    }

    pub fn advance(&mut self) {
        self.now += self.step_size;
        self.iteration += 1;
    }
}

/// State threaded through every compartment call.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub timer: Timer,
    pub solver: ExplicitSolver,
    pub unresolved: UnresolvedPolicy,
}

impl SimulationContext {
    pub fn from_config(config: &SimulationConfig) -> Result<Self, CompartmentError> {
        Ok(Self {
            timer: Timer::new(config.time_step),
            solver: ExplicitSolver::new(config.solver.stability_factor)?,
            unresolved: config.unresolved_variables,
        })
    }
}

/// Per-solute bookkeeping reported after each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoluteSummary {
    pub name: String,
    /// Concentration integrated over the domain.
    pub total_amount: f64,
    pub mean_concentration: f64,
}

/// Outcome of one [`Compartment::step`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub iteration: u64,
    pub time: f64,
    pub sub_steps: usize,
    pub sub_step_size: f64,
    pub agent_count: usize,
    pub moved: usize,
    pub solutes: Vec<SoluteSummary>,
    pub coupling: CouplingReport,
    pub collisions: CollisionReport,
}

/// Runs the reaction pass before each solver sub-step.
struct ReactionUpdater<'a> {
    pool: &'a ReactionPool,
    agents: &'a mut SlotMap<AgentId, Agent>,
    events: &'a dyn AgentEvents,
    topology: &'a GridTopology,
    subvoxels: usize,
    report: CouplingReport,
}

impl PdeUpdater for ReactionUpdater<'_> {
    fn prestep(&mut self, grids: &mut [SpatialGrid], dt: f64) -> Result<(), SolverError> {
        refresh_stale(self.agents, self.topology, self.subvoxels);
        let mut refs: Vec<&mut Agent> = self.agents.values_mut().collect();
        let report = self.pool.distribute(grids, &mut refs, self.events, dt)?;
        if !report.is_clean() {
            warn!(
                processed = report.agents_processed,
                skipped = report.agents_skipped,
                unresolved = ?report.unresolved,
                unrouted = ?report.unrouted,
                "reaction pass diagnostics"
            );
        }
        self.report.merge(report);
        Ok(())
    }
}

fn refresh_stale(agents: &mut SlotMap<AgentId, Agent>, topology: &GridTopology, subvoxels: usize) -> usize {
    let mut refreshed = 0;
    for agent in agents.values_mut().filter(|agent| agent.is_stale()) {
        agent.refresh_distribution(topology, subvoxels);
        refreshed += 1;
    }
    refreshed
}

/// A rectangular compartment holding solute grids and agents.
pub struct Compartment {
    topology: GridTopology,
    grids: Vec<SpatialGrid>,
    agents: SlotMap<AgentId, Agent>,
    events: Box<dyn AgentEvents>,
    pool: ReactionPool,
    resolver: CollisionResolver,
    index: Box<dyn NeighborhoodIndex>,
    relax_agents: bool,
    subvoxels: usize,
}

impl std::fmt::Debug for Compartment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compartment")
            .field("topology", &self.topology)
            .field("grids", &self.grids)
            .field("agents", &self.agents.len())
            .field("pool", &self.pool)
            .field("relax_agents", &self.relax_agents)
            .finish()
    }
}

impl Compartment {
    /// Validate `config` and build grids, boundaries, worker pool and index.
    pub fn from_config(
        config: &SimulationConfig,
        registry: &GridMethodRegistry,
    ) -> Result<Self, ConfigError> {
        let topology = config.validate()?;
        let mut grids = Vec::with_capacity(config.solutes.len());
        for solute in &config.solutes {
            let mut grid = SpatialGrid::new(solute.name.clone(), topology.clone());
            grid.new_array(ArrayType::Concn, solute.initial_concentration);
            grid.new_array(ArrayType::Diffusivity, solute.diffusivity);
            grid.new_array(ArrayType::ProductionRate, 0.0);
            grid.new_array(ArrayType::Domain, 1.0);
            grid.new_array(ArrayType::LOperator, 0.0);
            for spec in &solute.boundaries {
                grid.set_boundary(spec.face, registry.build(spec)?)?;
            }
            if solute.diffusivity == 0.0 {
                warn!(
                    solute = %solute.name,
                    "zero diffusivity; excluded from the stability bound"
                );
            }
            grids.push(grid);
        }

        let pool = ReactionPool::new(config.parallel.threads, config.parallel.work_threshold)?;
        let (index, relax_agents): (Box<dyn NeighborhoodIndex>, bool) = match &config.collision.index {
            IndexChoice::LinearScan => (Box::new(LinearScanIndex::new()), true),
            IndexChoice::Epithelial { layout } => (Box::new(EpithelialGrid::new(layout)?), false),
        };
        let collision = &config.collision;
        let resolver = CollisionResolver::new(
            PushFunction {
                scalar: collision.push_scalar,
            },
            PullFunction {
                scalar: collision.pull_scalar,
            },
            collision.pull_range,
            collision.mobility,
            topology.n_dim(),
        );

        info!(
            solutes = grids.len(),
            voxels = topology.voxel_count(),
            threads = pool.threads(),
            relax_agents,
            "compartment ready"
        );
        Ok(Self {
            events: Box::new(BiomassEvents::new(topology.n_dim())),
            topology,
            grids,
            agents: SlotMap::with_key(),
            pool,
            resolver,
            index,
            relax_agents,
            subvoxels: config.subvoxel_resolution,
        })
    }

    /// Swap the agent event handler.
    #[must_use]
    pub fn with_events(mut self, events: Box<dyn AgentEvents>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub const fn topology(&self) -> &GridTopology {
        &self.topology
    }

    /// Solute grids in configuration order.
    #[must_use]
    pub fn grids(&self) -> &[SpatialGrid] {
        &self.grids
    }

    #[must_use]
    pub fn grid(&self, name: &str) -> Option<&SpatialGrid> {
        self.grids.iter().find(|grid| grid.name() == name)
    }

    pub fn grid_mut(&mut self, name: &str) -> Option<&mut SpatialGrid> {
        self.grids.iter_mut().find(|grid| grid.name() == name)
    }

    pub fn spawn(&mut self, agent: Agent) -> AgentId {
        self.agents.insert(agent)
    }

    /// Remove an agent. Epithelial lattices tie cells to insertion order, so
    /// removal is refused while one is active.
    pub fn remove(&mut self, id: AgentId) -> Result<Option<Agent>, CompartmentError> {
        if !self.relax_agents {
            return Err(CompartmentError::StaticLattice);
        }
        Ok(self.agents.remove(id))
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter()
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Recompute every stale distribution map; returns how many were refreshed.
    pub fn refresh_distribution_maps(&mut self) -> usize {
        refresh_stale(&mut self.agents, &self.topology, self.subvoxels)
    }

    /// Advance the compartment by one macro step of `ctx.timer.step_size`.
    pub fn step(&mut self, ctx: &mut SimulationContext) -> Result<StepSummary, CompartmentError> {
        let dt = ctx.timer.step_size;
        let refreshed = self.refresh_distribution_maps();

        let mut updater = ReactionUpdater {
            pool: &self.pool,
            agents: &mut self.agents,
            events: self.events.as_ref(),
            topology: &self.topology,
            subvoxels: self.subvoxels,
            report: CouplingReport::default(),
        };
        let solve = ctx.solver.solve(&mut self.grids, dt, &mut updater)?;
        let coupling = updater.report;
        if ctx.unresolved == UnresolvedPolicy::Abort && !coupling.unresolved.is_empty() {
            return Err(CompartmentError::UnresolvedVariables(
                coupling.unresolved.into_iter().collect(),
            ));
        }

        let mut refs: Vec<&mut Agent> = self.agents.values_mut().collect();
        let collisions = self.resolver.resolve(&mut refs, self.index.as_mut())?;
        let moved = if self.relax_agents {
            self.resolver.relax(&mut refs, &self.topology, dt)
        } else {
            0
        };
        drop(refs);

        ctx.timer.advance();
        let mut solutes = Vec::with_capacity(self.grids.len());
        for grid in &self.grids {
            solutes.push(SoluteSummary {
                name: grid.name().to_owned(),
                total_amount: grid.total_amount(ArrayType::Concn)?,
                mean_concentration: grid.average(ArrayType::Concn)?,
            });
        }
        debug!(
            iteration = ctx.timer.iteration,
            time = ctx.timer.now,
            sub_steps = solve.n_iter,
            refreshed,
            moved,
            "compartment step"
        );
        Ok(StepSummary {
            iteration: ctx.timer.iteration,
            time: ctx.timer.now,
            sub_steps: solve.n_iter,
            sub_step_size: solve.dt,
            agent_count: self.agents.len(),
            moved,
            solutes,
            coupling,
            collisions,
        })
    }
}
