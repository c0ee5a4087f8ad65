//! Core engine for cellfield: solute grids, diffusion-reaction solving and agent coupling.

pub mod agent;
pub mod boundary;
pub mod collision;
pub mod compartment;
pub mod config;
pub mod coupling;
pub mod grid;
pub mod reaction;
pub mod shape;
pub mod solver;

pub use cellfield_index::MAX_DIMS;

pub use agent::{Agent, AgentEvent, AgentEvents, AgentId, BiomassEvents, Body, DistributionMap};
pub use boundary::{
    BoundarySpec, FixedConcentration, FixedFlux, GridMethod, GridMethodRegistry, ZeroFlux,
};
pub use collision::{
    CollisionFunction, CollisionReport, CollisionResolver, CollisionVariables, OVERLAP_TOLERANCE,
    PullFunction, PushFunction,
};
pub use compartment::{
    Compartment, CompartmentError, SimulationContext, SoluteSummary, StepSummary, Timer,
};
pub use config::{
    CollisionSettings, CompartmentConfig, ConfigError, IndexChoice, ParallelSettings,
    SimulationConfig, SoluteConfig, SolverSettings, UnresolvedPolicy,
};
pub use coupling::{CouplingReport, ReactionPool};
pub use grid::{
    ArrayType, Face, GridError, GridTopology, Neighbor, NeighborIter, Side, SpatialGrid, Voxel,
    VoxelIter,
};
pub use reaction::{KineticFactor, RateExpression, Reaction, VariableMap};
pub use solver::{
    ExplicitSolver, NoUpdate, PdeUpdater, SolveReport, SolverError, max_stability_factor,
};
