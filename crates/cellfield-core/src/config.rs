//! Static configuration for a compartment run.

use std::collections::HashSet;

use cellfield_index::{IndexError, LayerLayout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::boundary::BoundarySpec;
use crate::grid::{GridError, GridTopology};
use crate::solver::max_stability_factor;

/// Relative tolerance when checking that lengths are whole multiples of the resolution.
const DIVISIBILITY_TOLERANCE: f64 = 1e-9;

/// Configuration problems; all of them abort the run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Two solutes share a name.
    #[error("solute '{0}' is declared more than once")]
    DuplicateSolute(String),
    /// A boundary refers to a grid method nobody registered.
    #[error("unknown grid method '{0}'")]
    UnknownGridMethod(String),
    /// A grid method needs a parameter the configuration did not provide.
    #[error("grid method '{kind}' requires a finite '{parameter}' value")]
    MissingParameter {
        kind: String,
        parameter: &'static str,
    },
    /// Vectors that must describe every dimension have the wrong length.
    #[error("{what} has {found} entries but the compartment has {expected} dimensions")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A compartment side is not a whole number of voxels.
    #[error("length {length} in dimension {dim} is not a multiple of resolution {resolution}")]
    NotDivisible {
        dim: usize,
        length: f64,
        resolution: f64,
    },
    /// The stability factor would let the explicit solver diverge on this grid.
    #[error("solver.stability_factor {factor} exceeds {limit} for a {n_dim}-dimensional grid")]
    UnstableStabilityFactor { factor: f64, limit: f64, n_dim: usize },
    /// The reaction worker pool could not be created.
    #[error("failed to build reaction worker pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Top-level configuration of a simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub compartment: CompartmentConfig,
    pub solutes: Vec<SoluteConfig>,
    pub solver: SolverSettings,
    pub parallel: ParallelSettings,
    pub collision: CollisionSettings,
    /// Macro time step handed to the solver each step.
    pub time_step: f64,
    /// Sample points per voxel edge when mapping agent bodies onto voxels.
    pub subvoxel_resolution: usize,
    /// Optional RNG seed for reproducible populations.
    pub rng_seed: Option<u64>,
    /// Reaction variables that resolve to nothing: read as zero, or fail the step.
    pub unresolved_variables: UnresolvedPolicy,
}

/// What to do when a reaction variable resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Read it as zero and log a warning.
    #[default]
    Warn,
    /// Fail the step.
    Abort,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            compartment: CompartmentConfig::default(),
            solutes: vec![SoluteConfig::default()],
            solver: SolverSettings::default(),
            parallel: ParallelSettings::default(),
            collision: CollisionSettings::default(),
            time_step: 1.0,
            subvoxel_resolution: 4,
            rng_seed: None,
            unresolved_variables: UnresolvedPolicy::Warn,
        }
    }
}

/// Geometry of the rectangular compartment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompartmentConfig {
    /// Number of spatial dimensions (1 to 3).
    pub n_dim: usize,
    /// Side lengths in spatial units, one per dimension.
    pub lengths: Vec<f64>,
    /// Edge length of a voxel.
    pub resolution: f64,
    /// Periodic flags per dimension; empty means none are periodic.
    pub cyclic: Vec<bool>,
}

impl Default for CompartmentConfig {
    fn default() -> Self {
        Self {
            n_dim: 2,
            lengths: vec![32.0, 32.0],
            resolution: 1.0,
            cyclic: Vec::new(),
        }
    }
}

/// One diffusing chemical species.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SoluteConfig {
    pub name: String,
    pub initial_concentration: f64,
    pub diffusivity: f64,
    /// Faces without an entry are impermeable.
    pub boundaries: Vec<BoundarySpec>,
}

impl Default for SoluteConfig {
    fn default() -> Self {
        Self {
            name: "glucose".to_owned(),
            initial_concentration: 1.0,
            diffusivity: 1.0,
            boundaries: Vec::new(),
        }
    }
}

/// Explicit solver settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverSettings {
    /// Safety factor applied to `resolution^2 / max diffusivity`.
    pub stability_factor: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            stability_factor: 0.1,
        }
    }
}

/// Worker pool settings for the agent reaction pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParallelSettings {
    pub threads: usize,
    /// Agent slices longer than this are split in half before running.
    pub work_threshold: usize,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            threads: 8,
            work_threshold: 6,
        }
    }
}

/// Spatial index used to find collision candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexChoice {
    /// Exhaustive scan suitable for moving agents.
    #[default]
    LinearScan,
    /// Regular lattice for a static epithelial layer; agents never move.
    Epithelial { layout: LayerLayout },
}

/// Collision force settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollisionSettings {
    pub push_scalar: f64,
    pub pull_scalar: f64,
    /// Surface separation below which attraction acts.
    pub pull_range: f64,
    /// Velocity per unit force used when relaxing positions.
    pub mobility: f64,
    pub index: IndexChoice,
}

impl Default for CollisionSettings {
    fn default() -> Self {
        Self {
            push_scalar: 2.0,
            pull_scalar: 1.0,
            pull_range: 0.0,
            mobility: 0.1,
            index: IndexChoice::LinearScan,
        }
    }
}

impl SimulationConfig {
    /// Validates the configuration, returning the derived grid topology.
    pub fn topology(&self) -> Result<GridTopology, ConfigError> {
        let compartment = &self.compartment;
        let n_dim = compartment.n_dim;
        if !(1..=crate::MAX_DIMS).contains(&n_dim) {
            return Err(ConfigError::InvalidConfig(
                "compartment must have between one and three dimensions",
            ));
        }
        if compartment.lengths.len() != n_dim {
            return Err(ConfigError::DimensionMismatch {
                what: "compartment.lengths",
                expected: n_dim,
                found: compartment.lengths.len(),
            });
        }
        if !compartment.cyclic.is_empty() && compartment.cyclic.len() != n_dim {
            return Err(ConfigError::DimensionMismatch {
                what: "compartment.cyclic",
                expected: n_dim,
                found: compartment.cyclic.len(),
            });
        }
        let resolution = compartment.resolution;
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "compartment.resolution must be positive and finite",
            ));
        }

        let mut counts = Vec::with_capacity(n_dim);
        for (dim, &length) in compartment.lengths.iter().enumerate() {
            if !(length.is_finite() && length > 0.0) {
                return Err(ConfigError::InvalidConfig(
                    "compartment lengths must be positive and finite",
                ));
            }
            let ratio = length / resolution;
            let whole = ratio.round();
            if whole < 1.0 || (ratio - whole).abs() > DIVISIBILITY_TOLERANCE * ratio.max(1.0) {
                return Err(ConfigError::NotDivisible {
                    dim,
                    length,
                    resolution,
                });
            }
            counts.push(whole as usize);
        }
        Ok(GridTopology::new(&counts, resolution, &compartment.cyclic)?)
    }

    /// Full validation; returns the topology on success.
    pub fn validate(&self) -> Result<GridTopology, ConfigError> {
        let topology = self.topology()?;

        let mut names = HashSet::new();
        for solute in &self.solutes {
            if solute.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig("solute names must be non-empty"));
            }
            if !names.insert(solute.name.as_str()) {
                return Err(ConfigError::DuplicateSolute(solute.name.clone()));
            }
            if !(solute.diffusivity.is_finite() && solute.diffusivity >= 0.0) {
                return Err(ConfigError::InvalidConfig(
                    "solute diffusivity must be non-negative and finite",
                ));
            }
            if !solute.initial_concentration.is_finite() {
                return Err(ConfigError::InvalidConfig(
                    "solute initial concentration must be finite",
                ));
            }
            for boundary in &solute.boundaries {
                if boundary.face.dim >= topology.n_dim() {
                    return Err(ConfigError::InvalidConfig(
                        "boundary face refers to a dimension the compartment lacks",
                    ));
                }
                if topology.is_cyclic(boundary.face.dim) {
                    return Err(ConfigError::InvalidConfig(
                        "cyclic dimensions cannot carry boundary methods",
                    ));
                }
            }
        }

        let factor = self.solver.stability_factor;
        if !(factor.is_finite() && factor > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "solver.stability_factor must be positive and finite",
            ));
        }
        let limit = max_stability_factor(topology.n_dim());
        if factor > limit {
            return Err(ConfigError::UnstableStabilityFactor {
                factor,
                limit,
                n_dim: topology.n_dim(),
            });
        }
        if self.parallel.threads == 0 || self.parallel.work_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "parallel.threads and parallel.work_threshold must be non-zero",
            ));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "time_step must be positive and finite",
            ));
        }
        if self.subvoxel_resolution == 0 {
            return Err(ConfigError::InvalidConfig(
                "subvoxel_resolution must be non-zero",
            ));
        }
        let collision = &self.collision;
        if !(collision.push_scalar.is_finite()
            && collision.pull_scalar.is_finite()
            && collision.pull_range.is_finite()
            && collision.pull_range >= 0.0
            && collision.mobility.is_finite()
            && collision.mobility >= 0.0)
        {
            return Err(ConfigError::InvalidConfig(
                "collision scalars must be finite, pull_range and mobility non-negative",
            ));
        }
        if let IndexChoice::Epithelial { layout } = &collision.index {
            if layout.compartment_lengths.len() != topology.n_dim() {
                return Err(ConfigError::DimensionMismatch {
                    what: "collision.index.layout.compartment_lengths",
                    expected: topology.n_dim(),
                    found: layout.compartment_lengths.len(),
                });
            }
        }
        Ok(topology)
    }
}
