//! Explicit finite-difference solver for diffusion-reaction on solute grids.

use ordered_float::OrderedFloat;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::grid::{ArrayType, GridError, Neighbor, SpatialGrid};

/// Errors raised while advancing the solute grids.
#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    /// A domain voxel carries a negative or non-finite diffusivity.
    #[error("grid '{grid}' has invalid diffusivity {value}")]
    InvalidDiffusivity { grid: String, value: f64 },
    /// The requested macro step is negative or not finite.
    #[error("time step {0} must be non-negative and finite")]
    InvalidTimeStep(f64),
    /// The stability factor is not in `(0, limit]`.
    #[error("stability factor {factor} must lie in (0, {limit}]")]
    InvalidStabilityFactor { factor: f64, limit: f64 },
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Hook run before every sub-step, typically the agent reaction pass.
pub trait PdeUpdater {
    fn prestep(&mut self, grids: &mut [SpatialGrid], dt: f64) -> Result<(), SolverError>;
}

/// Updater that leaves the grids untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpdate;

impl PdeUpdater for NoUpdate {
    fn prestep(&mut self, _grids: &mut [SpatialGrid], _dt: f64) -> Result<(), SolverError> {
        Ok(())
    }
}

/// Outcome of one macro step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolveReport {
    /// Sub-step length actually used.
    pub dt: f64,
    /// Number of sub-steps taken.
    pub n_iter: usize,
}

/// Largest stability factor for which forward Euler stays stable on an `n_dim` grid.
#[must_use]
pub fn max_stability_factor(n_dim: usize) -> f64 {
    1.0 / (2.0 * n_dim.max(1) as f64)
}

/// Forward-Euler solver bounded by `stability_factor * res^2 / max D`.
///
/// The factor is capped per grid at [`max_stability_factor`] of that grid's
/// dimensionality, so a sub-step can never exceed the explicit limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplicitSolver {
    stability_factor: f64,
}

impl Default for ExplicitSolver {
    fn default() -> Self {
        Self {
            stability_factor: 0.1,
        }
    }
}

impl ExplicitSolver {
    /// Accepts factors in `(0, 0.5]`, the one-dimensional limit.
    pub fn new(stability_factor: f64) -> Result<Self, SolverError> {
        let limit = max_stability_factor(1);
        if !(stability_factor.is_finite() && stability_factor > 0.0 && stability_factor <= limit) {
            return Err(SolverError::InvalidStabilityFactor {
                factor: stability_factor,
                limit,
            });
        }
        Ok(Self { stability_factor })
    }

    #[must_use]
    pub const fn stability_factor(&self) -> f64 {
        self.stability_factor
    }

    /// Largest stable sub-step over all grids, or `None` when nothing diffuses.
    pub fn stable_time_step(&self, grids: &[SpatialGrid]) -> Result<Option<f64>, SolverError> {
        let mut best: Option<f64> = None;
        for grid in grids {
            let max_diffusivity = max_domain_diffusivity(grid)?;
            if max_diffusivity == 0.0 {
                trace!(grid = grid.name(), "zero diffusivity; excluded from the stability bound");
                continue;
            }
            let topology = grid.topology();
            let factor = self
                .stability_factor
                .min(max_stability_factor(topology.n_dim()));
            let res = topology.resolution();
            let dt = factor * res * res / max_diffusivity;
            best = Some(best.map_or(dt, |current| current.min(dt)));
        }
        Ok(best)
    }

    /// Advance every grid by `t_final`, calling `updater` before each sub-step.
    pub fn solve(
        &self,
        grids: &mut [SpatialGrid],
        t_final: f64,
        updater: &mut dyn PdeUpdater,
    ) -> Result<SolveReport, SolverError> {
        if !(t_final.is_finite() && t_final >= 0.0) {
            return Err(SolverError::InvalidTimeStep(t_final));
        }
        if t_final == 0.0 {
            return Ok(SolveReport { dt: 0.0, n_iter: 0 });
        }
        for grid in grids.iter_mut() {
            for ty in [ArrayType::ProductionRate, ArrayType::LOperator] {
                if !grid.has_array(ty) {
                    grid.new_array(ty, 0.0);
                }
            }
        }

        let mut dt = match self.stable_time_step(grids)? {
            Some(bound) => bound.min(t_final),
            None => t_final,
        };
        let mut n_iter = 1;
        if dt < t_final {
            n_iter = (t_final / dt).ceil() as usize;
            dt = t_final / n_iter as f64;
        }
        debug!(t_final, dt, n_iter, grids = grids.len(), "solving diffusion-reaction");

        let mut lop = Vec::new();
        for _ in 0..n_iter {
            updater.prestep(grids, dt)?;
            for grid in grids.iter_mut() {
                compute_l_operator(grid, &mut lop)?;
                grid.array_mut(ArrayType::LOperator)?.copy_from_slice(&lop);
                for (concn, rate) in grid.array_mut(ArrayType::Concn)?.iter_mut().zip(&lop) {
                    *concn += rate * dt;
                }
            }
        }
        Ok(SolveReport { dt, n_iter })
    }
}

fn max_domain_diffusivity(grid: &SpatialGrid) -> Result<f64, SolverError> {
    let values = grid.array(ArrayType::Diffusivity)?;
    let topology = grid.topology();
    let mut max = OrderedFloat(0.0);
    for voxel in grid.iter_domain() {
        let value = values[topology.flat_index(voxel)];
        if !(value.is_finite() && value >= 0.0) {
            return Err(SolverError::InvalidDiffusivity {
                grid: grid.name().to_owned(),
                value,
            });
        }
        max = max.max(OrderedFloat(value));
    }
    Ok(max.into_inner())
}

/// Fill `out` with the Laplacian plus production for every domain voxel; zero elsewhere.
fn compute_l_operator(grid: &SpatialGrid, out: &mut Vec<f64>) -> Result<(), SolverError> {
    out.clear();
    out.resize(grid.voxel_count(), 0.0);
    let production = grid.array(ArrayType::ProductionRate)?;
    let topology = grid.topology();
    for voxel in grid.iter_domain() {
        let mut total = 0.0;
        for neighbor in grid.neighbors(voxel) {
            total += match neighbor {
                Neighbor::Interior(other) => grid.flux_with_neighbor(voxel, other)?,
                Neighbor::Boundary { method, .. } => method.boundary_flux(grid, voxel)?,
            };
        }
        let idx = topology.flat_index(voxel);
        out[idx] = total + production[idx];
    }
    Ok(())
}
