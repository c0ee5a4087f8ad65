//! Pairwise push/pull forces between spherical agents.

use cellfield_index::{BoundingBox, IndexError, NeighborhoodIndex};
use serde::Serialize;
use tracing::trace;

use crate::MAX_DIMS;
use crate::agent::{Agent, Body};
use crate::grid::GridTopology;

/// Surface distances within this band count as touching.
pub const OVERLAP_TOLERANCE: f64 = 0.001;

/// Scratch values for one agent pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CollisionVariables {
    /// Surface-to-surface distance; negative when the bodies overlap.
    pub distance: f64,
    /// Unit vector pointing from the partner towards this agent.
    pub interaction_vector: [f64; MAX_DIMS],
    pub pull_range: f64,
}

impl CollisionVariables {
    /// Variables seen by `this` when interacting with `other`.
    #[must_use]
    pub fn between(this: &Body, other: &Body, n_dim: usize, pull_range: f64) -> Self {
        let mut delta = [0.0; MAX_DIMS];
        let mut norm_sq = 0.0;
        for dim in 0..n_dim.min(MAX_DIMS) {
            delta[dim] = this.center[dim] - other.center[dim];
            norm_sq += delta[dim] * delta[dim];
        }
        let norm = norm_sq.sqrt();
        let mut interaction_vector = [0.0; MAX_DIMS];
        if norm > 0.0 {
            for (unit, part) in interaction_vector.iter_mut().zip(delta) {
                *unit = part / norm;
            }
        } else {
            // Coincident centres: separate along the first axis.
            interaction_vector[0] = 1.0;
        }
        Self {
            distance: norm - this.radius - other.radius,
            interaction_vector,
            pull_range,
        }
    }
}

/// Force law evaluated on a pair of agents.
pub trait CollisionFunction: std::fmt::Debug + Send + Sync {
    fn force_scalar(&self) -> f64;

    /// Force acting on the agent that owns `variables`.
    fn interaction_force(&self, variables: &CollisionVariables) -> [f64; MAX_DIMS];
}

fn scaled(vector: [f64; MAX_DIMS], magnitude: f64) -> [f64; MAX_DIMS] {
    vector.map(|part| part * magnitude)
}

/// Linear repulsion between overlapping bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushFunction {
    pub scalar: f64,
}

impl CollisionFunction for PushFunction {
    fn force_scalar(&self) -> f64 {
        self.scalar
    }

    fn interaction_force(&self, variables: &CollisionVariables) -> [f64; MAX_DIMS] {
        if variables.distance < -OVERLAP_TOLERANCE {
            scaled(
                variables.interaction_vector,
                (self.scalar * variables.distance).abs(),
            )
        } else {
            [0.0; MAX_DIMS]
        }
    }
}

/// Linear attraction between bodies separated by less than the pull range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullFunction {
    pub scalar: f64,
}

impl CollisionFunction for PullFunction {
    fn force_scalar(&self) -> f64 {
        self.scalar
    }

    fn interaction_force(&self, variables: &CollisionVariables) -> [f64; MAX_DIMS] {
        let distance = variables.distance;
        if distance > OVERLAP_TOLERANCE && distance < variables.pull_range {
            scaled(
                variables.interaction_vector,
                -(self.scalar * distance).abs(),
            )
        } else {
            [0.0; MAX_DIMS]
        }
    }
}

/// Summary of one collision sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CollisionReport {
    pub pairs_checked: usize,
    pub pushing: usize,
    pub pulling: usize,
    /// Mean force magnitude over all agents.
    pub mean_force: f64,
}

/// Finds interacting pairs through a spatial index and accumulates their forces.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    push: PushFunction,
    pull: PullFunction,
    pull_range: f64,
    mobility: f64,
    n_dim: usize,
}

impl CollisionResolver {
    #[must_use]
    pub const fn new(
        push: PushFunction,
        pull: PullFunction,
        pull_range: f64,
        mobility: f64,
        n_dim: usize,
    ) -> Self {
        Self {
            push,
            pull,
            pull_range,
            mobility,
            n_dim,
        }
    }

    /// Bounding box used to look up the partners of `body`.
    #[must_use]
    pub fn bounds(&self, body: &Body) -> BoundingBox {
        BoundingBox::around_sphere(body.center, body.radius, self.n_dim)
            .expanded(self.pull_range / 2.0, self.n_dim)
    }

    /// Replace every agent's force with the sum of its pairwise interactions.
    pub fn resolve(
        &self,
        agents: &mut [&mut Agent],
        index: &mut dyn NeighborhoodIndex,
    ) -> Result<CollisionReport, IndexError> {
        let bodies: Vec<Body> = agents.iter().map(|agent| *agent.body()).collect();
        let bounds: Vec<BoundingBox> = bodies.iter().map(|body| self.bounds(body)).collect();
        index.rebuild(&bounds)?;

        let mut forces = vec![[0.0; MAX_DIMS]; bodies.len()];
        let mut report = CollisionReport::default();
        let mut partners = Vec::new();
        for (idx, region) in bounds.iter().enumerate() {
            partners.clear();
            index.query(region, &mut |other| {
                if other > idx && other < bodies.len() {
                    partners.push(other);
                }
            });
            for &other in &partners {
                report.pairs_checked += 1;
                let variables =
                    CollisionVariables::between(&bodies[idx], &bodies[other], self.n_dim, self.pull_range);
                let push = self.push.interaction_force(&variables);
                let pull = self.pull.interaction_force(&variables);
                if push.iter().any(|part| *part != 0.0) {
                    report.pushing += 1;
                }
                if pull.iter().any(|part| *part != 0.0) {
                    report.pulling += 1;
                }
                for dim in 0..MAX_DIMS {
                    let force = push[dim] + pull[dim];
                    forces[idx][dim] += force;
                    forces[other][dim] -= force;
                }
            }
        }

        let mut magnitude_sum = 0.0;
        for (agent, force) in agents.iter_mut().zip(&forces) {
            agent.clear_force();
            agent.add_force(*force);
            magnitude_sum += force.iter().map(|part| part * part).sum::<f64>().sqrt();
        }
        if !forces.is_empty() {
            report.mean_force = magnitude_sum / forces.len() as f64;
        }
        trace!(
            pairs = report.pairs_checked,
            pushing = report.pushing,
            pulling = report.pulling,
            "collision sweep"
        );
        Ok(report)
    }

    /// Overdamped move `position += mobility * force * dt`, kept inside the compartment.
    ///
    /// Returns the number of agents that moved.
    pub fn relax(&self, agents: &mut [&mut Agent], topology: &GridTopology, dt: f64) -> usize {
        let mut moved = 0;
        for agent in agents.iter_mut() {
            let force = agent.force();
            if force.iter().all(|part| *part == 0.0) {
                continue;
            }
            let mut body = *agent.body();
            for (dim, coord) in body.center.iter_mut().enumerate().take(self.n_dim) {
                let length = topology.length(dim);
                let next = *coord + self.mobility * force[dim] * dt;
                *coord = if topology.is_cyclic(dim) {
                    next.rem_euclid(length)
                } else {
                    next.clamp(0.0, length)
                };
            }
            agent.set_body(body);
            moved += 1;
        }
        moved
    }
}
