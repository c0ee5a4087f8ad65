//! Agents: spherical bodies carrying reactions, aspects and a voxel distribution map.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::MAX_DIMS;
use crate::grid::{GridTopology, Voxel};
use crate::reaction::Reaction;
use crate::shape::{radius_from_volume, sphere_distribution};

new_key_type! {
    /// Stable handle for agents stored in a compartment.
    pub struct AgentId;
}

/// Spherical body in compartment coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub center: [f64; MAX_DIMS],
    pub radius: f64,
}

impl Body {
    #[must_use]
    pub const fn new(center: [f64; MAX_DIMS], radius: f64) -> Self {
        Self { center, radius }
    }
}

/// Occupied volume per voxel together with its running total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionMap {
    volumes: BTreeMap<Voxel, f64>,
    total: f64,
}

impl DistributionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `volume` to the share held in `voxel`.
    pub fn add(&mut self, voxel: Voxel, volume: f64) {
        *self.volumes.entry(voxel).or_insert(0.0) += volume;
        self.total += volume;
    }

    #[must_use]
    pub fn volume(&self, voxel: Voxel) -> Option<f64> {
        self.volumes.get(&voxel).copied()
    }

    /// Sum of mapped volumes; may differ from the geometric body volume.
    #[must_use]
    pub const fn total_vox_vol(&self) -> f64 {
        self.total
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Voxels in coordinate order with their volumes.
    pub fn iter(&self) -> impl Iterator<Item = (Voxel, f64)> + '_ {
        self.volumes.iter().map(|(voxel, volume)| (*voxel, *volume))
    }
}

impl FromIterator<(Voxel, f64)> for DistributionMap {
    fn from_iter<I: IntoIterator<Item = (Voxel, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (voxel, volume) in iter {
            map.add(voxel, volume);
        }
        map
    }
}

/// An individual cell.
#[derive(Debug, Clone)]
pub struct Agent {
    species: String,
    body: Body,
    aspects: BTreeMap<String, f64>,
    reactions: Vec<Reaction>,
    internal_products: BTreeSet<String>,
    growth_rate: f64,
    internal_production: BTreeMap<String, f64>,
    /// `None` while the body has changed since the last mapping.
    distribution: Option<DistributionMap>,
    force: [f64; MAX_DIMS],
}

impl Agent {
    pub fn new(species: impl Into<String>, body: Body) -> Self {
        Self {
            species: species.into(),
            body,
            aspects: BTreeMap::new(),
            reactions: Vec::new(),
            internal_products: BTreeSet::new(),
            growth_rate: 0.0,
            internal_production: BTreeMap::new(),
            distribution: None,
            force: [0.0; MAX_DIMS],
        }
    }

    #[must_use]
    pub fn with_aspect(mut self, name: impl Into<String>, value: f64) -> Self {
        self.aspects.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_reaction(mut self, reaction: Reaction) -> Self {
        self.reactions.push(reaction);
        self
    }

    #[must_use]
    pub fn with_internal_product(mut self, name: impl Into<String>) -> Self {
        self.internal_products.insert(name.into());
        self
    }

    #[must_use]
    pub fn species(&self) -> &str {
        &self.species
    }

    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Replace the body; the distribution map becomes stale.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
        self.distribution = None;
    }

    /// Move the centre by `delta`; the distribution map becomes stale.
    pub fn translate(&mut self, delta: [f64; MAX_DIMS]) {
        for (coord, step) in self.body.center.iter_mut().zip(delta) {
            *coord += step;
        }
        self.distribution = None;
    }

    #[must_use]
    pub fn aspect(&self, name: &str) -> Option<f64> {
        self.aspects.get(name).copied()
    }

    pub fn set_aspect(&mut self, name: impl Into<String>, value: f64) {
        self.aspects.insert(name.into(), value);
    }

    #[must_use]
    pub const fn aspects(&self) -> &BTreeMap<String, f64> {
        &self.aspects
    }

    #[must_use]
    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    #[must_use]
    pub fn is_internal_product(&self, name: &str) -> bool {
        self.internal_products.contains(name)
    }

    #[must_use]
    pub const fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    #[must_use]
    pub const fn internal_production(&self) -> &BTreeMap<String, f64> {
        &self.internal_production
    }

    pub(crate) fn reset_accumulators(&mut self) {
        self.growth_rate = 0.0;
        self.internal_production.clear();
    }

    pub(crate) fn accumulate(&mut self, growth: f64, internal: BTreeMap<String, f64>) {
        self.growth_rate += growth;
        for (name, rate) in internal {
            *self.internal_production.entry(name).or_insert(0.0) += rate;
        }
    }

    #[must_use]
    pub const fn distribution(&self) -> Option<&DistributionMap> {
        self.distribution.as_ref()
    }

    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.distribution.is_none()
    }

    /// Install a precomputed map, e.g. from an external geometry provider.
    pub fn set_distribution(&mut self, map: DistributionMap) {
        self.distribution = Some(map);
    }

    /// Recompute the distribution map from the current body.
    pub fn refresh_distribution(&mut self, topology: &GridTopology, subvoxels: usize) {
        self.distribution = Some(sphere_distribution(topology, &self.body, subvoxels));
    }

    #[must_use]
    pub const fn force(&self) -> [f64; MAX_DIMS] {
        self.force
    }

    pub(crate) fn clear_force(&mut self) {
        self.force = [0.0; MAX_DIMS];
    }

    pub(crate) fn add_force(&mut self, force: [f64; MAX_DIMS]) {
        for (total, part) in self.force.iter_mut().zip(force) {
            *total += part;
        }
    }
}

/// Events fired on an agent after its reactions were evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEvent {
    Growth,
    Produce,
}

/// Handler for agent events; shared by every worker of the reaction pass.
pub trait AgentEvents: Send + Sync {
    fn on_event(&self, agent: &mut Agent, event: AgentEvent, dt: f64);
}

/// Default events: grow mass, integrate internal products, resize the body.
#[derive(Debug, Clone, Copy)]
pub struct BiomassEvents {
    n_dim: usize,
}

impl BiomassEvents {
    #[must_use]
    pub const fn new(n_dim: usize) -> Self {
        Self { n_dim }
    }
}

impl AgentEvents for BiomassEvents {
    fn on_event(&self, agent: &mut Agent, event: AgentEvent, dt: f64) {
        match event {
            AgentEvent::Growth => {
                if agent.growth_rate == 0.0 {
                    return;
                }
                let mass = (agent.aspect("mass").unwrap_or(0.0) + agent.growth_rate * dt).max(0.0);
                agent.set_aspect("mass", mass);
                if let Some(density) = agent.aspect("density").filter(|d| *d > 0.0) {
                    let radius = radius_from_volume(mass / density, self.n_dim);
                    let center = agent.body.center;
                    agent.set_body(Body::new(center, radius));
                }
            }
            AgentEvent::Produce => {
                let produced: Vec<(String, f64)> = agent
                    .internal_production
                    .iter()
                    .map(|(name, rate)| (name.clone(), rate * dt))
                    .collect();
                for (name, amount) in produced {
                    let current = agent.aspect(&name).unwrap_or(0.0);
                    agent.set_aspect(name, current + amount);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::sphere_volume;

    #[test]
    fn body_changes_mark_the_map_stale() {
        let topology = GridTopology::new(&[4, 4], 1.0, &[]).expect("topology");
        let mut agent = Agent::new("cell", Body::new([1.5, 1.5, 0.0], 0.4));
        assert!(agent.is_stale());
        agent.refresh_distribution(&topology, 4);
        assert!(!agent.is_stale());
        agent.translate([1.0, 0.0, 0.0]);
        assert!(agent.is_stale());
        assert_eq!(agent.body().center, [2.5, 1.5, 0.0]);
    }

    #[test]
    fn distribution_map_tracks_total() {
        let map: DistributionMap = [
            (Voxel::line(0), 0.25),
            (Voxel::line(1), 0.5),
            (Voxel::line(0), 0.25),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.volume(Voxel::line(0)), Some(0.5));
        assert_eq!(map.total_vox_vol(), 1.0);
    }

    #[test]
    fn growth_event_updates_mass_and_radius() {
        let mut agent = Agent::new("cell", Body::new([0.0; MAX_DIMS], 1.0))
            .with_aspect("mass", 2.0)
            .with_aspect("density", 1.0);
        agent.set_distribution(DistributionMap::new());
        agent.accumulate(0.5, BTreeMap::new());
        BiomassEvents::new(2).on_event(&mut agent, AgentEvent::Growth, 2.0);
        assert_eq!(agent.aspect("mass"), Some(3.0));
        assert!((sphere_volume(agent.body().radius, 2) - 3.0).abs() < 1e-12);
        assert!(agent.is_stale());
    }

    #[test]
    fn produce_event_integrates_internal_products() {
        let mut agent = Agent::new("cell", Body::new([0.0; MAX_DIMS], 1.0))
            .with_internal_product("eps");
        agent.accumulate(0.0, BTreeMap::from([("eps".to_owned(), 0.25)]));
        let events = BiomassEvents::new(3);
        events.on_event(&mut agent, AgentEvent::Growth, 4.0);
        assert_eq!(agent.aspect("mass"), None);
        events.on_event(&mut agent, AgentEvent::Produce, 4.0);
        assert_eq!(agent.aspect("eps"), Some(1.0));
    }
}
