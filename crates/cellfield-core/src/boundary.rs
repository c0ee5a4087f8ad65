//! Boundary grid methods and the registry that builds them from configuration.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::grid::{ArrayType, Face, GridError, SpatialGrid, Voxel};

/// Flux provider for neighbour steps that leave the grid.
pub trait GridMethod: fmt::Debug + Send + Sync {
    /// Static identifier of the method.
    fn kind(&self) -> &'static str;

    /// Concentration rate entering `voxel` through the boundary face.
    fn boundary_flux(&self, grid: &SpatialGrid, voxel: Voxel) -> Result<f64, GridError>;
}

/// Impermeable face.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZeroFlux;

impl GridMethod for ZeroFlux {
    fn kind(&self) -> &'static str {
        "zero_flux"
    }

    fn boundary_flux(&self, _grid: &SpatialGrid, _voxel: Voxel) -> Result<f64, GridError> {
        Ok(0.0)
    }
}

/// Face held at a constant concentration one voxel beyond the edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedConcentration {
    pub concentration: f64,
}

impl GridMethod for FixedConcentration {
    fn kind(&self) -> &'static str {
        "fixed_concentration"
    }

    fn boundary_flux(&self, grid: &SpatialGrid, voxel: Voxel) -> Result<f64, GridError> {
        let concn = grid.value_at(ArrayType::Concn, voxel)?;
        let diffusivity = grid.value_at(ArrayType::Diffusivity, voxel)?;
        let res = grid.topology().resolution();
        Ok(diffusivity * (self.concentration - concn) / (res * res))
    }
}

/// Face with a prescribed inward flux per unit area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFlux {
    pub flux: f64,
}

impl GridMethod for FixedFlux {
    fn kind(&self) -> &'static str {
        "fixed_flux"
    }

    fn boundary_flux(&self, grid: &SpatialGrid, _voxel: Voxel) -> Result<f64, GridError> {
        Ok(self.flux / grid.topology().resolution())
    }
}

/// Configuration entry binding a grid method to a face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundarySpec {
    pub face: Face,
    /// Registry identifier, e.g. `"fixed_concentration"`.
    pub kind: String,
    /// Method parameter (concentration or flux) when the method takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl BoundarySpec {
    pub fn new(face: Face, kind: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            face,
            kind: kind.into(),
            value,
        }
    }

    /// The finite parameter a method needs, or a configuration error naming it.
    pub fn require_value(&self, parameter: &'static str) -> Result<f64, ConfigError> {
        match self.value {
            Some(value) if value.is_finite() => Ok(value),
            _ => Err(ConfigError::MissingParameter {
                kind: self.kind.clone(),
                parameter,
            }),
        }
    }
}

type MethodFactory =
    Box<dyn Fn(&BoundarySpec) -> Result<Arc<dyn GridMethod>, ConfigError> + Send + Sync + 'static>;

/// Registry mapping method identifiers to factories, resolved at configuration time.
#[derive(Default)]
pub struct GridMethodRegistry {
    entries: HashMap<Cow<'static, str>, MethodFactory>,
}

impl fmt::Debug for GridMethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("GridMethodRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl GridMethodRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in methods.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("zero_flux", |_| Ok(Arc::new(ZeroFlux)));
        registry.register("fixed_concentration", |spec| {
            Ok(Arc::new(FixedConcentration {
                concentration: spec.require_value("concentration")?,
            }))
        });
        registry.register("fixed_flux", |spec| {
            Ok(Arc::new(FixedFlux {
                flux: spec.require_value("flux")?,
            }))
        });
        registry
    }

    /// Registers a factory, returning whether it replaced an existing entry.
    pub fn register<F>(&mut self, kind: impl Into<Cow<'static, str>>, factory: F) -> bool
    where
        F: Fn(&BoundarySpec) -> Result<Arc<dyn GridMethod>, ConfigError> + Send + Sync + 'static,
    {
        self.entries
            .insert(kind.into(), Box::new(factory))
            .is_some()
    }

    /// Removes a factory from the registry.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.entries.remove(kind).is_some()
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(AsRef::as_ref)
    }

    /// Instantiate the method named by `spec`.
    pub fn build(&self, spec: &BoundarySpec) -> Result<Arc<dyn GridMethod>, ConfigError> {
        let factory = self
            .entries
            .get(spec.kind.as_str())
            .ok_or_else(|| ConfigError::UnknownGridMethod(spec.kind.clone()))?;
        factory(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridTopology, Side};

    fn line(concn: f64, diffusivity: f64) -> SpatialGrid {
        let topology = GridTopology::new(&[3], 0.5, &[]).expect("topology");
        let mut grid = SpatialGrid::new("line", topology);
        grid.new_array(ArrayType::Concn, concn);
        grid.new_array(ArrayType::Diffusivity, diffusivity);
        grid
    }

    #[test]
    fn fixed_concentration_pulls_toward_boundary_value() {
        let grid = line(1.0, 2.0);
        let method = FixedConcentration { concentration: 3.0 };
        let flux = method.boundary_flux(&grid, Voxel::line(0)).expect("flux");
        assert!((flux - 16.0).abs() < 1e-12);
        assert_eq!(ZeroFlux.boundary_flux(&grid, Voxel::line(0)), Ok(0.0));
    }

    #[test]
    fn fixed_flux_scales_by_resolution() {
        let grid = line(0.0, 1.0);
        let flux = FixedFlux { flux: 0.25 }
            .boundary_flux(&grid, Voxel::line(2))
            .expect("flux");
        assert!((flux - 0.5).abs() < 1e-12);
    }

    #[test]
    fn registry_builds_builtin_methods() {
        let registry = GridMethodRegistry::with_builtin();
        let spec = BoundarySpec::new(Face::new(0, Side::Max), "fixed_concentration", Some(2.0));
        let method = registry.build(&spec).expect("method");
        assert_eq!(method.kind(), "fixed_concentration");
        assert!(registry.contains("zero_flux"));
    }

    #[test]
    fn registry_rejects_unknown_and_incomplete_specs() {
        let registry = GridMethodRegistry::with_builtin();
        let unknown = BoundarySpec::new(Face::new(0, Side::Min), "chemostat", None);
        assert!(matches!(
            registry.build(&unknown),
            Err(ConfigError::UnknownGridMethod(kind)) if kind == "chemostat"
        ));
        let incomplete = BoundarySpec::new(Face::new(0, Side::Min), "fixed_flux", None);
        assert!(matches!(
            registry.build(&incomplete),
            Err(ConfigError::MissingParameter { parameter: "flux", .. })
        ));
    }

    #[test]
    fn registry_allows_custom_methods() {
        let mut registry = GridMethodRegistry::new();
        assert!(!registry.register("zero_flux", |_| Ok(Arc::new(ZeroFlux))));
        assert!(registry.register("zero_flux", |_| Ok(Arc::new(FixedFlux { flux: 0.0 }))));
        let spec = BoundarySpec::new(Face::new(0, Side::Min), "zero_flux", None);
        assert_eq!(registry.build(&spec).expect("method").kind(), "fixed_flux");
        assert!(registry.unregister("zero_flux"));
        assert!(!registry.contains("zero_flux"));
    }
}
