//! Spatial indexing abstractions for agent bounding-box queries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest spatial dimensionality supported by the indices.
pub const MAX_DIMS: usize = 3;

/// Relative tolerance used when comparing layer, cell and compartment lengths.
const LENGTH_TOLERANCE: f64 = 1e-9;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The layer and the compartment disagree on the number of dimensions.
    #[error("layer has {layer} dimensions but the compartment has {compartment}")]
    DimensionMismatch { layer: usize, compartment: usize },
    /// A layer side is not a whole multiple of the cell side.
    #[error("layer length {layer} in dimension {dim} is not a whole multiple of cell length {cell}")]
    NotDivisible { dim: usize, layer: f64, cell: f64 },
    /// The apical normal cannot be identified from the layer shape.
    #[error("apical orientation is ambiguous: {0} dimensions do not span the compartment")]
    AmbiguousOrientation(usize),
    /// More agents were supplied than the lattice has cells.
    #[error("{agents} agents exceed the {cells} lattice cells")]
    Capacity { agents: usize, cells: usize },
}

/// Axis-aligned box; unused trailing dimensions stay at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub lower: [f64; MAX_DIMS],
    pub upper: [f64; MAX_DIMS],
}

impl BoundingBox {
    /// Build a box from its two corners; the corners are reordered per dimension.
    #[must_use]
    pub fn new(a: [f64; MAX_DIMS], b: [f64; MAX_DIMS]) -> Self {
        let mut lower = [0.0; MAX_DIMS];
        let mut upper = [0.0; MAX_DIMS];
        for dim in 0..MAX_DIMS {
            lower[dim] = a[dim].min(b[dim]);
            upper[dim] = a[dim].max(b[dim]);
        }
        Self { lower, upper }
    }

    /// Smallest box enclosing a sphere in the first `n_dim` dimensions.
    #[must_use]
    pub fn around_sphere(center: [f64; MAX_DIMS], radius: f64, n_dim: usize) -> Self {
        let mut lower = [0.0; MAX_DIMS];
        let mut upper = [0.0; MAX_DIMS];
        for dim in 0..n_dim.min(MAX_DIMS) {
            lower[dim] = center[dim] - radius;
            upper[dim] = center[dim] + radius;
        }
        Self { lower, upper }
    }

    /// Grow the box by `margin` on every side of the first `n_dim` dimensions.
    #[must_use]
    pub fn expanded(&self, margin: f64, n_dim: usize) -> Self {
        let mut out = *self;
        for dim in 0..n_dim.min(MAX_DIMS) {
            out.lower[dim] -= margin;
            out.upper[dim] += margin;
        }
        out
    }

    /// Closed-interval overlap test over all dimensions.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..MAX_DIMS).all(|dim| self.lower[dim] <= other.upper[dim] && other.lower[dim] <= self.upper[dim])
    }
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex: Send + Sync {
    /// Rebuild internal structures from agent bounding boxes; slot `i` belongs to agent `i`.
    fn rebuild(&mut self, bounds: &[BoundingBox]) -> Result<(), IndexError>;

    /// Visit every agent slot whose space may intersect `region`.
    fn query(&self, region: &BoundingBox, visitor: &mut dyn FnMut(usize));

    /// Collect query hits into a vector.
    fn collect(&self, region: &BoundingBox) -> Vec<usize> {
        let mut hits = Vec::new();
        self.query(region, &mut |idx| hits.push(idx));
        hits
    }
}

/// Exhaustive index for free-moving agents: every query scans all boxes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearScanIndex {
    #[serde(skip)]
    bounds: Vec<BoundingBox>,
}

impl LinearScanIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

impl NeighborhoodIndex for LinearScanIndex {
    fn rebuild(&mut self, bounds: &[BoundingBox]) -> Result<(), IndexError> {
        self.bounds.clear();
        self.bounds.extend_from_slice(bounds);
        Ok(())
    }

    fn query(&self, region: &BoundingBox, visitor: &mut dyn FnMut(usize)) {
        for (idx, bounds) in self.bounds.iter().enumerate() {
            if bounds.overlaps(region) {
                visitor(idx);
            }
        }
    }
}

/// Shape of an epithelial layer relative to its compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerLayout {
    /// Lower corner of the layer.
    pub origin: Vec<f64>,
    /// Side lengths of the whole layer.
    pub layer_lengths: Vec<f64>,
    /// Side lengths of a single cell.
    pub cell_lengths: Vec<f64>,
    /// Side lengths of the enclosing compartment.
    pub compartment_lengths: Vec<f64>,
}

/// Regular-lattice index over a single layer of static, evenly spaced agents.
///
/// Agent `i` occupies the cell whose linear index is `i` (dimension 0 varies
/// fastest). Moving agents invalidate the lattice assumption; use
/// [`LinearScanIndex`] for those populations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpithelialGrid {
    n_dim: usize,
    origin: [f64; MAX_DIMS],
    cell: [f64; MAX_DIMS],
    counts: [usize; MAX_DIMS],
    normal: usize,
    #[serde(skip)]
    agent_count: usize,
}

impl EpithelialGrid {
    /// Validate the layout and derive the lattice.
    pub fn new(layout: &LayerLayout) -> Result<Self, IndexError> {
        let n_dim = layout.compartment_lengths.len();
        if n_dim == 0 || n_dim > MAX_DIMS {
            return Err(IndexError::InvalidConfig(
                "compartment must have between one and three dimensions",
            ));
        }
        for layer_dims in [
            layout.origin.len(),
            layout.layer_lengths.len(),
            layout.cell_lengths.len(),
        ] {
            if layer_dims != n_dim {
                return Err(IndexError::DimensionMismatch {
                    layer: layer_dims,
                    compartment: n_dim,
                });
            }
        }

        let mut origin = [0.0; MAX_DIMS];
        let mut cell = [0.0; MAX_DIMS];
        let mut counts = [1usize; MAX_DIMS];
        let mut non_spanning = Vec::with_capacity(n_dim);
        for dim in 0..n_dim {
            let layer = layout.layer_lengths[dim];
            let side = layout.cell_lengths[dim];
            if !(side.is_finite() && side > 0.0 && layer.is_finite() && layer > 0.0) {
                return Err(IndexError::InvalidConfig(
                    "layer and cell lengths must be positive and finite",
                ));
            }
            let ratio = layer / side;
            let whole = ratio.round();
            if whole < 1.0 || (ratio - whole).abs() > LENGTH_TOLERANCE * ratio.max(1.0) {
                return Err(IndexError::NotDivisible { dim, layer, cell: side });
            }
            origin[dim] = layout.origin[dim];
            cell[dim] = side;
            counts[dim] = whole as usize;

            let spans = (layer - layout.compartment_lengths[dim]).abs()
                <= LENGTH_TOLERANCE * layer.max(1.0);
            if !spans {
                non_spanning.push(dim);
            }
        }

        let normal = match non_spanning.as_slice() {
            [dim] => *dim,
            other => return Err(IndexError::AmbiguousOrientation(other.len())),
        };
        if counts[normal] != 1 {
            return Err(IndexError::InvalidConfig(
                "layer must be one cell thick along its normal",
            ));
        }

        Ok(Self {
            n_dim,
            origin,
            cell,
            counts,
            normal,
            agent_count: 0,
        })
    }

    /// Number of lattice cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.counts[..self.n_dim].iter().product()
    }

    /// Number of agents registered by the last rebuild.
    #[must_use]
    pub const fn agent_count(&self) -> usize {
        self.agent_count
    }

    /// Dimension along which the layer does not span the compartment.
    #[must_use]
    pub const fn normal_axis(&self) -> usize {
        self.normal
    }

    /// Centre of the cell holding agent slot `idx`.
    #[must_use]
    pub fn cell_center(&self, idx: usize) -> Option<[f64; MAX_DIMS]> {
        if idx >= self.cell_count() {
            return None;
        }
        let mut rest = idx;
        let mut center = [0.0; MAX_DIMS];
        for dim in 0..self.n_dim {
            let coord = rest % self.counts[dim];
            rest /= self.counts[dim];
            center[dim] = self.origin[dim] + (coord as f64 + 0.5) * self.cell[dim];
        }
        Some(center)
    }

    fn linear_index(&self, coords: &[usize; MAX_DIMS]) -> usize {
        let mut stride = 1;
        let mut linear = 0;
        for dim in 0..self.n_dim {
            linear += coords[dim] * stride;
            stride *= self.counts[dim];
        }
        linear
    }

    /// Inclusive cell range covered by `[lower, upper]` in `dim`, or `None` when disjoint.
    fn cell_range(&self, dim: usize, lower: f64, upper: f64) -> Option<(usize, usize)> {
        let extent = self.cell[dim] * self.counts[dim] as f64;
        let start = self.origin[dim];
        if upper < start || lower > start + extent {
            return None;
        }
        let last = (self.counts[dim] - 1) as f64;
        let lo = ((lower - start) / self.cell[dim]).floor().clamp(0.0, last);
        let hi = ((upper - start) / self.cell[dim]).floor().clamp(0.0, last);
        Some((lo as usize, hi as usize))
    }
}

impl NeighborhoodIndex for EpithelialGrid {
    fn rebuild(&mut self, bounds: &[BoundingBox]) -> Result<(), IndexError> {
        let cells = self.cell_count();
        if bounds.len() > cells {
            return Err(IndexError::Capacity {
                agents: bounds.len(),
                cells,
            });
        }
        self.agent_count = bounds.len();
        Ok(())
    }

    fn query(&self, region: &BoundingBox, visitor: &mut dyn FnMut(usize)) {
        if self.agent_count == 0 {
            return;
        }
        // Cheap reject along the apical normal before touching the lattice.
        let normal = self.normal;
        let bottom = self.origin[normal];
        let top = bottom + self.cell[normal];
        if region.upper[normal] < bottom || region.lower[normal] > top {
            return;
        }

        let mut lo = [0usize; MAX_DIMS];
        let mut hi = [0usize; MAX_DIMS];
        for dim in 0..self.n_dim {
            let Some((start, end)) = self.cell_range(dim, region.lower[dim], region.upper[dim])
            else {
                return;
            };
            lo[dim] = start;
            hi[dim] = end;
        }

        let mut counter = lo;
        loop {
            let linear = self.linear_index(&counter);
            if linear < self.agent_count {
                visitor(linear);
            }
            let mut dim = 0;
            loop {
                if dim == self.n_dim {
                    return;
                }
                counter[dim] += 1;
                if counter[dim] <= hi[dim] {
                    break;
                }
                counter[dim] = lo[dim];
                dim += 1;
            }
        }
    }
}
