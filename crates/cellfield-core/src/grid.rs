//! Voxel grids holding the per-solute arrays shared by the solver and the agents.

use std::fmt;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_DIMS;
use crate::boundary::{GridMethod, ZeroFlux};

/// Named arrays stored per grid. Every array shares the grid topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayType {
    Concn,
    Diffusivity,
    ProductionRate,
    Domain,
    LOperator,
    Scratch,
}

impl ArrayType {
    pub const ALL: [ArrayType; 6] = [
        ArrayType::Concn,
        ArrayType::Diffusivity,
        ArrayType::ProductionRate,
        ArrayType::Domain,
        ArrayType::LOperator,
        ArrayType::Scratch,
    ];

    const fn slot(self) -> usize {
        match self {
            ArrayType::Concn => 0,
            ArrayType::Diffusivity => 1,
            ArrayType::ProductionRate => 2,
            ArrayType::Domain => 3,
            ArrayType::LOperator => 4,
            ArrayType::Scratch => 5,
        }
    }
}

impl fmt::Display for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArrayType::Concn => "CONCN",
            ArrayType::Diffusivity => "DIFFUSIVITY",
            ArrayType::ProductionRate => "PRODUCTIONRATE",
            ArrayType::Domain => "DOMAIN",
            ArrayType::LOperator => "LOPERATOR",
            ArrayType::Scratch => "SCRATCH",
        };
        f.write_str(label)
    }
}

/// Integer voxel coordinate; dimensions beyond the grid's `n_dim` stay at zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Voxel(pub [usize; MAX_DIMS]);

impl Voxel {
    #[must_use]
    pub const fn new(coords: [usize; MAX_DIMS]) -> Self {
        Self(coords)
    }

    /// Coordinate of a one-dimensional grid.
    #[must_use]
    pub const fn line(x: usize) -> Self {
        Self([x, 0, 0])
    }

    /// Coordinate of a two-dimensional grid.
    #[must_use]
    pub const fn plane(x: usize, y: usize) -> Self {
        Self([x, y, 0])
    }
}

/// Lower or upper side of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Min,
    Max,
}

impl Side {
    const fn slot(self) -> usize {
        match self {
            Side::Min => 0,
            Side::Max => 1,
        }
    }
}

/// One face of the grid's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Face {
    pub dim: usize,
    pub side: Side,
}

impl Face {
    #[must_use]
    pub const fn new(dim: usize, side: Side) -> Self {
        Self { dim, side }
    }
}

/// Errors raised by voxel access and grid construction.
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    /// The coordinate lies outside the grid.
    #[error("voxel {voxel:?} is outside grid '{grid}'")]
    OutOfRange { grid: String, voxel: Voxel },
    /// The requested array was never allocated with `new_array`.
    #[error("grid '{grid}' has no {array} array")]
    MissingArray { grid: String, array: ArrayType },
    /// The topology description cannot be used.
    #[error("invalid grid topology: {0}")]
    InvalidTopology(&'static str),
    /// A face was addressed on a dimension the grid does not have.
    #[error("grid '{grid}' has no dimension {dim}")]
    NoSuchDimension { grid: String, dim: usize },
}

/// Shape shared by all arrays of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTopology {
    n_dim: usize,
    counts: [usize; MAX_DIMS],
    resolution: f64,
    cyclic: [bool; MAX_DIMS],
}

impl GridTopology {
    /// Describe a grid of `counts` voxels per dimension with uniform `resolution`.
    pub fn new(counts: &[usize], resolution: f64, cyclic: &[bool]) -> Result<Self, GridError> {
        if counts.is_empty() || counts.len() > MAX_DIMS {
            return Err(GridError::InvalidTopology(
                "grids must have between one and three dimensions",
            ));
        }
        if counts.contains(&0) {
            return Err(GridError::InvalidTopology("voxel counts must be non-zero"));
        }
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(GridError::InvalidTopology(
                "resolution must be positive and finite",
            ));
        }
        if !cyclic.is_empty() && cyclic.len() != counts.len() {
            return Err(GridError::InvalidTopology(
                "cyclic flags must be given for every dimension or none",
            ));
        }
        let mut dims = [1usize; MAX_DIMS];
        dims[..counts.len()].copy_from_slice(counts);
        let mut wrap = [false; MAX_DIMS];
        wrap[..cyclic.len()].copy_from_slice(cyclic);
        Ok(Self {
            n_dim: counts.len(),
            counts: dims,
            resolution,
            cyclic: wrap,
        })
    }

    #[must_use]
    pub const fn n_dim(&self) -> usize {
        self.n_dim
    }

    #[must_use]
    pub const fn counts(&self) -> [usize; MAX_DIMS] {
        self.counts
    }

    #[must_use]
    pub const fn resolution(&self) -> f64 {
        self.resolution
    }

    #[must_use]
    pub const fn is_cyclic(&self, dim: usize) -> bool {
        dim < MAX_DIMS && self.cyclic[dim]
    }

    /// Side length of the whole grid in dimension `dim`.
    #[must_use]
    pub fn length(&self, dim: usize) -> f64 {
        if dim < self.n_dim {
            self.counts[dim] as f64 * self.resolution
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.counts.iter().product()
    }

    /// Volume of one voxel (length, area or volume depending on `n_dim`).
    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        self.resolution.powi(self.n_dim as i32)
    }

    #[must_use]
    pub fn contains(&self, voxel: Voxel) -> bool {
        (0..MAX_DIMS).all(|dim| voxel.0[dim] < self.counts[dim])
    }

    /// Flat array offset, dimension 0 varying fastest. Callers check bounds.
    #[inline]
    #[must_use]
    pub fn flat_index(&self, voxel: Voxel) -> usize {
        let [x, y, z] = voxel.0;
        x + self.counts[0] * (y + self.counts[1] * z)
    }

    /// Inverse of [`flat_index`](Self::flat_index).
    #[must_use]
    pub fn voxel_of(&self, flat: usize) -> Voxel {
        let x = flat % self.counts[0];
        let rest = flat / self.counts[0];
        let y = rest % self.counts[1];
        let z = rest / self.counts[1];
        Voxel([x, y, z])
    }

    /// Voxel containing a spatial position, or `None` outside the grid.
    #[must_use]
    pub fn voxel_at_position(&self, position: [f64; MAX_DIMS]) -> Option<Voxel> {
        let mut coords = [0usize; MAX_DIMS];
        for dim in 0..self.n_dim {
            let cell = (position[dim] / self.resolution).floor();
            if !cell.is_finite() || cell < 0.0 || cell >= self.counts[dim] as f64 {
                return None;
            }
            coords[dim] = cell as usize;
        }
        Some(Voxel(coords))
    }

    /// Centre of a voxel in spatial coordinates.
    #[must_use]
    pub fn voxel_center(&self, voxel: Voxel) -> [f64; MAX_DIMS] {
        let mut center = [0.0; MAX_DIMS];
        for (dim, slot) in center.iter_mut().enumerate().take(self.n_dim) {
            *slot = (voxel.0[dim] as f64 + 0.5) * self.resolution;
        }
        center
    }
}

type FaceMethods = [[Arc<dyn GridMethod>; 2]; MAX_DIMS];

/// Voxel container holding the arrays of one solute.
#[derive(Clone)]
pub struct SpatialGrid {
    name: String,
    topology: GridTopology,
    arrays: [Option<Vec<f64>>; ArrayType::ALL.len()],
    boundaries: FaceMethods,
}

impl fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allocated: Vec<ArrayType> = ArrayType::ALL
            .into_iter()
            .filter(|ty| self.arrays[ty.slot()].is_some())
            .collect();
        f.debug_struct("SpatialGrid")
            .field("name", &self.name)
            .field("topology", &self.topology)
            .field("arrays", &allocated)
            .finish()
    }
}

impl SpatialGrid {
    /// Create a grid with no arrays; every face starts as zero-flux.
    pub fn new(name: impl Into<String>, topology: GridTopology) -> Self {
        let zero: Arc<dyn GridMethod> = Arc::new(ZeroFlux);
        let boundaries: FaceMethods = std::array::from_fn(|_| [zero.clone(), zero.clone()]);
        Self {
            name: name.into(),
            topology,
            arrays: Default::default(),
            boundaries,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn topology(&self) -> &GridTopology {
        &self.topology
    }

    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.topology.voxel_count()
    }

    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        self.topology.voxel_volume()
    }

    /// Allocate `ty` (or reset it) so that every voxel holds `initial`.
    pub fn new_array(&mut self, ty: ArrayType, initial: f64) {
        let len = self.voxel_count();
        let slot = &mut self.arrays[ty.slot()];
        if let Some(values) = slot {
            values.clear();
            values.resize(len, initial);
        } else {
            *slot = Some(vec![initial; len]);
        }
    }

    #[must_use]
    pub fn has_array(&self, ty: ArrayType) -> bool {
        self.arrays[ty.slot()].is_some()
    }

    pub fn array(&self, ty: ArrayType) -> Result<&[f64], GridError> {
        self.arrays[ty.slot()]
            .as_deref()
            .ok_or_else(|| self.missing(ty))
    }

    pub fn array_mut(&mut self, ty: ArrayType) -> Result<&mut [f64], GridError> {
        match self.arrays[ty.slot()].as_deref_mut() {
            Some(values) => Ok(values),
            None => Err(GridError::MissingArray {
                grid: self.name.clone(),
                array: ty,
            }),
        }
    }

    fn missing(&self, array: ArrayType) -> GridError {
        GridError::MissingArray {
            grid: self.name.clone(),
            array,
        }
    }

    fn checked_index(&self, voxel: Voxel) -> Result<usize, GridError> {
        if self.topology.contains(voxel) {
            Ok(self.topology.flat_index(voxel))
        } else {
            Err(GridError::OutOfRange {
                grid: self.name.clone(),
                voxel,
            })
        }
    }

    /// Flat offset of `voxel`, failing when it lies outside the grid.
    pub fn flat_index(&self, voxel: Voxel) -> Result<usize, GridError> {
        self.checked_index(voxel)
    }

    pub fn value_at(&self, ty: ArrayType, voxel: Voxel) -> Result<f64, GridError> {
        let idx = self.checked_index(voxel)?;
        Ok(self.array(ty)?[idx])
    }

    pub fn set_value_at(&mut self, ty: ArrayType, voxel: Voxel, value: f64) -> Result<(), GridError> {
        let idx = self.checked_index(voxel)?;
        self.array_mut(ty)?[idx] = value;
        Ok(())
    }

    pub fn add_value_at(&mut self, ty: ArrayType, voxel: Voxel, value: f64) -> Result<(), GridError> {
        let idx = self.checked_index(voxel)?;
        self.array_mut(ty)?[idx] += value;
        Ok(())
    }

    pub fn times_value_at(
        &mut self,
        ty: ArrayType,
        voxel: Voxel,
        factor: f64,
    ) -> Result<(), GridError> {
        let idx = self.checked_index(voxel)?;
        self.array_mut(ty)?[idx] *= factor;
        Ok(())
    }

    pub fn set_all(&mut self, ty: ArrayType, value: f64) -> Result<(), GridError> {
        self.array_mut(ty)?.fill(value);
        Ok(())
    }

    pub fn add_all(&mut self, ty: ArrayType, value: f64) -> Result<(), GridError> {
        for cell in self.array_mut(ty)? {
            *cell += value;
        }
        Ok(())
    }

    pub fn times_all(&mut self, ty: ArrayType, factor: f64) -> Result<(), GridError> {
        for cell in self.array_mut(ty)? {
            *cell *= factor;
        }
        Ok(())
    }

    /// Whether `voxel` belongs to the solved domain. Grids without a mask include everything.
    #[must_use]
    pub fn in_domain(&self, voxel: Voxel) -> bool {
        if !self.topology.contains(voxel) {
            return false;
        }
        match &self.arrays[ArrayType::Domain.slot()] {
            Some(mask) => mask[self.topology.flat_index(voxel)] != 0.0,
            None => true,
        }
    }

    /// Sum of `ty` over domain voxels.
    pub fn total(&self, ty: ArrayType) -> Result<f64, GridError> {
        let values = self.array(ty)?;
        Ok(self
            .iter_domain()
            .map(|voxel| values[self.topology.flat_index(voxel)])
            .sum())
    }

    /// Total amount held in `ty`, i.e. the sum scaled by the voxel volume.
    pub fn total_amount(&self, ty: ArrayType) -> Result<f64, GridError> {
        Ok(self.total(ty)? * self.voxel_volume())
    }

    /// Mean of `ty` over domain voxels; zero for an empty domain.
    pub fn average(&self, ty: ArrayType) -> Result<f64, GridError> {
        let count = self.iter_domain().count();
        if count == 0 {
            return Ok(0.0);
        }
        Ok(self.total(ty)? / count as f64)
    }

    /// Largest value of `ty` over domain voxels.
    pub fn max(&self, ty: ArrayType) -> Result<Option<f64>, GridError> {
        let values = self.array(ty)?;
        Ok(self
            .iter_domain()
            .map(|voxel| OrderedFloat(values[self.topology.flat_index(voxel)]))
            .max()
            .map(OrderedFloat::into_inner))
    }

    /// Smallest value of `ty` over domain voxels.
    pub fn min(&self, ty: ArrayType) -> Result<Option<f64>, GridError> {
        let values = self.array(ty)?;
        Ok(self
            .iter_domain()
            .map(|voxel| OrderedFloat(values[self.topology.flat_index(voxel)]))
            .min()
            .map(OrderedFloat::into_inner))
    }

    /// Install the boundary method used when neighbour iteration crosses `face`.
    pub fn set_boundary(&mut self, face: Face, method: Arc<dyn GridMethod>) -> Result<(), GridError> {
        if face.dim >= self.topology.n_dim() {
            return Err(GridError::NoSuchDimension {
                grid: self.name.clone(),
                dim: face.dim,
            });
        }
        self.boundaries[face.dim][face.side.slot()] = method;
        Ok(())
    }

    #[must_use]
    pub fn boundary(&self, face: Face) -> Option<&dyn GridMethod> {
        self.boundaries
            .get(face.dim)
            .map(|sides| sides[face.side.slot()].as_ref())
    }

    /// Iterate every voxel of the grid.
    #[must_use]
    pub fn iter_voxels(&self) -> VoxelIter {
        VoxelIter {
            topology: self.topology.clone(),
            cursor: 0,
        }
    }

    /// Iterate voxels whose `Domain` value is non-zero.
    pub fn iter_domain(&self) -> impl Iterator<Item = Voxel> + '_ {
        self.iter_voxels().filter(move |voxel| self.in_domain(*voxel))
    }

    /// Iterate the face neighbours of `center`.
    #[must_use]
    pub fn neighbors(&self, center: Voxel) -> NeighborIter<'_> {
        NeighborIter {
            grid: self,
            center,
            cursor: 0,
        }
    }

    /// Diffusive flux into `current` from the adjacent interior voxel `neighbor`.
    ///
    /// Uses the harmonic mean of both diffusivities; neighbours outside the
    /// domain mask exchange nothing.
    pub fn flux_with_neighbor(&self, current: Voxel, neighbor: Voxel) -> Result<f64, GridError> {
        let here = self.checked_index(current)?;
        let there = self.checked_index(neighbor)?;
        if !self.in_domain(neighbor) {
            return Ok(0.0);
        }
        let concn = self.array(ArrayType::Concn)?;
        let diffusivity = self.array(ArrayType::Diffusivity)?;
        let mean = harmonic_mean(diffusivity[here], diffusivity[there]);
        let res = self.topology.resolution();
        Ok(mean * (concn[there] - concn[here]) / (res * res))
    }
}

/// Harmonic mean of two non-negative values; zero when either is zero.
#[must_use]
pub fn harmonic_mean(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum == 0.0 {
        0.0
    } else {
        2.0 * a * b / sum
    }
}

/// Restartable iterator over every voxel of a grid, dimension 0 varying fastest.
#[derive(Debug, Clone)]
pub struct VoxelIter {
    topology: GridTopology,
    cursor: usize,
}

impl VoxelIter {
    /// Rewind to the first voxel.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Whether another voxel remains.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cursor < self.topology.voxel_count()
    }
}

impl Iterator for VoxelIter {
    type Item = Voxel;

    fn next(&mut self) -> Option<Voxel> {
        if !self.is_valid() {
            return None;
        }
        let voxel = self.topology.voxel_of(self.cursor);
        self.cursor += 1;
        Some(voxel)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.topology.voxel_count().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for VoxelIter {}

/// Result of stepping from a voxel to one of its face neighbours.
#[derive(Debug, Clone, Copy)]
pub enum Neighbor<'g> {
    /// The neighbour exists inside the grid (after cyclic wrapping).
    Interior(Voxel),
    /// The step crossed a domain face; flux comes from its grid method.
    Boundary {
        face: Face,
        method: &'g dyn GridMethod,
    },
}

/// Face neighbours of one voxel, min side before max side for each dimension.
#[derive(Debug, Clone)]
pub struct NeighborIter<'g> {
    grid: &'g SpatialGrid,
    center: Voxel,
    cursor: usize,
}

impl<'g> Iterator for NeighborIter<'g> {
    type Item = Neighbor<'g>;

    fn next(&mut self) -> Option<Neighbor<'g>> {
        let topology = &self.grid.topology;
        if self.cursor >= 2 * topology.n_dim() {
            return None;
        }
        let dim = self.cursor / 2;
        let side = if self.cursor % 2 == 0 { Side::Min } else { Side::Max };
        self.cursor += 1;

        let count = topology.counts[dim];
        let coord = self.center.0[dim];
        let stepped = match side {
            Side::Min if coord == 0 => None,
            Side::Min => Some(coord - 1),
            Side::Max if coord + 1 >= count => None,
            Side::Max => Some(coord + 1),
        };
        let wrapped = match stepped {
            Some(value) => Some(value),
            None if topology.is_cyclic(dim) => Some(match side {
                Side::Min => count - 1,
                Side::Max => 0,
            }),
            None => None,
        };
        Some(match wrapped {
            Some(value) => {
                let mut coords = self.center.0;
                coords[dim] = value;
                Neighbor::Interior(Voxel(coords))
            }
            None => Neighbor::Boundary {
                face: Face::new(dim, side),
                method: self.grid.boundaries[dim][side.slot()].as_ref(),
            },
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (2 * self.grid.topology.n_dim()).saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}
