//! Sphere geometry and sub-voxel sampling of agent bodies onto a grid.

use std::f64::consts::PI;

use crate::MAX_DIMS;
use crate::agent::{Body, DistributionMap};
use crate::grid::GridTopology;

/// Volume of a sphere in `n_dim` dimensions (length, area or volume).
#[must_use]
pub fn sphere_volume(radius: f64, n_dim: usize) -> f64 {
    match n_dim {
        1 => 2.0 * radius,
        2 => PI * radius * radius,
        _ => 4.0 / 3.0 * PI * radius.powi(3),
    }
}

/// Inverse of [`sphere_volume`].
#[must_use]
pub fn radius_from_volume(volume: f64, n_dim: usize) -> f64 {
    let volume = volume.max(0.0);
    match n_dim {
        1 => volume / 2.0,
        2 => (volume / PI).sqrt(),
        _ => (3.0 * volume / (4.0 * PI)).cbrt(),
    }
}

/// Map a spherical body onto voxels by sampling `subvoxels` points per voxel edge.
///
/// Every sample inside the sphere adds its sub-volume to the voxel holding it.
/// Bodies too small to catch any sample are assigned whole to the voxel
/// containing their centre. Samples beyond a non-cyclic edge are dropped.
#[must_use]
pub fn sphere_distribution(topology: &GridTopology, body: &Body, subvoxels: usize) -> DistributionMap {
    let n_dim = topology.n_dim();
    let step = topology.resolution() / subvoxels.max(1) as f64;
    let sample_volume = step.powi(n_dim as i32);
    let radius_sq = body.radius * body.radius;

    let mut map = DistributionMap::new();
    if let Some((lo, hi)) = sample_range(topology, body, step, subvoxels.max(1)) {
        let mut idx = lo;
        'samples: loop {
            let mut point = body.center;
            let mut dist_sq = 0.0;
            for dim in 0..n_dim {
                point[dim] = (idx[dim] as f64 + 0.5) * step;
                let delta = point[dim] - body.center[dim];
                dist_sq += delta * delta;
            }
            if dist_sq <= radius_sq {
                if let Some(voxel) = topology.voxel_at_position(wrap(topology, point)) {
                    map.add(voxel, sample_volume);
                }
            }

            let mut dim = 0;
            loop {
                if dim == n_dim {
                    break 'samples;
                }
                idx[dim] += 1;
                if idx[dim] <= hi[dim] {
                    break;
                }
                idx[dim] = lo[dim];
                dim += 1;
            }
        }
    }

    if map.is_empty() {
        if let Some(voxel) = topology.voxel_at_position(wrap(topology, body.center)) {
            map.add(voxel, sphere_volume(body.radius, n_dim));
        }
    }
    map
}

/// Inclusive sample indices covering `body`, clipped to the grid along
/// non-cyclic dimensions; `None` when the body lies entirely outside.
fn sample_range(
    topology: &GridTopology,
    body: &Body,
    step: f64,
    subvoxels: usize,
) -> Option<([i64; MAX_DIMS], [i64; MAX_DIMS])> {
    let counts = topology.counts();
    let mut lo = [0i64; MAX_DIMS];
    let mut hi = [0i64; MAX_DIMS];
    for dim in 0..topology.n_dim() {
        lo[dim] = ((body.center[dim] - body.radius) / step).floor() as i64;
        hi[dim] = ((body.center[dim] + body.radius) / step).floor() as i64;
        if !topology.is_cyclic(dim) {
            lo[dim] = lo[dim].max(0);
            hi[dim] = hi[dim].min((counts[dim] * subvoxels) as i64 - 1);
        }
        if lo[dim] > hi[dim] {
            return None;
        }
    }
    Some((lo, hi))
}

fn wrap(topology: &GridTopology, mut point: [f64; MAX_DIMS]) -> [f64; MAX_DIMS] {
    for (dim, coord) in point.iter_mut().enumerate().take(topology.n_dim()) {
        if topology.is_cyclic(dim) {
            *coord = coord.rem_euclid(topology.length(dim));
        }
    }
    point
}
