use nalgebra::Matrix3;
use ndarray::{Array3, Array4};
use rayon::prelude::*;

use crate::consts::{FIELD_INVERSION_MAX_ITER, PARALLEL_VOXEL_THRESHOLD};
use crate::filters::gaussian::gaussian_smooth;
use crate::interp;

/// A dense displacement field in voxel units: voxel x maps to x + d(x).
/// Stored as a 4D array whose trailing axis holds the three components.
#[derive(Clone, Debug)]
pub struct DisplacementField {
    pub data: Array4<f32>,
}

impl DisplacementField {
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            data: Array4::zeros((shape[0], shape[1], shape[2], 3)),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (nx, ny, nz, _) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> [f64; 3] {
        [
            self.data[[x, y, z, 0]] as f64,
            self.data[[x, y, z, 1]] as f64,
            self.data[[x, y, z, 2]] as f64,
        ]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, d: [f64; 3]) {
        self.data[[x, y, z, 0]] = d[0] as f32;
        self.data[[x, y, z, 1]] = d[1] as f32;
        self.data[[x, y, z, 2]] = d[2] as f32;
    }

    /// Trilinear sample with edge-clamped coordinates, so the displacement
    /// extends constantly beyond the grid rather than dropping to zero.
    pub fn sample(&self, p: [f64; 3]) -> [f64; 3] {
        let [nx, ny, nz] = self.shape();
        let x = p[0].clamp(0.0, nx as f64 - 1.0);
        let y = p[1].clamp(0.0, ny as f64 - 1.0);
        let z = p[2].clamp(0.0, nz as f64 - 1.0);
        [
            interp::trilinear(&self.data, 0, x, y, z) as f64,
            interp::trilinear(&self.data, 1, x, y, z) as f64,
            interp::trilinear(&self.data, 2, x, y, z) as f64,
        ]
    }

    /// Compose an update into this field: the result maps
    /// x -> x + u(x) + d(x + u(x)).
    pub fn compose(&self, update: &DisplacementField) -> DisplacementField {
        fill_field(self.shape(), |x, y, z| {
            let u = update.get(x, y, z);
            let d = self.sample([x as f64 + u[0], y as f64 + u[1], z as f64 + u[2]]);
            [u[0] + d[0], u[1] + d[1], u[2] + d[2]]
        })
    }

    pub fn smoothed(&self, sigma: f64) -> DisplacementField {
        if sigma <= 0.0 {
            return self.clone();
        }
        DisplacementField {
            data: gaussian_smooth(&self.data, [sigma, sigma, sigma]),
        }
    }

    /// Fixed-point inverse: iterate d_inv(x) <- -d(x + d_inv(x)) from a warm
    /// start until the largest per-voxel change drops below `tolerance`.
    pub fn invert(&self, warm_start: &DisplacementField, tolerance: f64) -> DisplacementField {
        let [nx, ny, nz] = self.shape();
        let mut inv = warm_start.clone();

        for _ in 0..FIELD_INVERSION_MAX_ITER {
            let slab = |z: usize| -> (Array3<f32>, f64) {
                let mut out = Array3::<f32>::zeros((nx, ny, 3));
                let mut max_change = 0.0f64;
                for x in 0..nx {
                    for y in 0..ny {
                        let cur = inv.get(x, y, z);
                        let d = self.sample([
                            x as f64 + cur[0],
                            y as f64 + cur[1],
                            z as f64 + cur[2],
                        ]);
                        let new = [-d[0], -d[1], -d[2]];
                        let change = ((new[0] - cur[0]).powi(2)
                            + (new[1] - cur[1]).powi(2)
                            + (new[2] - cur[2]).powi(2))
                        .sqrt();
                        max_change = max_change.max(change);
                        for c in 0..3 {
                            out[[x, y, c]] = new[c] as f32;
                        }
                    }
                }
                (out, max_change)
            };

            let slabs: Vec<(Array3<f32>, f64)> = if nx * ny * nz >= PARALLEL_VOXEL_THRESHOLD {
                (0..nz).into_par_iter().map(slab).collect()
            } else {
                (0..nz).map(slab).collect()
            };

            let mut next = DisplacementField::zeros([nx, ny, nz]);
            let mut max_change = 0.0f64;
            for (z, (slab, change)) in slabs.into_iter().enumerate() {
                max_change = max_change.max(change);
                for x in 0..nx {
                    for y in 0..ny {
                        for c in 0..3 {
                            next.data[[x, y, z, c]] = slab[[x, y, c]];
                        }
                    }
                }
            }
            inv = next;
            if max_change < tolerance {
                break;
            }
        }
        inv
    }

    /// Resample onto a finer grid, rescaling the displacement magnitudes by
    /// the grid ratio so the field stays expressed in its own voxel units.
    pub fn upsample(&self, new_shape: [usize; 3], ratio: f64) -> DisplacementField {
        fill_field(new_shape, |x, y, z| {
            let d = self.sample([x as f64 / ratio, y as f64 / ratio, z as f64 / ratio]);
            [d[0] * ratio, d[1] * ratio, d[2] * ratio]
        })
    }

    /// Jacobian of the deformation x + d(x) at a voxel, central differences
    /// with edge clamping.
    pub fn jacobian(&self, x: usize, y: usize, z: usize) -> Matrix3<f64> {
        let [nx, ny, nz] = self.shape();
        let mut j = Matrix3::identity();

        let diff = |a0: [f64; 3], a1: [f64; 3], h: f64| {
            [
                (a1[0] - a0[0]) / h,
                (a1[1] - a0[1]) / h,
                (a1[2] - a0[2]) / h,
            ]
        };

        let axes: [(usize, usize); 3] = [(x, nx), (y, ny), (z, nz)];
        for (axis, &(idx, n)) in axes.iter().enumerate() {
            let lo = idx.saturating_sub(1);
            let hi = (idx + 1).min(n - 1);
            let h = (hi - lo).max(1) as f64;
            let (d0, d1) = match axis {
                0 => (self.get(lo, y, z), self.get(hi, y, z)),
                1 => (self.get(x, lo, z), self.get(x, hi, z)),
                _ => (self.get(x, y, lo), self.get(x, y, hi)),
            };
            let g = diff(d0, d1, h);
            for row in 0..3 {
                j[(row, axis)] += g[row];
            }
        }
        j
    }

    pub fn negated(&self) -> DisplacementField {
        DisplacementField {
            data: self.data.mapv(|v| -v),
        }
    }

    pub fn max_magnitude(&self) -> f64 {
        let [nx, ny, nz] = self.shape();
        let mut max = 0.0f64;
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let d = self.get(x, y, z);
                    max = max.max((d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt());
                }
            }
        }
        max
    }
}

/// Build a field from a per-voxel displacement closure, parallel over z slabs.
pub(crate) fn fill_field<F>(shape: [usize; 3], f: F) -> DisplacementField
where
    F: Fn(usize, usize, usize) -> [f64; 3] + Sync,
{
    let [nx, ny, nz] = shape;

    let slab = |z: usize| -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((nx, ny, 3));
        for x in 0..nx {
            for y in 0..ny {
                let d = f(x, y, z);
                for c in 0..3 {
                    out[[x, y, c]] = d[c] as f32;
                }
            }
        }
        out
    };

    let slabs: Vec<Array3<f32>> = if nx * ny * nz >= PARALLEL_VOXEL_THRESHOLD {
        (0..nz).into_par_iter().map(slab).collect()
    } else {
        (0..nz).map(slab).collect()
    };

    let mut field = DisplacementField::zeros(shape);
    for (z, slab) in slabs.into_iter().enumerate() {
        for x in 0..nx {
            for y in 0..ny {
                for c in 0..3 {
                    field.data[[x, y, z, c]] = slab[[x, y, c]];
                }
            }
        }
    }
    field
}
