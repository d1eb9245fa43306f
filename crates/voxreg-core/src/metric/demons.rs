use ndarray::Array3;
use rayon::prelude::*;

use crate::consts::{DEMONS_MAX_UPDATE, PARALLEL_VOXEL_THRESHOLD};
use crate::interp;
use crate::volume::Volume;
use crate::warp::field::DisplacementField;

const DEMONS_DENOMINATOR_FLOOR: f64 = 1e-12;

/// Symmetric demons update from two images already warped onto the common
/// midway grid. Per voxel:
///
///   u = sum_v (w2_v - w1_v) g_v  /  sum_v (|g_v|^2 + (w2_v - w1_v)^2)
///
/// with g the mean of the two image gradients, so the update pushes both
/// images toward each other at equal rates. The magnitude is capped and the
/// result scaled by `grad_step`. Also returns the mean squared difference,
/// the cost the outer loop monitors for convergence.
pub fn update(w1: &Volume, w2: &Volume, grad_step: f64) -> (DisplacementField, f64) {
    let [nx, ny, nz] = w1.shape();
    let nv = w1.volumes();

    let slab = |z: usize| -> (Array3<f32>, f64) {
        let mut out = Array3::<f32>::zeros((nx, ny, 3));
        let mut cost = 0.0f64;

        for x in 0..nx {
            for y in 0..ny {
                let mut num = [0.0f64; 3];
                let mut denom = 0.0f64;

                for v in 0..nv {
                    let speed = (w2.data[[x, y, z, v]] - w1.data[[x, y, z, v]]) as f64;
                    let g1 = interp::gradient(&w1.data, v, x as f64, y as f64, z as f64);
                    let g2 = interp::gradient(&w2.data, v, x as f64, y as f64, z as f64);
                    let g = [
                        0.5 * (g1[0] + g2[0]),
                        0.5 * (g1[1] + g2[1]),
                        0.5 * (g1[2] + g2[2]),
                    ];

                    for i in 0..3 {
                        num[i] += speed * g[i];
                    }
                    denom += g[0] * g[0] + g[1] * g[1] + g[2] * g[2] + speed * speed;
                    cost += speed * speed;
                }

                if denom < DEMONS_DENOMINATOR_FLOOR {
                    continue;
                }
                let mut u = [num[0] / denom, num[1] / denom, num[2] / denom];
                let norm = (u[0] * u[0] + u[1] * u[1] + u[2] * u[2]).sqrt();
                if norm > DEMONS_MAX_UPDATE {
                    let s = DEMONS_MAX_UPDATE / norm;
                    u = [u[0] * s, u[1] * s, u[2] * s];
                }
                for i in 0..3 {
                    out[[x, y, i]] = (u[i] * grad_step) as f32;
                }
            }
        }
        (out, cost)
    };

    let slabs: Vec<(Array3<f32>, f64)> = if nx * ny * nz >= PARALLEL_VOXEL_THRESHOLD {
        (0..nz).into_par_iter().map(slab).collect()
    } else {
        (0..nz).map(slab).collect()
    };

    let mut field = DisplacementField::zeros([nx, ny, nz]);
    let mut cost = 0.0f64;
    for (z, (slab, slab_cost)) in slabs.into_iter().enumerate() {
        cost += slab_cost;
        for x in 0..nx {
            for y in 0..ny {
                for i in 0..3 {
                    field.data[[x, y, z, i]] = slab[[x, y, i]];
                }
            }
        }
    }

    let voxels = (nx * ny * nz) as f64;
    (field, cost / voxels)
}
