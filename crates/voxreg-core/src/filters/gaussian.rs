use ndarray::{Array3, Array4};
use rayon::prelude::*;

use crate::consts::PARALLEL_VOXEL_THRESHOLD;

/// Separable Gaussian smoothing of a 4D array, one pass per spatial axis.
/// Volumes along the 4th axis are smoothed independently. `sigma` is given
/// per axis in voxels; an axis with sigma <= 0 is left untouched.
pub fn gaussian_smooth(data: &Array4<f32>, sigma: [f64; 3]) -> Array4<f32> {
    let mut out = data.clone();
    for axis in 0..3 {
        if sigma[axis] > 0.0 {
            let kernel = make_gaussian_kernel(sigma[axis]);
            if kernel.len() > 1 {
                out = convolve_axis(&out, &kernel, axis);
            }
        }
    }
    out
}

fn make_gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0f32; size];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 - radius as f64;
        *k = (-x * x / s2).exp() as f32;
        sum += *k;
    }

    for v in &mut kernel {
        *v /= sum;
    }

    kernel
}

/// Edge-clamped 1D convolution along one spatial axis, parallel over z slabs.
fn convolve_axis(data: &Array4<f32>, kernel: &[f32], axis: usize) -> Array4<f32> {
    let (nx, ny, nz, nv) = data.dim();
    let radius = kernel.len() / 2;

    let slab = |z: usize| -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((nx, ny, nv));
        for x in 0..nx {
            for y in 0..ny {
                for v in 0..nv {
                    let mut sum = 0.0f32;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let off = ki as isize - radius as isize;
                        let (sx, sy, sz) = match axis {
                            0 => ((x as isize + off).clamp(0, nx as isize - 1) as usize, y, z),
                            1 => (x, (y as isize + off).clamp(0, ny as isize - 1) as usize, z),
                            _ => (x, y, (z as isize + off).clamp(0, nz as isize - 1) as usize),
                        };
                        sum += data[[sx, sy, sz, v]] * kv;
                    }
                    out[[x, y, v]] = sum;
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

    let mut result = Array4::<f32>::zeros((nx, ny, nz, nv));
    for (z, slab) in slabs.into_iter().enumerate() {
        for x in 0..nx {
            for y in 0..ny {
                for v in 0..nv {
                    result[[x, y, z, v]] = slab[[x, y, v]];
                }
            }
        }
    }
    result
}
