use ndarray::{Array3, Array4};
use rayon::prelude::*;

use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::filters::gaussian::gaussian_smooth;
use crate::interp;
use crate::transform::linear::LinearTransform;
use crate::volume::Volume;
use crate::warp::field::DisplacementField;

/// Build one resolution level: smooth with sigma = 0.5 / scale to suppress
/// aliasing, then sample on the coarse grid. Coarse voxel p maps to full
/// resolution coordinate p / scale. A scale of 1.0 returns the input as-is.
pub fn downsample(vol: &Volume, scale: f64) -> Volume {
    if scale >= 1.0 {
        return vol.clone();
    }

    let sigma = 0.5 / scale;
    let smoothed = gaussian_smooth(&vol.data, [sigma, sigma, sigma]);

    let [nx, ny, nz] = vol.shape();
    let shape = [
        ((nx as f64 * scale).round() as usize).max(1),
        ((ny as f64 * scale).round() as usize).max(1),
        ((nz as f64 * scale).round() as usize).max(1),
    ];
    let nv = vol.volumes();

    let data = sample_grid(shape, nv, |x, y, z, v| {
        interp::trilinear(
            &smoothed,
            v,
            x as f64 / scale,
            y as f64 / scale,
            z as f64 / scale,
        )
    });

    Volume {
        data,
        spacing: [
            vol.spacing[0] / scale,
            vol.spacing[1] / scale,
            vol.spacing[2] / scale,
        ],
        origin: vol.origin,
    }
}

/// Resample a moving image onto a target grid through a linear transform:
/// out(x) = src(T(x)), cubic interpolation, zero outside the source.
pub fn reslice(src: &Volume, shape: [usize; 3], transform: &LinearTransform) -> Volume {
    let nv = src.volumes();
    let data = sample_grid(shape, nv, |x, y, z, v| {
        let p = transform.apply([x as f64, y as f64, z as f64]);
        interp::cubic(&src.data, v, p[0], p[1], p[2])
    });

    Volume {
        data,
        spacing: src.spacing,
        origin: src.origin,
    }
}

/// Resample a moving image through a dense displacement field defined on the
/// output grid: out(x) = src(x + d(x)), cubic interpolation.
pub fn apply_warp(src: &Volume, field: &DisplacementField) -> Volume {
    let shape = field.shape();
    let nv = src.volumes();
    let data = sample_grid(shape, nv, |x, y, z, v| {
        let d = field.get(x, y, z);
        interp::cubic(
            &src.data,
            v,
            x as f64 + d[0],
            y as f64 + d[1],
            z as f64 + d[2],
        )
    });

    Volume {
        data,
        spacing: src.spacing,
        origin: src.origin,
    }
}

/// Fill a (shape, nv) array from a per-voxel sampler, parallel over z slabs.
pub(crate) fn sample_grid<F>(shape: [usize; 3], nv: usize, sampler: F) -> Array4<f32>
where
    F: Fn(usize, usize, usize, usize) -> f32 + Sync,
{
    let [nx, ny, nz] = shape;

    let slab = |z: usize| -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((nx, ny, nv));
        for x in 0..nx {
            for y in 0..ny {
                for v in 0..nv {
                    out[[x, y, v]] = sampler(x, y, z, v);
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
