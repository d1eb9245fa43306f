use rayon::prelude::*;

use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::interp;
use crate::metric::robust::RobustEstimator;
use crate::metric::MetricContext;
use crate::transform::linear::LinearTransform;
use crate::transform::model::{ParamSpace, MAX_PARAMS};

/// Mean intensity difference cost over the overlap region. With no estimator
/// the penalty is the squared difference; a robust estimator replaces it with
/// its own penalty. Multi-volume images sum the penalty across volumes.
///
/// The cost is normalised by the number of contributing voxels, so shrinking
/// the overlap cannot masquerade as an improvement; an empty overlap is
/// infinitely bad.
pub fn cost_gradient(
    ctx: &MetricContext<'_>,
    transform: &LinearTransform,
    params: &ParamSpace,
    estimator: Option<RobustEstimator>,
) -> (f64, [f64; MAX_PARAMS]) {
    let [nx, ny, nz] = ctx.target.shape();
    let nv = ctx.target.volumes();

    let slab = |z: usize| -> (f64, [f64; MAX_PARAMS], usize) {
        let mut cost = 0.0f64;
        let mut grad = [0.0f64; MAX_PARAMS];
        let mut count = 0usize;
        let mut jac = [[0.0f64; 3]; MAX_PARAMS];

        for y in 0..ny {
            for x in 0..nx {
                let index = x + nx * (y + ny * z);
                if (index + ctx.phase) % ctx.stride != 0 {
                    continue;
                }
                if !ctx.target_included(x, y, z) {
                    continue;
                }

                let p = [
                    x as f64 / ctx.scale,
                    y as f64 / ctx.scale,
                    z as f64 / ctx.scale,
                ];
                let q_full = transform.apply(p);
                let q = [
                    q_full[0] * ctx.scale,
                    q_full[1] * ctx.scale,
                    q_full[2] * ctx.scale,
                ];
                if !interp::in_bounds(&ctx.moving.data, q[0], q[1], q[2]) {
                    continue;
                }
                if !ctx.moving_included(q) {
                    continue;
                }

                params.fill_point_jacobian(p, &mut jac);

                for v in 0..nv {
                    let m = interp::trilinear(&ctx.moving.data, v, q[0], q[1], q[2]) as f64;
                    let t = ctx.target.data[[x, y, z, v]] as f64;
                    let d = m - t;

                    let (rho, psi) = match estimator {
                        None => (d * d, 2.0 * d),
                        Some(est) => (est.rho(d), est.psi(d)),
                    };
                    cost += rho;

                    let g = interp::gradient(&ctx.moving.data, v, q[0], q[1], q[2]);
                    // Gradient per full-resolution voxel of displacement.
                    let g = [g[0] * ctx.scale, g[1] * ctx.scale, g[2] * ctx.scale];
                    for (gk, jk) in grad.iter_mut().zip(jac.iter()).take(params.num_params()) {
                        *gk += psi * (g[0] * jk[0] + g[1] * jk[1] + g[2] * jk[2]);
                    }
                }
                count += 1;
            }
        }
        (cost, grad, count)
    };

    let (cost, grad, count) = reduce_slabs(nx * ny * nz, nz, slab);
    normalise(cost, grad, count)
}

/// Cost only, for line searches and the global rotation search.
pub fn cost(
    ctx: &MetricContext<'_>,
    transform: &LinearTransform,
    estimator: Option<RobustEstimator>,
) -> f64 {
    let [nx, ny, nz] = ctx.target.shape();
    let nv = ctx.target.volumes();

    let slab = |z: usize| -> (f64, [f64; MAX_PARAMS], usize) {
        let mut cost = 0.0f64;
        let mut count = 0usize;

        for y in 0..ny {
            for x in 0..nx {
                let index = x + nx * (y + ny * z);
                if (index + ctx.phase) % ctx.stride != 0 {
                    continue;
                }
                if !ctx.target_included(x, y, z) {
                    continue;
                }

                let p = [
                    x as f64 / ctx.scale,
                    y as f64 / ctx.scale,
                    z as f64 / ctx.scale,
                ];
                let q_full = transform.apply(p);
                let q = [
                    q_full[0] * ctx.scale,
                    q_full[1] * ctx.scale,
                    q_full[2] * ctx.scale,
                ];
                if !interp::in_bounds(&ctx.moving.data, q[0], q[1], q[2]) {
                    continue;
                }
                if !ctx.moving_included(q) {
                    continue;
                }

                for v in 0..nv {
                    let m = interp::trilinear(&ctx.moving.data, v, q[0], q[1], q[2]) as f64;
                    let t = ctx.target.data[[x, y, z, v]] as f64;
                    let d = m - t;
                    cost += match estimator {
                        None => d * d,
                        Some(est) => est.rho(d),
                    };
                }
                count += 1;
            }
        }
        (cost, [0.0; MAX_PARAMS], count)
    };

    let (cost, _, count) = reduce_slabs(nx * ny * nz, nz, slab);
    if count == 0 {
        f64::INFINITY
    } else {
        cost / count as f64
    }
}

pub(crate) fn reduce_slabs<F>(
    voxels: usize,
    nz: usize,
    slab: F,
) -> (f64, [f64; MAX_PARAMS], usize)
where
    F: Fn(usize) -> (f64, [f64; MAX_PARAMS], usize) + Sync + Send,
{
    let combine = |mut a: (f64, [f64; MAX_PARAMS], usize), b: (f64, [f64; MAX_PARAMS], usize)| {
        a.0 += b.0;
        for (ga, gb) in a.1.iter_mut().zip(b.1.iter()) {
            *ga += gb;
        }
        a.2 += b.2;
        a
    };

    if voxels >= PARALLEL_VOXEL_THRESHOLD {
        (0..nz)
            .into_par_iter()
            .map(slab)
            .reduce(|| (0.0, [0.0; MAX_PARAMS], 0), combine)
    } else {
        (0..nz)
            .map(slab)
            .fold((0.0, [0.0; MAX_PARAMS], 0), combine)
    }
}

pub(crate) fn normalise(
    cost: f64,
    mut grad: [f64; MAX_PARAMS],
    count: usize,
) -> (f64, [f64; MAX_PARAMS]) {
    if count == 0 {
        return (f64::INFINITY, [0.0; MAX_PARAMS]);
    }
    let n = count as f64;
    for g in grad.iter_mut() {
        *g /= n;
    }
    (cost / n, grad)
}
