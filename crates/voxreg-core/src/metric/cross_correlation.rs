use ndarray::Array3;

use crate::interp;
use crate::metric::mean_squared::{normalise, reduce_slabs};
use crate::metric::MetricContext;
use crate::transform::linear::LinearTransform;
use crate::transform::model::{ParamSpace, MAX_PARAMS};

const VARIANCE_FLOOR: f64 = 1e-12;

/// Locally windowed normalised cross-correlation. The cost at each voxel is
/// -A^2 / (B C) computed over a cubic window, where A is the local intensity
/// covariance between the warped moving image and the target, and B, C are
/// the local variances. Flat windows contribute nothing.
///
/// The warped moving image is materialised once per evaluation; the gradient
/// uses the standard local-correlation derivative at the window centre,
/// chained through the transform Jacobian.
pub fn cost_gradient(
    ctx: &MetricContext<'_>,
    transform: &LinearTransform,
    params: &ParamSpace,
    extent: usize,
) -> (f64, [f64; MAX_PARAMS]) {
    let [nx, ny, nz] = ctx.target.shape();
    let (warped, valid) = materialise(ctx, transform);
    let radius = extent / 2;

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
                if valid[[x, y, z]] == 0 {
                    continue;
                }

                let Some(w) = window_stats(ctx, &warped, &valid, [x, y, z], radius) else {
                    continue;
                };

                cost += -(w.a * w.a) / (w.b * w.c);
                count += 1;

                let i_c = warped[[x, y, z]] as f64 - w.i_mean;
                let j_c = ctx.target.data[[x, y, z, 0]] as f64 - w.j_mean;
                let dcost = -2.0 * w.a / (w.b * w.c) * (j_c - (w.a / w.b) * i_c);

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
                let g = interp::gradient(&ctx.moving.data, 0, q[0], q[1], q[2]);
                let g = [g[0] * ctx.scale, g[1] * ctx.scale, g[2] * ctx.scale];

                params.fill_point_jacobian(p, &mut jac);
                for (gk, jk) in grad.iter_mut().zip(jac.iter()).take(params.num_params()) {
                    *gk += dcost * (g[0] * jk[0] + g[1] * jk[1] + g[2] * jk[2]);
                }
            }
        }
        (cost, grad, count)
    };

    let (cost, grad, count) = reduce_slabs(nx * ny * nz, nz, slab);
    normalise(cost, grad, count)
}

pub fn cost(ctx: &MetricContext<'_>, transform: &LinearTransform, extent: usize) -> f64 {
    let [nx, ny, nz] = ctx.target.shape();
    let (warped, valid) = materialise(ctx, transform);
    let radius = extent / 2;

    let slab = |z: usize| -> (f64, [f64; MAX_PARAMS], usize) {
        let mut cost = 0.0f64;
        let mut count = 0usize;

        for y in 0..ny {
            for x in 0..nx {
                let index = x + nx * (y + ny * z);
                if (index + ctx.phase) % ctx.stride != 0 {
                    continue;
                }
                if valid[[x, y, z]] == 0 {
                    continue;
                }
                if let Some(w) = window_stats(ctx, &warped, &valid, [x, y, z], radius) {
                    cost += -(w.a * w.a) / (w.b * w.c);
                    count += 1;
                }
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

struct WindowStats {
    i_mean: f64,
    j_mean: f64,
    a: f64,
    b: f64,
    c: f64,
}

fn window_stats(
    ctx: &MetricContext<'_>,
    warped: &Array3<f32>,
    valid: &Array3<u8>,
    centre: [usize; 3],
    radius: usize,
) -> Option<WindowStats> {
    let [nx, ny, nz] = ctx.target.shape();
    let [cx, cy, cz] = centre;

    let x0 = cx.saturating_sub(radius);
    let y0 = cy.saturating_sub(radius);
    let z0 = cz.saturating_sub(radius);
    let x1 = (cx + radius).min(nx - 1);
    let y1 = (cy + radius).min(ny - 1);
    let z1 = (cz + radius).min(nz - 1);

    let mut i_sum = 0.0f64;
    let mut j_sum = 0.0f64;
    let mut n = 0usize;
    for x in x0..=x1 {
        for y in y0..=y1 {
            for z in z0..=z1 {
                if valid[[x, y, z]] == 0 {
                    continue;
                }
                i_sum += warped[[x, y, z]] as f64;
                j_sum += ctx.target.data[[x, y, z, 0]] as f64;
                n += 1;
            }
        }
    }
    if n < 2 {
        return None;
    }

    let i_mean = i_sum / n as f64;
    let j_mean = j_sum / n as f64;
    let mut a = 0.0f64;
    let mut b = 0.0f64;
    let mut c = 0.0f64;
    for x in x0..=x1 {
        for y in y0..=y1 {
            for z in z0..=z1 {
                if valid[[x, y, z]] == 0 {
                    continue;
                }
                let di = warped[[x, y, z]] as f64 - i_mean;
                let dj = ctx.target.data[[x, y, z, 0]] as f64 - j_mean;
                a += di * dj;
                b += di * di;
                c += dj * dj;
            }
        }
    }
    if b < VARIANCE_FLOOR || c < VARIANCE_FLOOR {
        return None;
    }
    Some(WindowStats {
        i_mean,
        j_mean,
        a,
        b,
        c,
    })
}

/// Warp the moving image onto the target level grid, recording which voxels
/// fall inside the moving image (and any masks).
fn materialise(
    ctx: &MetricContext<'_>,
    transform: &LinearTransform,
) -> (Array3<f32>, Array3<u8>) {
    let [nx, ny, nz] = ctx.target.shape();
    let mut warped = Array3::<f32>::zeros((nx, ny, nz));
    let mut valid = Array3::<u8>::zeros((nx, ny, nz));

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
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
                warped[[x, y, z]] = interp::trilinear(&ctx.moving.data, 0, q[0], q[1], q[2]);
                valid[[x, y, z]] = 1;
            }
        }
    }
    (warped, valid)
}
