use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::transform::linear::LinearTransform;
use crate::transform::model::polar_rotation;
use crate::volume::Volume;

/// How the linear stage seeds its starting transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformInit {
    #[default]
    /// Align intensity centroids; rotation centre at the target centroid.
    Mass,
    /// Align grid centres, ignoring intensities.
    Geometric,
    /// Align centroids and principal axes of the second intensity moments.
    Moments,
    /// Identity; the caller supplies any starting transform explicitly.
    None,
}

/// Compute the initial transform mapping target voxel coordinates into the
/// moving image. Masks restrict which voxels contribute to the moments.
pub fn initialise(
    init: TransformInit,
    moving: &Volume,
    target: &Volume,
    mask_moving: Option<&Volume>,
    mask_target: Option<&Volume>,
) -> Result<LinearTransform> {
    match init {
        TransformInit::None => Ok(LinearTransform::identity()),
        TransformInit::Geometric => {
            let c1 = grid_centre(moving);
            let c2 = grid_centre(target);
            LinearTransform::new(Matrix3::identity(), c1 - c2, c2)
        }
        TransformInit::Mass => {
            let c1 = centroid(moving, mask_moving);
            let c2 = centroid(target, mask_target);
            LinearTransform::new(Matrix3::identity(), c1 - c2, c2)
        }
        TransformInit::Moments => {
            let c1 = centroid(moving, mask_moving);
            let c2 = centroid(target, mask_target);
            let m1 = second_moments(moving, mask_moving, &c1);
            let m2 = second_moments(target, mask_target, &c2);
            let rotation = principal_axes_rotation(&m1, &m2);
            LinearTransform::new(rotation, c1 - c2, c2)
        }
    }
}

fn grid_centre(vol: &Volume) -> Vector3<f64> {
    let [nx, ny, nz] = vol.shape();
    Vector3::new(
        (nx as f64 - 1.0) / 2.0,
        (ny as f64 - 1.0) / 2.0,
        (nz as f64 - 1.0) / 2.0,
    )
}

/// Intensity centroid of the first volume. Falls back to the grid centre
/// when the (masked) image carries no intensity at all.
fn centroid(vol: &Volume, mask: Option<&Volume>) -> Vector3<f64> {
    let [nx, ny, nz] = vol.shape();
    let mut sum = Vector3::zeros();
    let mut weight = 0.0f64;

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                if let Some(m) = mask {
                    if !m.mask_includes(x, y, z) {
                        continue;
                    }
                }
                let w = vol.data[[x, y, z, 0]].abs() as f64;
                sum += w * Vector3::new(x as f64, y as f64, z as f64);
                weight += w;
            }
        }
    }

    if weight <= 0.0 {
        warn!("image has no intensity; falling back to geometric centre");
        return grid_centre(vol);
    }
    sum / weight
}

fn second_moments(vol: &Volume, mask: Option<&Volume>, centre: &Vector3<f64>) -> Matrix3<f64> {
    let [nx, ny, nz] = vol.shape();
    let mut m = Matrix3::zeros();
    let mut weight = 0.0f64;

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                if let Some(mk) = mask {
                    if !mk.mask_includes(x, y, z) {
                        continue;
                    }
                }
                let w = vol.data[[x, y, z, 0]].abs() as f64;
                let r = Vector3::new(x as f64, y as f64, z as f64) - centre;
                m += w * r * r.transpose();
                weight += w;
            }
        }
    }

    if weight > 0.0 {
        m /= weight;
    }
    m
}

/// Rotation aligning the principal axes of the target moments onto those of
/// the moving image. Eigenvector signs are ambiguous, so each moving axis is
/// flipped toward its target counterpart before forming the rotation, and a
/// residual reflection is removed through the polar projection.
fn principal_axes_rotation(m_moving: &Matrix3<f64>, m_target: &Matrix3<f64>) -> Matrix3<f64> {
    let e1 = SymmetricEigen::new(*m_moving);
    let e2 = SymmetricEigen::new(*m_target);

    let q1 = sorted_axes(&e1);
    let mut q2 = sorted_axes(&e2);

    for k in 0..3 {
        if q1.column(k).dot(&q2.column(k)) < 0.0 {
            for i in 0..3 {
                q2[(i, k)] = -q2[(i, k)];
            }
        }
    }

    let mut r = q1 * q2.transpose();
    if r.determinant() < 0.0 {
        // Flip the weakest axis to stay in the rotation group.
        let mut q2_fixed = q2;
        for i in 0..3 {
            q2_fixed[(i, 2)] = -q2_fixed[(i, 2)];
        }
        r = q1 * q2_fixed.transpose();
    }
    polar_rotation(&r)
}

/// Eigenvectors as columns, sorted by descending eigenvalue.
fn sorted_axes(eigen: &SymmetricEigen<f64, nalgebra::Const<3>>) -> Matrix3<f64> {
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut q = Matrix3::zeros();
    for (k, &src) in order.iter().enumerate() {
        for i in 0..3 {
            q[(i, k)] = eigen.eigenvectors[(i, src)];
        }
    }
    q
}
