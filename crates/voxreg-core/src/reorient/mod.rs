pub mod directions;
pub mod sh;

use nalgebra::{DMatrix, DVector, Matrix3};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::warn;

use crate::consts::{APODISATION_LAMBDA, PARALLEL_VOXEL_THRESHOLD};
use crate::error::{RegistrationError, Result};
use crate::reorient::directions::DirectionSet;
use crate::transform::linear::LinearTransform;
use crate::transform::model::polar_rotation;
use crate::volume::Volume;
use crate::warp::field::DisplacementField;

/// Jacobian deviation below which a voxel counts as undeformed.
const JACOBIAN_IDENTITY_TOLERANCE: f64 = 1e-12;

/// Whether a volume count identifies an orientation-encoded image: a valid
/// even spherical-harmonic coefficient series beyond a plain scalar.
pub fn is_sh_image(vol: &Volume) -> bool {
    vol.volumes() > 1 && sh::l_for_n(vol.volumes()).is_some()
}

/// Reorients spherical-harmonic series through rotations, by sampling the
/// series along a direction set, rotating the directions, and refitting.
///
/// The refit is apodised: a Laplace-Beltrami penalty on the normal equations
/// damps the high-degree terms that a plain least-squares refit would let
/// ring. The penalty vanishes for an identity rotation up to the
/// regularisation weight, so reorienting by nothing is a no-op.
pub struct Reorienter {
    dirs: DirectionSet,
    fit: DMatrix<f64>,
    lmax: usize,
}

impl Reorienter {
    pub fn new(dirs: &DirectionSet, lmax: usize) -> Result<Self> {
        let n = sh::n_for_l(lmax);
        if dirs.len() < n {
            return Err(RegistrationError::Configuration(format!(
                "{} directions cannot constrain {} coefficients (lmax {})",
                dirs.len(),
                n,
                lmax
            )));
        }

        let basis = sh::basis_matrix(dirs.directions(), lmax);
        let mut normal = basis.transpose() * &basis;
        for j in 0..n {
            let l = sh::l_for_column(j) as f64;
            normal[(j, j)] += APODISATION_LAMBDA * l * (l + 1.0);
        }
        let inv = normal.try_inverse().ok_or_else(|| {
            RegistrationError::Numerical("direction set is degenerate".into())
        })?;

        Ok(Self {
            dirs: dirs.clone(),
            fit: inv * basis.transpose(),
            lmax,
        })
    }

    /// Coefficient-space matrix applying one rotation: sample along the
    /// rotated directions, then refit.
    pub fn rotation_matrix(&self, r: &Matrix3<f64>) -> DMatrix<f64> {
        let rotated = self.dirs.rotated(r);
        &self.fit * sh::basis_matrix(&rotated, self.lmax)
    }
}

/// Reorient every voxel of a spherical-harmonic image through the rotational
/// part of a linear transform. Returns whether anything was done: images
/// whose volume count is not a coefficient series are passed through
/// untouched.
pub fn reorient(vol: &mut Volume, transform: &LinearTransform, dirs: &DirectionSet) -> Result<bool> {
    let Some(lmax) = series_lmax(vol) else {
        return Ok(false);
    };

    let rotation = polar_rotation(transform.matrix());
    let reorienter = Reorienter::new(dirs, lmax)?;
    let m = reorienter.rotation_matrix(&rotation);

    let [nx, ny, nz] = vol.shape();
    let nv = vol.volumes();
    apply_per_voxel(vol, |_, _, _| None, &m, nx, ny, nz, nv);
    Ok(true)
}

/// Reorient through a displacement field: each voxel uses the rotational
/// part of the local deformation Jacobian.
pub fn reorient_warp(
    vol: &mut Volume,
    field: &DisplacementField,
    dirs: &DirectionSet,
) -> Result<bool> {
    let Some(lmax) = series_lmax(vol) else {
        return Ok(false);
    };
    if field.shape() != vol.shape() {
        return Err(RegistrationError::DimensionMismatch(format!(
            "field grid {:?} does not match image grid {:?}",
            field.shape(),
            vol.shape()
        )));
    }

    let reorienter = Reorienter::new(dirs, lmax)?;
    let identity = reorienter.rotation_matrix(&Matrix3::identity());

    let [nx, ny, nz] = vol.shape();
    let nv = vol.volumes();
    apply_per_voxel(
        vol,
        |x, y, z| {
            // Undeformed voxels reuse the shared identity refit instead of
            // paying for a per-voxel basis rebuild.
            let jacobian = field.jacobian(x, y, z);
            if (jacobian - Matrix3::identity()).norm() < JACOBIAN_IDENTITY_TOLERANCE {
                return None;
            }
            Some(reorienter.rotation_matrix(&polar_rotation(&jacobian)))
        },
        &identity,
        nx,
        ny,
        nz,
        nv,
    );
    Ok(true)
}

fn series_lmax(vol: &Volume) -> Option<usize> {
    if vol.volumes() == 1 {
        return None;
    }
    match sh::l_for_n(vol.volumes()) {
        Some(lmax) => Some(lmax),
        None => {
            warn!(
                volumes = vol.volumes(),
                "volume count is not a spherical-harmonic series; skipping reorientation"
            );
            None
        }
    }
}

/// Multiply every voxel's coefficient vector by a matrix; `per_voxel`
/// overrides the shared matrix where it returns one. Parallel over z slabs.
fn apply_per_voxel<F>(
    vol: &mut Volume,
    per_voxel: F,
    shared: &DMatrix<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
    nv: usize,
) where
    F: Fn(usize, usize, usize) -> Option<DMatrix<f64>> + Sync,
{
    let data = &vol.data;

    let slab = |z: usize| -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((nx * ny, nv));
        let mut coeffs = DVector::<f64>::zeros(nv);
        for x in 0..nx {
            for y in 0..ny {
                for v in 0..nv {
                    coeffs[v] = data[[x, y, z, v]] as f64;
                }
                let rotated = match per_voxel(x, y, z) {
                    Some(m) => m * &coeffs,
                    None => shared * &coeffs,
                };
                for v in 0..nv {
                    out[[x + nx * y, v]] = rotated[v] as f32;
                }
            }
        }
        out
    };

    let slabs: Vec<Array2<f32>> = if nx * ny * nz >= PARALLEL_VOXEL_THRESHOLD {
        (0..nz).into_par_iter().map(slab).collect()
    } else {
        (0..nz).map(slab).collect()
    };

    for (z, slab) in slabs.into_iter().enumerate() {
        for x in 0..nx {
            for y in 0..ny {
                for v in 0..nv {
                    vol.data[[x, y, z, v]] = slab[[x + nx * y, v]];
                }
            }
        }
    }
}
