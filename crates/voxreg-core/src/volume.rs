use ndarray::{Array3, Array4, Axis};

use crate::consts::MASK_INCLUSION_THRESHOLD;
use crate::error::{RegistrationError, Result};

/// A volumetric image: three spatial axes plus a trailing volume axis.
///
/// A single-volume image (`volumes() == 1`) is an ordinary scalar 3D image;
/// multiple volumes form a 4D image (e.g. a spherical-harmonic coefficient
/// series). Voxel values are f32; all registration coordinates are expressed
/// in voxel units of the full-resolution grid.
#[derive(Clone, Debug)]
pub struct Volume {
    /// Voxel data, shape = (x, y, z, volume).
    pub data: Array4<f32>,
    /// Physical voxel size along each spatial axis.
    pub spacing: [f64; 3],
    /// Physical coordinate of voxel (0, 0, 0).
    pub origin: [f64; 3],
}

impl Volume {
    pub fn new(data: Array4<f32>, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            data,
            spacing,
            origin,
        }
    }

    /// Wrap a scalar 3D array as a single-volume image with unit spacing.
    pub fn from_scalar(data: Array3<f32>) -> Self {
        Self {
            data: data.insert_axis(Axis(3)),
            spacing: [1.0, 1.0, 1.0],
            origin: [0.0, 0.0, 0.0],
        }
    }

    pub fn zeros(shape: [usize; 3], volumes: usize) -> Self {
        Self {
            data: Array4::zeros((shape[0], shape[1], shape[2], volumes)),
            spacing: [1.0, 1.0, 1.0],
            origin: [0.0, 0.0, 0.0],
        }
    }

    /// Spatial shape (x, y, z).
    pub fn shape(&self) -> [usize; 3] {
        let (nx, ny, nz, _) = self.data.dim();
        [nx, ny, nz]
    }

    /// Number of volumes along the 4th axis.
    pub fn volumes(&self) -> usize {
        self.data.dim().3
    }

    pub fn is_4d(&self) -> bool {
        self.volumes() > 1
    }

    pub fn num_voxels(&self) -> usize {
        let [nx, ny, nz] = self.shape();
        nx * ny * nz
    }

    /// Keep only the first `n` volumes (e.g. to restrict a spherical-harmonic
    /// series to a lower band limit before registration).
    pub fn with_volumes(&self, n: usize) -> Result<Self> {
        if n == 0 || n > self.volumes() {
            return Err(RegistrationError::DimensionMismatch(format!(
                "cannot keep {} of {} volumes",
                n,
                self.volumes()
            )));
        }
        Ok(Self {
            data: self.data.slice(ndarray::s![.., .., .., 0..n]).to_owned(),
            spacing: self.spacing,
            origin: self.origin,
        })
    }

    pub fn voxel_to_physical(&self, idx: [f64; 3]) -> [f64; 3] {
        [
            self.origin[0] + idx[0] * self.spacing[0],
            self.origin[1] + idx[1] * self.spacing[1],
            self.origin[2] + idx[2] * self.spacing[2],
        ]
    }

    pub fn physical_to_voxel(&self, phys: [f64; 3]) -> [f64; 3] {
        [
            (phys[0] - self.origin[0]) / self.spacing[0],
            (phys[1] - self.origin[1]) / self.spacing[1],
            (phys[2] - self.origin[2]) / self.spacing[2],
        ]
    }

    /// Mask semantics: nonzero means included. Interpolated (downsampled)
    /// masks use a 0.5 threshold.
    pub fn mask_includes(&self, x: usize, y: usize, z: usize) -> bool {
        self.data[[x, y, z, 0]] > MASK_INCLUSION_THRESHOLD
    }
}
