use nalgebra::{Matrix3, Matrix4, Vector3};

use crate::consts::{MATRIX_SQRT_MAX_ITER, MATRIX_SQRT_TOLERANCE};
use crate::error::{RegistrationError, Result};

/// An affine map from target voxel coordinates to moving voxel coordinates,
/// parameterised around a centre of rotation:
///
///   T(x) = M (x - c) + c + t = M x + offset,   offset = t + c - M c
///
/// The transform is an immutable snapshot: the two symmetric halves (T^1/2
/// and T^-1/2, used to evaluate both images on the midway space) are computed
/// once at construction from the principal square root of the homogeneous
/// matrix, so they can never drift out of sync with the full map.
#[derive(Clone, Debug)]
pub struct LinearTransform {
    matrix: Matrix3<f64>,
    translation: Vector3<f64>,
    centre: Vector3<f64>,
    offset: Vector3<f64>,
    half: (Matrix3<f64>, Vector3<f64>),
    half_inverse: (Matrix3<f64>, Vector3<f64>),
}

impl LinearTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
            centre: Vector3::zeros(),
            offset: Vector3::zeros(),
            half: (Matrix3::identity(), Vector3::zeros()),
            half_inverse: (Matrix3::identity(), Vector3::zeros()),
        }
    }

    /// Build a transform from its linear part, translation and centre.
    /// Fails if the linear part is degenerate (determinant <= 0), since no
    /// principal square root exists on the orientation-preserving branch.
    pub fn new(
        matrix: Matrix3<f64>,
        translation: Vector3<f64>,
        centre: Vector3<f64>,
    ) -> Result<Self> {
        let offset = translation + centre - matrix * centre;

        let mut homogeneous = Matrix4::identity();
        homogeneous.fixed_view_mut::<3, 3>(0, 0).copy_from(&matrix);
        homogeneous.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);

        let half_h = matrix_sqrt(&homogeneous)?;
        let half_m: Matrix3<f64> = half_h.fixed_view::<3, 3>(0, 0).into_owned();
        let half_o: Vector3<f64> = half_h.fixed_view::<3, 1>(0, 3).into_owned();

        let half_m_inv = half_m.try_inverse().ok_or_else(|| {
            RegistrationError::Numerical("transform half is not invertible".into())
        })?;

        Ok(Self {
            matrix,
            translation,
            centre,
            offset,
            half: (half_m, half_o),
            half_inverse: (half_m_inv, -half_m_inv * half_o),
        })
    }

    pub fn with_matrix(&self, matrix: Matrix3<f64>) -> Result<Self> {
        Self::new(matrix, self.translation, self.centre)
    }

    pub fn with_translation(&self, translation: Vector3<f64>) -> Result<Self> {
        Self::new(self.matrix, translation, self.centre)
    }

    pub fn with_centre(&self, centre: Vector3<f64>) -> Result<Self> {
        Self::new(self.matrix, self.translation, centre)
    }

    /// Build from a compact representation where the translation column is
    /// the full offset (centre at the origin).
    pub fn from_compact(matrix: Matrix3<f64>, offset: Vector3<f64>) -> Result<Self> {
        Self::new(matrix, offset, Vector3::zeros())
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn centre(&self) -> &Vector3<f64> {
        &self.centre
    }

    pub fn offset(&self) -> &Vector3<f64> {
        &self.offset
    }

    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let q = self.matrix * Vector3::new(p[0], p[1], p[2]) + self.offset;
        [q.x, q.y, q.z]
    }

    /// Apply the half transform T^1/2 (midway space toward the moving image).
    pub fn apply_half(&self, p: [f64; 3]) -> [f64; 3] {
        let q = self.half.0 * Vector3::new(p[0], p[1], p[2]) + self.half.1;
        [q.x, q.y, q.z]
    }

    /// Apply the inverse half transform T^-1/2 (midway space toward the target).
    pub fn apply_half_inverse(&self, p: [f64; 3]) -> [f64; 3] {
        let q = self.half_inverse.0 * Vector3::new(p[0], p[1], p[2]) + self.half_inverse.1;
        [q.x, q.y, q.z]
    }

    pub fn half(&self) -> (&Matrix3<f64>, &Vector3<f64>) {
        (&self.half.0, &self.half.1)
    }

    pub fn half_inverse(&self) -> (&Matrix3<f64>, &Vector3<f64>) {
        (&self.half_inverse.0, &self.half_inverse.1)
    }

    pub fn inverse(&self) -> Result<Self> {
        let inv = self.matrix.try_inverse().ok_or_else(|| {
            RegistrationError::Numerical("transform matrix is not invertible".into())
        })?;
        Self::from_compact(inv, -inv * self.offset)
    }

    /// The same linear part with the offset scaled, mapping a resolution
    /// level's voxel grid onto itself (coarse voxels shrink translations).
    pub fn with_scaled_offset(&self, scale: f64) -> Result<Self> {
        Self::from_compact(self.matrix, self.offset * scale)
    }

    pub fn homogeneous(&self) -> Matrix4<f64> {
        let mut h = Matrix4::identity();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.matrix);
        h.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.offset);
        h
    }
}

/// Principal square root of a homogeneous transform matrix, via the coupled
/// Denman-Beavers iteration. Requires a positive determinant; a candidate
/// transform that has collapsed through zero volume is rejected here.
pub fn matrix_sqrt(m: &Matrix4<f64>) -> Result<Matrix4<f64>> {
    if m.determinant() <= 0.0 {
        return Err(RegistrationError::Numerical(
            "transform determinant is not positive".into(),
        ));
    }

    let mut x = *m;
    let mut y = Matrix4::<f64>::identity();

    for _ in 0..MATRIX_SQRT_MAX_ITER {
        let x_inv = x
            .try_inverse()
            .ok_or_else(|| RegistrationError::Numerical("matrix square root diverged".into()))?;
        let y_inv = y
            .try_inverse()
            .ok_or_else(|| RegistrationError::Numerical("matrix square root diverged".into()))?;

        x = 0.5 * (x + y_inv);
        y = 0.5 * (y + x_inv);

        let residual = (x * x - m).norm();
        if residual < MATRIX_SQRT_TOLERANCE {
            return Ok(x);
        }
    }

    Err(RegistrationError::Numerical(
        "matrix square root did not converge".into(),
    ))
}
