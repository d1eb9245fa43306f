pub mod field;
pub mod io;

use crate::transform::linear::LinearTransform;
use crate::warp::field::DisplacementField;

/// The full output of a symmetric nonlinear registration: four displacement
/// fields on the midway grid (each image toward the midway space and back)
/// plus the linear transform the fields were estimated on top of.
#[derive(Clone, Debug)]
pub struct WarpBundle {
    /// Midway-grid field carrying the moving image onto the midway space.
    pub d1: DisplacementField,
    /// Inverse of `d1`.
    pub d1_inv: DisplacementField,
    /// Midway-grid field carrying the target image onto the midway space.
    pub d2: DisplacementField,
    /// Inverse of `d2`.
    pub d2_inv: DisplacementField,
    /// Linear transform composed around the fields.
    pub linear: LinearTransform,
    /// Voxel spacing of the midway grid.
    pub spacing: [f64; 3],
}
