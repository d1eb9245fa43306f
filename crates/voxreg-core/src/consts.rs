/// Minimum voxel count (nx*ny*nz) to use slab-level Rayon parallelism.
pub const PARALLEL_VOXEL_THRESHOLD: usize = 32_768;

/// Default multi-resolution scale factors, coarsest first.
pub const DEFAULT_SCALE_FACTORS: [f64; 3] = [0.25, 0.5, 1.0];

/// Default gradient-descent iteration cap per resolution level (linear stages).
pub const DEFAULT_LINEAR_MAX_ITER: usize = 300;

/// Default demons iteration caps per resolution level (SyN stage).
pub const DEFAULT_SYN_MAX_ITER: [usize; 3] = [40, 40, 20];

/// Default odd window extent for the local cross-correlation metric.
pub const DEFAULT_CC_EXTENT: usize = 3;

/// Initial gradient-descent step, in target voxels of endpoint displacement.
pub const GD_INITIAL_STEP: f64 = 1.0;

/// Step below which gradient descent declares the level converged.
pub const GD_MIN_STEP: f64 = 1e-6;

/// Upper bound on the gradient-descent step after successful growth.
pub const GD_MAX_STEP: f64 = 8.0;

/// Step growth factor after an accepted candidate.
pub const GD_STEP_GROW: f64 = 1.5;

/// Step shrink factor after a rejected candidate.
pub const GD_STEP_SHRINK: f64 = 0.5;

/// Relative cost improvement below which a level stops early.
/// The per-level iteration cap remains authoritative.
pub const GD_MIN_RELATIVE_IMPROVEMENT: f64 = 1e-7;

/// Gradient norm below which the parameters are considered stationary.
pub const GD_MIN_GRADIENT_NORM: f64 = 1e-12;

/// Rotation-candidate grid (radians, per axis) for the global multi-start search.
pub const GLOBAL_SEARCH_ANGLES: [f64; 5] = [-0.5236, -0.2618, 0.0, 0.2618, 0.5236];

/// Perturbation applied to each repetition restart, in voxels / radians.
pub const REPETITION_PERTURBATION: f64 = 0.5;

/// Maximum Denman-Beavers iterations for the principal matrix square root.
pub const MATRIX_SQRT_MAX_ITER: usize = 100;

/// Residual Frobenius norm at which the matrix square root is accepted.
pub const MATRIX_SQRT_TOLERANCE: f64 = 1e-12;

/// Mask inclusion threshold after interpolation of a downsampled binary mask.
pub const MASK_INCLUSION_THRESHOLD: f32 = 0.5;

/// Scale constant of the soft-L2 (pseudo-Huber) robust estimator.
pub const ROBUST_L2_SCALE: f64 = 0.3;

/// Exponent of the Lp robust estimator.
pub const LP_EXPONENT: f64 = 1.2;

/// Guard against the singular Lp derivative at zero difference.
pub const LP_EPSILON: f64 = 1e-6;

/// Default initial gradient step of the SyN demons update.
pub const DEFAULT_SYN_GRAD_STEP: f64 = 0.5;

/// Default smoothing width (voxels, full resolution) of the demons update field.
pub const DEFAULT_UPDATE_SMOOTHING: f64 = 2.0;

/// Default smoothing width (voxels, full resolution) of the total displacement field.
pub const DEFAULT_DISP_SMOOTHING: f64 = 1.0;

/// Per-voxel cap on the demons update magnitude, in voxels.
pub const DEMONS_MAX_UPDATE: f64 = 2.0;

/// Maximum fixed-point iterations when inverting a displacement field.
pub const FIELD_INVERSION_MAX_ITER: usize = 30;

/// Starting tolerance (voxels) of the field inversion; shrinks across
/// demons iterations down to the floor below.
pub const FIELD_INVERSION_TOLERANCE_START: f64 = 0.1;

/// Floor of the field inversion tolerance (voxels).
pub const FIELD_INVERSION_TOLERANCE_MIN: f64 = 0.01;

/// Relative midway-cost improvement below which a SyN level stops early.
pub const SYN_MIN_RELATIVE_IMPROVEMENT: f64 = 1e-6;

/// Number of directions in the built-in reorientation direction set.
pub const DEFAULT_DIRECTION_COUNT: usize = 60;

/// Default spherical-harmonic band limit used for orientation-encoded images.
pub const DEFAULT_LMAX: usize = 4;

/// Laplace-Beltrami regularization weight of the apodised coefficient refit.
pub const APODISATION_LAMBDA: f64 = 1e-4;
