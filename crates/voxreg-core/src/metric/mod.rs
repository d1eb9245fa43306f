pub mod cross_correlation;
pub mod demons;
pub mod mean_squared;
pub mod robust;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_CC_EXTENT;
use crate::error::{RegistrationError, Result};
use crate::transform::linear::LinearTransform;
use crate::transform::model::{ParamSpace, MAX_PARAMS};
use crate::volume::Volume;

pub use robust::RobustEstimator;

/// Similarity metric selector, as it appears in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    MeanSquared,
    CrossCorrelation,
}

/// A fully validated metric, dispatched once per cost evaluation rather than
/// per voxel.
#[derive(Clone, Copy, Debug)]
pub enum Metric {
    Difference { estimator: Option<RobustEstimator> },
    CrossCorrelation { extent: usize },
}

impl Metric {
    /// Validate a metric selection up front, before any image work starts.
    pub fn build(
        kind: MetricKind,
        estimator: Option<RobustEstimator>,
        cc_extent: Option<usize>,
        is_4d: bool,
    ) -> Result<Metric> {
        match kind {
            MetricKind::MeanSquared => Ok(Metric::Difference { estimator }),
            MetricKind::CrossCorrelation => {
                if estimator.is_some() {
                    return Err(RegistrationError::Configuration(
                        "robust estimators do not apply to the cross-correlation metric".into(),
                    ));
                }
                if is_4d {
                    return Err(RegistrationError::Unsupported(
                        "cross-correlation is only defined for single-volume images".into(),
                    ));
                }
                let extent = cc_extent.unwrap_or(DEFAULT_CC_EXTENT);
                if extent == 0 || extent % 2 == 0 {
                    return Err(RegistrationError::Configuration(format!(
                        "cross-correlation extent must be odd and positive, got {}",
                        extent
                    )));
                }
                Ok(Metric::CrossCorrelation { extent })
            }
        }
    }

    pub fn cost_gradient(
        &self,
        ctx: &MetricContext<'_>,
        transform: &LinearTransform,
        params: &ParamSpace,
    ) -> (f64, [f64; MAX_PARAMS]) {
        match self {
            Metric::Difference { estimator } => {
                mean_squared::cost_gradient(ctx, transform, params, *estimator)
            }
            Metric::CrossCorrelation { extent } => {
                cross_correlation::cost_gradient(ctx, transform, params, *extent)
            }
        }
    }

    pub fn cost(&self, ctx: &MetricContext<'_>, transform: &LinearTransform) -> f64 {
        match self {
            Metric::Difference { estimator } => mean_squared::cost(ctx, transform, *estimator),
            Metric::CrossCorrelation { extent } => {
                cross_correlation::cost(ctx, transform, *extent)
            }
        }
    }
}

/// Everything a metric evaluation needs at one resolution level.
///
/// Target voxels index the level grid; the corresponding full-resolution
/// point is `idx / scale`, and the moving image level is sampled at
/// `T(idx / scale) * scale`. Intensity gradients taken on the level grid are
/// multiplied by `scale` to express them per full-resolution voxel.
#[derive(Clone, Copy)]
pub struct MetricContext<'a> {
    pub moving: &'a Volume,
    pub target: &'a Volume,
    pub mask_moving: Option<&'a Volume>,
    pub mask_target: Option<&'a Volume>,
    /// Resolution level scale factor (1.0 = full resolution).
    pub scale: f64,
    /// Voxel subsampling stride derived from the loop density.
    pub stride: usize,
    /// Stride phase, advanced between iterations for coverage.
    pub phase: usize,
}

impl<'a> MetricContext<'a> {
    /// Whether a target-level voxel participates in the cost.
    pub fn target_included(&self, x: usize, y: usize, z: usize) -> bool {
        match self.mask_target {
            Some(mask) => mask.mask_includes(x, y, z),
            None => true,
        }
    }

    /// Whether a moving-level continuous coordinate participates.
    pub fn moving_included(&self, q: [f64; 3]) -> bool {
        match self.mask_moving {
            Some(mask) => {
                crate::interp::trilinear(&mask.data, 0, q[0], q[1], q[2])
                    > crate::consts::MASK_INCLUSION_THRESHOLD
            }
            None => true,
        }
    }
}
