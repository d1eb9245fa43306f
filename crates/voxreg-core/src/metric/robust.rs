use serde::{Deserialize, Serialize};

use crate::consts::{LP_EPSILON, LP_EXPONENT, ROBUST_L2_SCALE};

/// Robust penalty applied to per-voxel intensity differences in place of the
/// plain squared error. `rho` is the penalty, `psi` its derivative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustEstimator {
    /// Absolute difference.
    L1,
    /// Pseudo-Huber: quadratic near zero, linear in the tails.
    L2,
    /// |d|^p with p between 1 and 2.
    Lp,
}

impl RobustEstimator {
    pub fn rho(&self, d: f64) -> f64 {
        match self {
            RobustEstimator::L1 => d.abs(),
            RobustEstimator::L2 => {
                let c = ROBUST_L2_SCALE;
                c * c * ((1.0 + (d / c).powi(2)).sqrt() - 1.0)
            }
            RobustEstimator::Lp => d.abs().powf(LP_EXPONENT),
        }
    }

    pub fn psi(&self, d: f64) -> f64 {
        match self {
            RobustEstimator::L1 => {
                if d > 0.0 {
                    1.0
                } else if d < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            RobustEstimator::L2 => {
                let c = ROBUST_L2_SCALE;
                d / (1.0 + (d / c).powi(2)).sqrt()
            }
            RobustEstimator::Lp => {
                // The derivative is singular at zero for p < 2.
                if d.abs() < LP_EPSILON {
                    0.0
                } else {
                    LP_EXPONENT * d.abs().powf(LP_EXPONENT - 1.0) * d.signum()
                }
            }
        }
    }
}
