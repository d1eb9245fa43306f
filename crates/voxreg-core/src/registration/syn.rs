use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_DISP_SMOOTHING, DEFAULT_LMAX, DEFAULT_SCALE_FACTORS, DEFAULT_SYN_GRAD_STEP,
    DEFAULT_SYN_MAX_ITER, DEFAULT_UPDATE_SMOOTHING, FIELD_INVERSION_TOLERANCE_MIN,
    FIELD_INVERSION_TOLERANCE_START, SYN_MIN_RELATIVE_IMPROVEMENT,
};
use crate::error::{RegistrationError, Result};
use crate::filters::resample::{downsample, sample_grid};
use crate::interp;
use crate::metric::demons;
use crate::registration::linear::match_volumes;
use crate::transform::linear::LinearTransform;
use crate::volume::Volume;
use crate::warp::field::{fill_field, DisplacementField};
use crate::warp::WarpBundle;

const SYN_MIN_GRAD_STEP: f64 = 1e-3;

/// Configuration of the symmetric nonlinear (SyN-style) stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynConfig {
    /// Resolution levels, coarsest first, each in (0, 1].
    pub scale_factors: Vec<f64>,
    /// Demons iteration cap per level (one entry broadcasts).
    pub max_iter: Vec<usize>,
    /// Initial scaling of the demons update field.
    pub grad_step: f64,
    /// Gaussian width (full-resolution voxels) applied to each update field.
    pub update_smoothing: f64,
    /// Gaussian width (full-resolution voxels) applied to the total fields.
    pub disp_smoothing: f64,
    /// Band limit cap for spherical-harmonic images: series carrying more
    /// coefficients are truncated before registration. `None` disables the cap.
    pub lmax: Option<usize>,
    /// Warm-start fields from a previous run, on the full-resolution grid.
    #[serde(skip)]
    pub init_warp: Option<WarpBundle>,
}

impl Default for SynConfig {
    fn default() -> Self {
        Self {
            scale_factors: DEFAULT_SCALE_FACTORS.to_vec(),
            max_iter: DEFAULT_SYN_MAX_ITER.to_vec(),
            grad_step: DEFAULT_SYN_GRAD_STEP,
            update_smoothing: DEFAULT_UPDATE_SMOOTHING,
            disp_smoothing: DEFAULT_DISP_SMOOTHING,
            lmax: Some(DEFAULT_LMAX),
            init_warp: None,
        }
    }
}

impl SynConfig {
    fn validate(&self) -> Result<()> {
        if self.scale_factors.is_empty() {
            return Err(RegistrationError::Configuration(
                "at least one scale factor is required".into(),
            ));
        }
        for &s in &self.scale_factors {
            if !(s > 0.0 && s <= 1.0) {
                return Err(RegistrationError::Configuration(format!(
                    "scale factors must lie in (0, 1], got {}",
                    s
                )));
            }
        }
        if self.max_iter.len() != 1 && self.max_iter.len() != self.scale_factors.len() {
            return Err(RegistrationError::Configuration(format!(
                "max_iter must have 1 entry or one per scale factor ({}), got {}",
                self.scale_factors.len(),
                self.max_iter.len()
            )));
        }
        if self.grad_step <= 0.0 {
            return Err(RegistrationError::Configuration(
                "grad_step must be positive".into(),
            ));
        }
        if let Some(lmax) = self.lmax {
            if lmax % 2 != 0 {
                return Err(RegistrationError::Configuration(format!(
                    "lmax must be even, got {}",
                    lmax
                )));
            }
        }
        Ok(())
    }
}

/// The four displacement fields tracked during estimation.
#[derive(Clone)]
struct Fields {
    d1: DisplacementField,
    d1_inv: DisplacementField,
    d2: DisplacementField,
    d2_inv: DisplacementField,
}

impl Fields {
    fn zeros(shape: [usize; 3]) -> Self {
        Self {
            d1: DisplacementField::zeros(shape),
            d1_inv: DisplacementField::zeros(shape),
            d2: DisplacementField::zeros(shape),
            d2_inv: DisplacementField::zeros(shape),
        }
    }

    fn upsample(&self, shape: [usize; 3], ratio: f64) -> Self {
        Self {
            d1: self.d1.upsample(shape, ratio),
            d1_inv: self.d1_inv.upsample(shape, ratio),
            d2: self.d2.upsample(shape, ratio),
            d2_inv: self.d2_inv.upsample(shape, ratio),
        }
    }
}

/// Symmetric diffeomorphic registration on top of a fixed linear transform.
///
/// Both images are warped halfway toward a common midway grid: the moving
/// image through the half transform plus d1, the target through the inverse
/// half plus d2. Each iteration applies equal and opposite demons updates to
/// the two fields, so the deformation is shared symmetrically rather than
/// absorbed by one side.
pub fn run(
    config: &SynConfig,
    linear: &LinearTransform,
    moving: &Volume,
    target: &Volume,
    mask_moving: Option<&Volume>,
    mask_target: Option<&Volume>,
) -> Result<WarpBundle> {
    config.validate()?;
    let (moving, target) = match_volumes(moving, target, config.lmax)?;

    let full_shape = target.shape();
    let mut fields: Option<Fields> = None;
    let mut prev_scale = 0.0f64;

    // A supplied warp already embeds the linear part, so the caller's
    // transform and any multi-resolution schedule are superseded.
    let (scale_factors, linear) = match &config.init_warp {
        Some(init) => {
            if init.d1.shape() != full_shape {
                return Err(RegistrationError::DimensionMismatch(format!(
                    "initial warp grid {:?} does not match the target grid {:?}",
                    init.d1.shape(),
                    full_shape
                )));
            }
            warn!(
                "starting from a supplied warp; processing at full resolution only, \
                 using its embedded linear transform"
            );
            (vec![1.0], init.linear.clone())
        }
        None => (config.scale_factors.clone(), linear.clone()),
    };

    for (level, &scale) in scale_factors.iter().enumerate() {
        let moving_level = downsample(&moving, scale);
        let target_level = downsample(&target, scale);
        let mask_moving_level = mask_moving.map(|m| downsample(m, scale));
        let mask_target_level = mask_target.map(|m| downsample(m, scale));
        let shape = target_level.shape();

        let transform = linear.with_scaled_offset(scale)?;

        let mut current = match (&fields, &config.init_warp) {
            (Some(prev), _) => prev.upsample(shape, scale / prev_scale),
            (None, Some(init)) => Fields {
                d1: init.d1.upsample(shape, scale),
                d1_inv: init.d1_inv.upsample(shape, scale),
                d2: init.d2.upsample(shape, scale),
                d2_inv: init.d2_inv.upsample(shape, scale),
            },
            (None, None) => Fields::zeros(shape),
        };

        let max_iter = if config.max_iter.len() == 1 {
            config.max_iter[0]
        } else if config.init_warp.is_some() {
            // The schedule collapsed to one full-resolution level; use the
            // cap meant for the finest level.
            config.max_iter.last().copied().unwrap_or(0)
        } else {
            config.max_iter[level]
        };
        let update_sigma = config.update_smoothing * scale;
        let disp_sigma = config.disp_smoothing * scale;

        let mut grad_step = config.grad_step;
        let mut prev_cost = f64::INFINITY;
        let mut snapshot = current.clone();

        for iter in 0..max_iter {
            let w1 = warp_to_midway(&moving_level, &current.d1, |p| transform.apply_half(p));
            let w2 = warp_to_midway(&target_level, &current.d2, |p| {
                transform.apply_half_inverse(p)
            });

            let (mut update, cost) = demons::update(&w1, &w2, grad_step);

            if cost > prev_cost {
                // The last update overshot; rewind and take smaller steps.
                current = snapshot.clone();
                grad_step *= 0.5;
                // Forget the stale cost so the retried, smaller update is
                // not mistaken for a converged level.
                prev_cost = f64::INFINITY;
                debug!(level, iter, grad_step, "cost increased; halving step");
                if grad_step < SYN_MIN_GRAD_STEP {
                    break;
                }
                continue;
            }
            let improved = (prev_cost - cost) / prev_cost.abs().max(f64::MIN_POSITIVE);
            if prev_cost.is_finite() && improved < SYN_MIN_RELATIVE_IMPROVEMENT {
                debug!(level, iter, cost, "converged");
                break;
            }

            mask_update(
                &mut update,
                &current,
                &transform,
                mask_moving_level.as_ref(),
                mask_target_level.as_ref(),
            );
            let update = update.smoothed(update_sigma);

            snapshot = current.clone();
            prev_cost = cost;

            current.d1 = current.d1.compose(&update).smoothed(disp_sigma);
            current.d2 = current.d2.compose(&update.negated()).smoothed(disp_sigma);

            let tolerance = (FIELD_INVERSION_TOLERANCE_START / (iter + 1) as f64)
                .max(FIELD_INVERSION_TOLERANCE_MIN);
            current.d1_inv = current.d1.invert(&current.d1_inv, tolerance);
            current.d2_inv = current.d2.invert(&current.d2_inv, tolerance);
        }

        info!(level, scale, cost = prev_cost, "nonlinear level finished");
        fields = Some(current);
        prev_scale = scale;
    }

    // scale_factors is non-empty, so fields is always set by now.
    let mut result = fields.ok_or_else(|| {
        RegistrationError::Configuration("no resolution levels configured".into())
    })?;
    if prev_scale < 1.0 {
        result = result.upsample(full_shape, 1.0 / prev_scale);
    }

    Ok(WarpBundle {
        d1: result.d1,
        d1_inv: result.d1_inv,
        d2: result.d2,
        d2_inv: result.d2_inv,
        linear,
        spacing: target.spacing,
    })
}

/// Collapse a warp bundle into a single displacement field on the target
/// grid, mapping target voxels all the way into the moving image:
///
///   deform(x) = S(z + d1(z)),  z = y + d2_inv(y),  y = S(x)
///
/// with S the half transform. Suitable for resampling the moving image in
/// one interpolation step.
pub fn compose_halfway(bundle: &WarpBundle, shape: [usize; 3]) -> DisplacementField {
    fill_field(shape, |x, y, z| {
        let p = [x as f64, y as f64, z as f64];
        let mid = bundle.linear.apply_half(p);
        let dinv = bundle.d2_inv.sample(mid);
        let q = [mid[0] + dinv[0], mid[1] + dinv[1], mid[2] + dinv[2]];
        let d1 = bundle.d1.sample(q);
        let moved = bundle
            .linear
            .apply_half([q[0] + d1[0], q[1] + d1[1], q[2] + d1[2]]);
        [moved[0] - p[0], moved[1] - p[1], moved[2] - p[2]]
    })
}

/// Warp an image onto the midway grid: out(x) = src(map(x + d(x))).
fn warp_to_midway<F>(src: &Volume, field: &DisplacementField, map: F) -> Volume
where
    F: Fn([f64; 3]) -> [f64; 3] + Sync,
{
    let shape = field.shape();
    let nv = src.volumes();
    let data = sample_grid(shape, nv, |x, y, z, v| {
        let d = field.get(x, y, z);
        let q = map([x as f64 + d[0], y as f64 + d[1], z as f64 + d[2]]);
        interp::trilinear(&src.data, v, q[0], q[1], q[2])
    });

    Volume {
        data,
        spacing: src.spacing,
        origin: src.origin,
    }
}

/// Zero the update wherever either mask, carried to the midway grid through
/// the current fields, excludes the voxel.
fn mask_update(
    update: &mut DisplacementField,
    fields: &Fields,
    transform: &LinearTransform,
    mask_moving: Option<&Volume>,
    mask_target: Option<&Volume>,
) {
    if mask_moving.is_none() && mask_target.is_none() {
        return;
    }

    let included = |mask: &Volume, q: [f64; 3]| -> bool {
        interp::trilinear(&mask.data, 0, q[0], q[1], q[2])
            > crate::consts::MASK_INCLUSION_THRESHOLD
    };

    let masked = fill_field(update.shape(), |x, y, z| {
        let p = [x as f64, y as f64, z as f64];
        let mut keep = true;
        if let Some(mask) = mask_moving {
            let d = fields.d1.get(x, y, z);
            let q = transform.apply_half([p[0] + d[0], p[1] + d[1], p[2] + d[2]]);
            keep &= included(mask, q);
        }
        if let Some(mask) = mask_target {
            let d = fields.d2.get(x, y, z);
            let q = transform.apply_half_inverse([p[0] + d[0], p[1] + d[1], p[2] + d[2]]);
            keep &= included(mask, q);
        }
        if keep {
            update.get(x, y, z)
        } else {
            [0.0, 0.0, 0.0]
        }
    });
    *update = masked;
}
