use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_LINEAR_MAX_ITER, DEFAULT_LMAX, DEFAULT_SCALE_FACTORS, GD_INITIAL_STEP, GD_MAX_STEP,
    GD_MIN_GRADIENT_NORM, GD_MIN_RELATIVE_IMPROVEMENT, GD_MIN_STEP, GD_STEP_GROW, GD_STEP_SHRINK,
    GLOBAL_SEARCH_ANGLES, REPETITION_PERTURBATION,
};
use crate::error::{RegistrationError, Result};
use crate::filters::resample::downsample;
use crate::metric::{Metric, MetricContext, MetricKind, RobustEstimator};
use crate::reorient::sh;
use crate::transform::init::{initialise, TransformInit};
use crate::transform::linear::LinearTransform;
use crate::transform::model::{
    euler_matrix, params_from_transform, transform_from_params, ParamSpace, TransformModel,
    MAX_PARAMS,
};
use crate::volume::Volume;

/// Configuration of one linear (rigid or affine) registration stage.
///
/// The per-level vectors (`max_iter`, `loop_density`, `repetitions`) hold
/// either one entry, broadcast to every resolution level, or exactly one
/// entry per scale factor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    /// Resolution levels, coarsest first, each in (0, 1].
    pub scale_factors: Vec<f64>,
    /// Gradient-descent iteration cap per level.
    pub max_iter: Vec<usize>,
    /// Fraction of voxels visited per cost evaluation, per level.
    pub loop_density: Vec<f64>,
    /// Optimisation restarts per level; the best result wins.
    pub repetitions: Vec<usize>,
    pub metric: MetricKind,
    pub estimator: Option<RobustEstimator>,
    pub cc_extent: Option<usize>,
    pub init: TransformInit,
    /// Band limit cap for spherical-harmonic images: series carrying more
    /// coefficients are truncated before registration. `None` disables the cap.
    pub lmax: Option<usize>,
    /// Exhaustive rotation search at the coarsest level before descent.
    pub global_search: bool,
    /// Explicit starting transform; overrides `init` when present.
    #[serde(skip)]
    pub init_transform: Option<LinearTransform>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            scale_factors: DEFAULT_SCALE_FACTORS.to_vec(),
            max_iter: vec![DEFAULT_LINEAR_MAX_ITER],
            loop_density: vec![1.0],
            repetitions: vec![1],
            metric: MetricKind::default(),
            estimator: None,
            cc_extent: None,
            init: TransformInit::default(),
            lmax: Some(DEFAULT_LMAX),
            global_search: false,
            init_transform: None,
        }
    }
}

impl LinearConfig {
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
        for &d in &self.loop_density {
            if !(d > 0.0 && d <= 1.0) {
                return Err(RegistrationError::Configuration(format!(
                    "loop density must lie in (0, 1], got {}",
                    d
                )));
            }
        }
        if let Some(lmax) = self.lmax {
            if lmax % 2 != 0 {
                return Err(RegistrationError::Configuration(format!(
                    "lmax must be even, got {}",
                    lmax
                )));
            }
        }
        let levels = self.scale_factors.len();
        for (name, len) in [
            ("max_iter", self.max_iter.len()),
            ("loop_density", self.loop_density.len()),
            ("repetitions", self.repetitions.len()),
        ] {
            if len != 1 && len != levels {
                return Err(RegistrationError::Configuration(format!(
                    "{} must have 1 entry or one per scale factor ({}), got {}",
                    name, levels, len
                )));
            }
        }
        Ok(())
    }
}

/// Broadcast a one-or-per-level vector to per-level values.
fn per_level<T: Copy>(values: &[T], level: usize) -> T {
    if values.len() == 1 {
        values[0]
    } else {
        values[level]
    }
}

fn stride_for_density(density: f64) -> usize {
    ((1.0 / density).round() as usize).max(1)
}

/// A rigid or affine registration stage: multi-resolution gradient descent
/// with backtracking line search on a voxelwise similarity metric.
pub struct LinearRegistration {
    model: TransformModel,
    config: LinearConfig,
}

impl LinearRegistration {
    pub fn new(model: TransformModel, config: LinearConfig) -> Self {
        Self { model, config }
    }

    /// Estimate the transform mapping target voxel coordinates onto the
    /// moving image.
    pub fn run(
        &self,
        moving: &Volume,
        target: &Volume,
        mask_moving: Option<&Volume>,
        mask_target: Option<&Volume>,
    ) -> Result<LinearTransform> {
        self.config.validate()?;
        let (moving, target) = match_volumes(moving, target, self.config.lmax)?;
        let metric = Metric::build(
            self.config.metric,
            self.config.estimator,
            self.config.cc_extent,
            moving.is_4d(),
        )?;

        let mut current = match &self.config.init_transform {
            Some(t) => t.clone(),
            None => initialise(self.config.init, &moving, &target, mask_moving, mask_target)?,
        };

        // Characteristic lever arm of a rotation parameter, in voxels.
        let [tx, ty, tz] = target.shape();
        let radius = (tx + ty + tz) as f64 / 6.0;

        for (level, &scale) in self.config.scale_factors.iter().enumerate() {
            let moving_level = downsample(&moving, scale);
            let target_level = downsample(&target, scale);
            let mask_moving_level = mask_moving.map(|m| downsample(m, scale));
            let mask_target_level = mask_target.map(|m| downsample(m, scale));

            let max_iter = per_level(&self.config.max_iter, level);
            let density = per_level(&self.config.loop_density, level);
            let repetitions = per_level(&self.config.repetitions, level).max(1);

            let ctx = MetricContext {
                moving: &moving_level,
                target: &target_level,
                mask_moving: mask_moving_level.as_ref(),
                mask_target: mask_target_level.as_ref(),
                scale,
                stride: stride_for_density(density),
                phase: 0,
            };

            if level == 0 && self.config.global_search {
                current = global_rotation_search(&metric, &ctx, &current);
            }

            let start_params = params_from_transform(self.model, &current);
            let mut best: Option<(f64, LinearTransform)> = None;

            for rep in 0..repetitions {
                let mut params = start_params;
                if rep > 0 {
                    perturb(self.model, &mut params, rep, radius);
                }
                let (cost, transform) = self.descend(
                    &metric, &ctx, params, current.centre(), max_iter, radius, level,
                )?;
                if best.as_ref().map_or(true, |(c, _)| cost < *c) {
                    best = Some((cost, transform));
                }
            }

            // repetitions >= 1, so a best result always exists
            if let Some((cost, transform)) = best {
                info!(level, scale, cost, "linear level finished");
                current = transform;
            }
        }

        Ok(current)
    }

    /// Gradient descent with a backtracking line search. The step is the
    /// approximate endpoint displacement in full-resolution voxels; candidate
    /// transforms that collapse (non-positive determinant) count as line
    /// search rejections.
    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        metric: &Metric,
        ctx: &MetricContext<'_>,
        mut params: [f64; MAX_PARAMS],
        centre: &nalgebra::Vector3<f64>,
        max_iter: usize,
        radius: f64,
        level: usize,
    ) -> Result<(f64, LinearTransform)> {
        let mut transform = transform_from_params(self.model, &params, *centre)?;
        let mut step = GD_INITIAL_STEP;
        let mut cost = f64::INFINITY;

        for iter in 0..max_iter {
            let ctx = MetricContext { phase: iter, ..*ctx };
            let space = ParamSpace::new(self.model, &params, *centre);
            let scales = space.param_scales(radius);

            let (current_cost, grad) = metric.cost_gradient(&ctx, &transform, &space);
            cost = current_cost;
            if !cost.is_finite() {
                warn!(level, "no overlap between images; stopping level");
                break;
            }

            // Precondition so every parameter moves the image endpoint by a
            // comparable number of voxels.
            let n = space.num_params();
            let mut dir = [0.0f64; MAX_PARAMS];
            let mut norm_sq = 0.0f64;
            for k in 0..n {
                dir[k] = grad[k] / (scales[k] * scales[k]);
                norm_sq += (grad[k] / scales[k]).powi(2);
            }
            let norm = norm_sq.sqrt();
            if norm < GD_MIN_GRADIENT_NORM {
                debug!(level, iter, "gradient vanished");
                break;
            }

            let mut candidate_params = params;
            for k in 0..n {
                candidate_params[k] = params[k] - step * dir[k] / norm;
            }

            match transform_from_params(self.model, &candidate_params, *centre) {
                Ok(candidate) => {
                    let candidate_cost = metric.cost(&ctx, &candidate);
                    if candidate_cost < cost {
                        let improvement = (cost - candidate_cost) / cost.abs().max(f64::MIN_POSITIVE);
                        params = candidate_params;
                        transform = candidate;
                        cost = candidate_cost;
                        step = (step * GD_STEP_GROW).min(GD_MAX_STEP);
                        if improvement < GD_MIN_RELATIVE_IMPROVEMENT {
                            break;
                        }
                    } else {
                        step *= GD_STEP_SHRINK;
                    }
                }
                Err(_) => {
                    // Degenerate candidate; back off like a failed line search.
                    step *= GD_STEP_SHRINK;
                }
            }

            if step < GD_MIN_STEP {
                debug!(level, iter, "step length exhausted");
                break;
            }
        }

        Ok((cost, transform))
    }
}

/// Exhaustive search over a coarse grid of rotations composed onto the
/// current transform, keeping whichever rotation scores best. Cost-only;
/// runs at the coarsest level.
fn global_rotation_search(
    metric: &Metric,
    ctx: &MetricContext<'_>,
    current: &LinearTransform,
) -> LinearTransform {
    let mut best = current.clone();
    let mut best_cost = metric.cost(ctx, current);

    for &a in &GLOBAL_SEARCH_ANGLES {
        for &b in &GLOBAL_SEARCH_ANGLES {
            for &g in &GLOBAL_SEARCH_ANGLES {
                if a == 0.0 && b == 0.0 && g == 0.0 {
                    continue;
                }
                let rotated = euler_matrix(a, b, g) * current.matrix();
                let Ok(candidate) = current.with_matrix(rotated) else {
                    continue;
                };
                let cost = metric.cost(ctx, &candidate);
                if cost < best_cost {
                    best_cost = cost;
                    best = candidate;
                }
            }
        }
    }

    info!(cost = best_cost, "global rotation search finished");
    best
}

/// Deterministic restart perturbation: alternate-sign offsets scaled so that
/// rotations and translations both move the endpoint by about the same
/// number of voxels.
fn perturb(model: TransformModel, params: &mut [f64; MAX_PARAMS], rep: usize, radius: f64) {
    let space = ParamSpace::new(model, params, nalgebra::Vector3::zeros());
    let scales = space.param_scales(radius);
    for k in 0..model.num_params() {
        let sign = if (rep + k) % 2 == 0 { 1.0 } else { -1.0 };
        params[k] += sign * REPETITION_PERTURBATION * rep as f64 / scales[k];
    }
}

/// Reconcile the volume counts of the two images. Matching counts pass
/// through; two spherical-harmonic series of different band limits are
/// trimmed to the smaller one; anything else is an error. A band limit cap
/// then truncates both series to at most `n_for_l(lmax)` coefficients, since
/// high-degree terms contribute little to alignment and slow every metric
/// evaluation.
pub(crate) fn match_volumes(
    moving: &Volume,
    target: &Volume,
    lmax: Option<usize>,
) -> Result<(Volume, Volume)> {
    let (moving, target) = if moving.volumes() == target.volumes() {
        (moving.clone(), target.clone())
    } else {
        let both_sh =
            sh::l_for_n(moving.volumes()).is_some() && sh::l_for_n(target.volumes()).is_some();
        if !both_sh {
            return Err(RegistrationError::DimensionMismatch(format!(
                "images have {} and {} volumes",
                moving.volumes(),
                target.volumes()
            )));
        }
        let n = moving.volumes().min(target.volumes());
        warn!(
            volumes = n,
            "band limits differ; truncating both images to the smaller series"
        );
        (moving.with_volumes(n)?, target.with_volumes(n)?)
    };

    if let Some(lmax) = lmax {
        let n = sh::n_for_l(lmax);
        if sh::l_for_n(moving.volumes()).is_some() && moving.volumes() > n {
            debug!(volumes = n, lmax, "capping the spherical-harmonic series");
            return Ok((moving.with_volumes(n)?, target.with_volumes(n)?));
        }
    }
    Ok((moving, target))
}
