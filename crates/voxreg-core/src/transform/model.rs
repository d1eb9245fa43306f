use nalgebra::{Matrix3, Vector3};

use crate::error::Result;
use crate::transform::linear::LinearTransform;

/// Upper bound on the optimised parameter count across models.
pub const MAX_PARAMS: usize = 12;

/// The degrees of freedom optimised by a linear registration stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformModel {
    /// 6 parameters: ZYX Euler angles followed by translation.
    Rigid,
    /// 12 parameters: the 3x3 matrix in row-major order, then translation.
    Affine,
}

impl TransformModel {
    pub fn num_params(&self) -> usize {
        match self {
            TransformModel::Rigid => 6,
            TransformModel::Affine => 12,
        }
    }
}

/// Build the transform described by a parameter vector, rotating about `centre`.
pub fn transform_from_params(
    model: TransformModel,
    params: &[f64],
    centre: Vector3<f64>,
) -> Result<LinearTransform> {
    match model {
        TransformModel::Rigid => {
            let matrix = euler_matrix(params[0], params[1], params[2]);
            let translation = Vector3::new(params[3], params[4], params[5]);
            LinearTransform::new(matrix, translation, centre)
        }
        TransformModel::Affine => {
            let matrix = Matrix3::new(
                params[0], params[1], params[2], params[3], params[4], params[5], params[6],
                params[7], params[8],
            );
            let translation = Vector3::new(params[9], params[10], params[11]);
            LinearTransform::new(matrix, translation, centre)
        }
    }
}

/// Recover the parameter vector describing a transform. For the rigid model
/// the linear part is first projected onto the nearest rotation, so a
/// moments-based initialisation with slightly non-orthogonal axes still
/// yields a valid starting point.
pub fn params_from_transform(model: TransformModel, t: &LinearTransform) -> [f64; MAX_PARAMS] {
    let mut params = [0.0f64; MAX_PARAMS];
    match model {
        TransformModel::Rigid => {
            let r = polar_rotation(t.matrix());
            let [alpha, beta, gamma] = euler_from_matrix(&r);
            params[0] = alpha;
            params[1] = beta;
            params[2] = gamma;
            params[3] = t.translation().x;
            params[4] = t.translation().y;
            params[5] = t.translation().z;
        }
        TransformModel::Affine => {
            let m = t.matrix();
            for i in 0..3 {
                for j in 0..3 {
                    params[3 * i + j] = m[(i, j)];
                }
            }
            params[9] = t.translation().x;
            params[10] = t.translation().y;
            params[11] = t.translation().z;
        }
    }
    params
}

/// Per-voxel Jacobians of the transform with respect to its parameters,
/// with the rotation derivatives frozen at the current parameter values.
pub struct ParamSpace {
    model: TransformModel,
    centre: Vector3<f64>,
    rot_derivs: [Matrix3<f64>; 3],
}

impl ParamSpace {
    pub fn new(model: TransformModel, params: &[f64], centre: Vector3<f64>) -> Self {
        let rot_derivs = match model {
            TransformModel::Rigid => {
                let (a, b, g) = (params[0], params[1], params[2]);
                [
                    rot_z(g) * rot_y(b) * drot_x(a),
                    rot_z(g) * drot_y(b) * rot_x(a),
                    drot_z(g) * rot_y(b) * rot_x(a),
                ]
            }
            TransformModel::Affine => [Matrix3::zeros(); 3],
        };
        Self {
            model,
            centre,
            rot_derivs,
        }
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    /// Write dT(x)/dtheta_k into `jac[k]` for every parameter k.
    pub fn fill_point_jacobian(&self, p: [f64; 3], jac: &mut [[f64; 3]; MAX_PARAMS]) {
        let r = Vector3::new(p[0], p[1], p[2]) - self.centre;
        match self.model {
            TransformModel::Rigid => {
                for (k, d) in self.rot_derivs.iter().enumerate() {
                    let v = d * r;
                    jac[k] = [v.x, v.y, v.z];
                }
                jac[3] = [1.0, 0.0, 0.0];
                jac[4] = [0.0, 1.0, 0.0];
                jac[5] = [0.0, 0.0, 1.0];
            }
            TransformModel::Affine => {
                for i in 0..3 {
                    for j in 0..3 {
                        let mut v = [0.0; 3];
                        v[i] = r[j];
                        jac[3 * i + j] = v;
                    }
                }
                jac[9] = [1.0, 0.0, 0.0];
                jac[10] = [0.0, 1.0, 0.0];
                jac[11] = [0.0, 0.0, 1.0];
            }
        }
    }

    /// Characteristic magnitude of each parameter's effect on a point at
    /// distance `radius` from the centre, used to precondition the gradient.
    pub fn param_scales(&self, radius: f64) -> [f64; MAX_PARAMS] {
        let mut scales = [1.0f64; MAX_PARAMS];
        match self.model {
            TransformModel::Rigid => {
                for s in scales.iter_mut().take(3) {
                    *s = radius;
                }
            }
            TransformModel::Affine => {
                for s in scales.iter_mut().take(9) {
                    *s = radius;
                }
            }
        }
        scales
    }
}

pub fn rot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

pub fn rot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

pub fn rot_z(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

fn drot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(0.0, 0.0, 0.0, 0.0, -s, -c, 0.0, c, -s)
}

fn drot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, 0.0, c, 0.0, 0.0, 0.0, -c, 0.0, -s)
}

fn drot_z(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
}

/// Rotation matrix R = Rz(gamma) Ry(beta) Rx(alpha).
pub fn euler_matrix(alpha: f64, beta: f64, gamma: f64) -> Matrix3<f64> {
    rot_z(gamma) * rot_y(beta) * rot_x(alpha)
}

/// ZYX Euler angles of a rotation matrix. Near the beta = +-pi/2 singularity
/// gamma is pinned to zero and the remaining rotation folded into alpha.
pub fn euler_from_matrix(r: &Matrix3<f64>) -> [f64; 3] {
    let sin_beta = -r[(2, 0)];
    if sin_beta.abs() > 1.0 - 1e-9 {
        let beta = if sin_beta > 0.0 {
            std::f64::consts::FRAC_PI_2
        } else {
            -std::f64::consts::FRAC_PI_2
        };
        [(-r[(1, 2)]).atan2(r[(1, 1)]), beta, 0.0]
    } else {
        [
            r[(2, 1)].atan2(r[(2, 2)]),
            sin_beta.asin(),
            r[(1, 0)].atan2(r[(0, 0)]),
        ]
    }
}

/// Nearest rotation to a matrix in the Frobenius sense, via the polar
/// decomposition: R = U V^T with the reflection case corrected so that
/// det(R) = +1.
pub fn polar_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let mut r = u * v_t;
            if r.determinant() < 0.0 {
                let mut u_fixed = u;
                for i in 0..3 {
                    u_fixed[(i, 2)] = -u_fixed[(i, 2)];
                }
                r = u_fixed * v_t;
            }
            r
        }
        // SVD of a finite 3x3 matrix always yields factors.
        _ => Matrix3::identity(),
    }
}
