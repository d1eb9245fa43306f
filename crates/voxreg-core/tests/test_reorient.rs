use nalgebra::{Matrix3, Vector3};
use ndarray::Array4;

use voxreg_core::reorient::directions::DirectionSet;
use voxreg_core::reorient::sh::{basis_matrix, l_for_n, n_for_l};
use voxreg_core::reorient::{reorient, reorient_warp, Reorienter};
use voxreg_core::transform::linear::LinearTransform;
use voxreg_core::transform::model::rot_z;
use voxreg_core::volume::Volume;
use voxreg_core::warp::field::DisplacementField;

#[test]
fn test_coefficient_counts() {
    assert_eq!(n_for_l(0), 1);
    assert_eq!(n_for_l(2), 6);
    assert_eq!(n_for_l(4), 15);
    assert_eq!(n_for_l(8), 45);

    assert_eq!(l_for_n(1), Some(0));
    assert_eq!(l_for_n(6), Some(2));
    assert_eq!(l_for_n(15), Some(4));
    assert_eq!(l_for_n(28), Some(6));
    assert_eq!(l_for_n(7), None);
    assert_eq!(l_for_n(4), None);
}

#[test]
fn test_identity_rotation_is_a_no_op() {
    let dirs = DirectionSet::default_set();
    let reorienter = Reorienter::new(&dirs, 4).unwrap();
    let m = reorienter.rotation_matrix(&Matrix3::identity());

    for i in 0..15 {
        for j in 0..15 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(
                (m[(i, j)] - expected).abs() < 1e-2,
                "m[({},{})]={} should be ~{}",
                i,
                j,
                m[(i, j)],
                expected
            );
        }
    }
}

/// Coefficients of a series sharply peaked along a given axis, obtained by
/// fitting sampled amplitudes.
fn peaked_series(dirs: &DirectionSet, lmax: usize, axis: [f64; 3]) -> Vec<f64> {
    let basis = basis_matrix(dirs.directions(), lmax);
    let amplitudes: Vec<f64> = dirs
        .directions()
        .iter()
        .map(|d| {
            let dot = d[0] * axis[0] + d[1] * axis[1] + d[2] * axis[2];
            (4.0 * (dot * dot - 1.0)).exp()
        })
        .collect();

    // Plain least squares is fine here; the direction set is well spread.
    let b = basis.clone();
    let normal = (b.transpose() * &b).try_inverse().unwrap();
    let coeffs = normal * b.transpose() * nalgebra::DVector::from_vec(amplitudes);
    coeffs.iter().copied().collect()
}

fn amplitude(coeffs: &[f64], lmax: usize, dir: [f64; 3]) -> f64 {
    let basis = basis_matrix(&[dir], lmax);
    (0..coeffs.len()).map(|j| basis[(0, j)] * coeffs[j]).sum()
}

#[test]
fn test_quarter_turn_moves_the_peak() {
    let dirs = DirectionSet::default_set();
    let lmax = 4;
    let coeffs = peaked_series(&dirs, lmax, [1.0, 0.0, 0.0]);

    let mut vol = Volume::zeros([1, 1, 1], n_for_l(lmax));
    for (v, &c) in coeffs.iter().enumerate() {
        vol.data[[0, 0, 0, v]] = c as f32;
    }

    let before_x = amplitude(&coeffs, lmax, [1.0, 0.0, 0.0]);
    let before_y = amplitude(&coeffs, lmax, [0.0, 1.0, 0.0]);
    assert!(before_x > before_y, "series should start peaked along x");

    let quarter_turn = LinearTransform::new(
        rot_z(std::f64::consts::FRAC_PI_2),
        Vector3::zeros(),
        Vector3::zeros(),
    )
    .unwrap();
    let changed = reorient(&mut vol, &quarter_turn, &dirs).unwrap();
    assert!(changed);

    let rotated: Vec<f64> = (0..vol.volumes())
        .map(|v| vol.data[[0, 0, 0, v]] as f64)
        .collect();
    let after_x = amplitude(&rotated, lmax, [1.0, 0.0, 0.0]);
    let after_y = amplitude(&rotated, lmax, [0.0, 1.0, 0.0]);
    assert!(
        after_y > after_x,
        "peak should have moved to y: x={}, y={}",
        after_x,
        after_y
    );
}

#[test]
fn test_non_harmonic_volume_count_is_skipped() {
    let mut vol = Volume::zeros([2, 2, 2], 4);
    vol.data[[0, 0, 0, 0]] = 1.0;
    let original = vol.data.clone();

    let dirs = DirectionSet::default_set();
    let changed = reorient(&mut vol, &LinearTransform::identity(), &dirs).unwrap();
    assert!(!changed);
    assert_eq!(vol.data, original);
}

#[test]
fn test_scalar_image_is_skipped() {
    let mut vol = Volume::zeros([2, 2, 2], 1);
    let dirs = DirectionSet::default_set();
    let changed = reorient(&mut vol, &LinearTransform::identity(), &dirs).unwrap();
    assert!(!changed);
}

#[test]
fn test_zero_field_warp_reorientation_is_a_no_op() {
    let dirs = DirectionSet::default_set();
    let lmax = 2;
    let coeffs = peaked_series(&dirs, lmax, [0.0, 0.0, 1.0]);

    let shape = [4, 4, 4];
    let mut data = Array4::<f32>::zeros((4, 4, 4, n_for_l(lmax)));
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..4 {
                for (v, &c) in coeffs.iter().enumerate() {
                    data[[x, y, z, v]] = c as f32;
                }
            }
        }
    }
    let mut vol = Volume::new(data.clone(), [1.0; 3], [0.0; 3]);

    let field = DisplacementField::zeros(shape);
    let changed = reorient_warp(&mut vol, &field, &dirs).unwrap();
    assert!(changed);

    for (&after, &before) in vol.data.iter().zip(data.iter()) {
        assert!(
            (after - before).abs() < 1e-2,
            "coefficient drifted: {} -> {}",
            before,
            after
        );
    }
}

#[test]
fn test_rotational_field_moves_the_peak() {
    let dirs = DirectionSet::default_set();
    let lmax = 4;
    let coeffs = peaked_series(&dirs, lmax, [1.0, 0.0, 0.0]);

    let shape = [4, 4, 4];
    let mut vol = Volume::zeros(shape, n_for_l(lmax));
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..4 {
                for (v, &c) in coeffs.iter().enumerate() {
                    vol.data[[x, y, z, v]] = c as f32;
                }
            }
        }
    }

    // A whole-grid rotation field, d(x) = R(x - c) - (x - c), whose
    // deformation Jacobian is R at every voxel.
    let r = rot_z(std::f64::consts::FRAC_PI_2);
    let mut field = DisplacementField::zeros(shape);
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..4 {
                let p = Vector3::new(x as f64 - 1.5, y as f64 - 1.5, z as f64 - 1.5);
                let q = r * p;
                field.set(x, y, z, [q.x - p.x, q.y - p.y, q.z - p.z]);
            }
        }
    }

    let changed = reorient_warp(&mut vol, &field, &dirs).unwrap();
    assert!(changed);

    let rotated: Vec<f64> = (0..vol.volumes())
        .map(|v| vol.data[[2, 2, 2, v]] as f64)
        .collect();
    let after_x = amplitude(&rotated, lmax, [1.0, 0.0, 0.0]);
    let after_y = amplitude(&rotated, lmax, [0.0, 1.0, 0.0]);
    assert!(
        after_y > after_x,
        "peak should have moved to y: x={}, y={}",
        after_x,
        after_y
    );
}

#[test]
fn test_too_few_directions_are_rejected() {
    let dirs = DirectionSet::fibonacci(10);
    assert!(Reorienter::new(&dirs, 4).is_err());
}
